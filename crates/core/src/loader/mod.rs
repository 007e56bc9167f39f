//! Module loading: fetch, compile and cache a DSP module instance.
//!
//! The registry is an explicit object handed to consumers rather than a
//! process-wide global, so tests never need hidden resets. It holds at most
//! one module for the life of the process; repeat loads return the cached
//! instance without re-fetching.

use std::fs;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::module::DspModule;
use crate::{RemixError, Result};

/// Source of raw module container bytes.
pub trait ModuleSource: Send + Sync {
    fn fetch(&self, path: &str) -> Result<Vec<u8>>;
}

/// Reads module bytes from the local filesystem.
#[derive(Debug, Default)]
pub struct FsModuleSource;

impl ModuleSource for FsModuleSource {
    fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        fs::read(path).map_err(|err| RemixError::Fetch {
            path: path.to_string(),
            reason: err.to_string(),
        })
    }
}

/// Fetches module bytes over HTTP. Non-2xx statuses are fetch failures.
#[cfg(feature = "http")]
#[derive(Debug, Default)]
pub struct HttpModuleSource {
    client: reqwest::blocking::Client,
}

#[cfg(feature = "http")]
impl HttpModuleSource {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(feature = "http")]
impl ModuleSource for HttpModuleSource {
    fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        let fetch_err = |reason: String| RemixError::Fetch {
            path: path.to_string(),
            reason,
        };

        let response = self
            .client
            .get(path)
            .send()
            .map_err(|err| fetch_err(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fetch_err(format!("HTTP status {status}")));
        }
        let bytes = response
            .bytes()
            .map_err(|err| fetch_err(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[derive(Debug, Default)]
struct LoadSlot {
    module: Option<Arc<DspModule>>,
    loaded_from: Option<String>,
}

/// Owns the one DSP module instance of the process and the source used to
/// fetch it. Load attempts are serialized; concurrent callers observe the
/// same instance and the container is never compiled twice.
pub struct DspModuleRegistry {
    source: Box<dyn ModuleSource>,
    slot: Mutex<LoadSlot>,
}

impl DspModuleRegistry {
    pub fn new(source: Box<dyn ModuleSource>) -> Self {
        Self {
            source,
            slot: Mutex::new(LoadSlot::default()),
        }
    }

    /// Registry backed by the local filesystem.
    pub fn with_fs() -> Self {
        Self::new(Box::new(FsModuleSource))
    }

    /// Fetches and compiles the module at `path`, caching the instance.
    /// Once a module is cached it is returned as-is, even for a different
    /// `path` (single-module behavior, preserved deliberately).
    pub fn load(&self, path: &str) -> Result<Arc<DspModule>> {
        let mut slot = self.lock_slot()?;

        if let Some(module) = &slot.module {
            if slot.loaded_from.as_deref() != Some(path) {
                tracing::warn!(
                    requested = path,
                    cached = slot.loaded_from.as_deref(),
                    "registry already holds a module; returning cached instance"
                );
            }
            return Ok(Arc::clone(module));
        }

        let bytes = self.source.fetch(path)?;
        let module = Arc::new(DspModule::compile(&bytes)?);
        tracing::info!(
            path,
            exports = module.export_count(),
            memory_bytes = module.memory_size()?,
            "dsp module loaded"
        );

        slot.module = Some(Arc::clone(&module));
        slot.loaded_from = Some(path.to_string());
        Ok(module)
    }

    /// Returns the cached instance, or [`RemixError::NotLoaded`].
    pub fn get(&self) -> Result<Arc<DspModule>> {
        let slot = self.lock_slot()?;
        slot.module.as_ref().map(Arc::clone).ok_or(RemixError::NotLoaded)
    }

    /// Non-failing probe for a completed load.
    pub fn is_loaded(&self) -> bool {
        self.lock_slot()
            .map(|slot| slot.module.is_some())
            .unwrap_or(false)
    }

    /// Snapshot of the module's current linear memory. Re-take after any
    /// operation that may grow memory.
    pub fn memory(&self) -> Result<Vec<u8>> {
        self.get()?.snapshot_memory()
    }

    fn lock_slot(&self) -> Result<MutexGuard<'_, LoadSlot>> {
        self.slot
            .lock()
            .map_err(|_| RemixError::internal("module registry lock has been poisoned"))
    }
}

impl std::fmt::Debug for DspModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DspModuleRegistry")
            .field("is_loaded", &self.is_loaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::module::{EffectKind, ModuleImage, PAGE_SIZE};

    struct CountingSource {
        fetches: Arc<AtomicUsize>,
        bytes: Vec<u8>,
    }

    impl ModuleSource for CountingSource {
        fn fetch(&self, _path: &str) -> Result<Vec<u8>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.bytes.clone())
        }
    }

    fn counting_registry() -> (DspModuleRegistry, Arc<AtomicUsize>) {
        let fetches = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            fetches: Arc::clone(&fetches),
            bytes: ModuleImage::standard().encode().unwrap(),
        };
        (DspModuleRegistry::new(Box::new(source)), fetches)
    }

    #[test]
    fn get_before_load_is_not_loaded() {
        let (registry, _) = counting_registry();
        assert!(!registry.is_loaded());
        assert!(matches!(registry.get(), Err(RemixError::NotLoaded)));
        assert!(matches!(registry.memory(), Err(RemixError::NotLoaded)));
    }

    #[test]
    fn load_caches_and_never_refetches() {
        let (registry, fetches) = counting_registry();
        let first = registry.load("effects.rxdm").unwrap();
        let second = registry.load("effects.rxdm").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert!(registry.is_loaded());
        assert_eq!(registry.get().unwrap().export_count(), 4);
    }

    #[test]
    fn repeat_load_with_other_path_returns_cached_instance() {
        let (registry, fetches) = counting_registry();
        let first = registry.load("a.rxdm").unwrap();
        let second = registry.load("b.rxdm").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_loads_resolve_to_one_instance() {
        let (registry, fetches) = counting_registry();
        let registry = Arc::new(registry);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.load("effects.rxdm").unwrap())
            })
            .collect();

        let modules: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for module in &modules[1..] {
            assert!(Arc::ptr_eq(&modules[0], module));
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fetch_failures_propagate() {
        let registry = DspModuleRegistry::with_fs();
        let err = registry.load("/definitely/not/here.rxdm").unwrap_err();
        assert!(matches!(err, RemixError::Fetch { .. }));
        assert!(!registry.is_loaded());
    }

    #[test]
    fn compile_failures_propagate_and_leave_registry_empty() {
        struct BadSource;
        impl ModuleSource for BadSource {
            fn fetch(&self, _path: &str) -> Result<Vec<u8>> {
                Ok(vec![0, 1, 2, 3])
            }
        }

        let registry = DspModuleRegistry::new(Box::new(BadSource));
        assert!(matches!(
            registry.load("x.rxdm"),
            Err(RemixError::Compile(_))
        ));
        assert!(!registry.is_loaded());
    }

    #[test]
    fn memory_snapshot_matches_declared_pages() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            fetches,
            bytes: ModuleImage::new(2)
                .export("lofi", EffectKind::Lofi)
                .encode()
                .unwrap(),
        };
        let registry = DspModuleRegistry::new(Box::new(source));
        registry.load("effects.rxdm").unwrap();
        assert_eq!(registry.memory().unwrap().len(), 2 * PAGE_SIZE);
    }
}
