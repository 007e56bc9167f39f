//! The binary DSP module container: format, parser and instance type.
//!
//! A module is distributed as a small little-endian container holding an
//! export table (name → effect entry point) and an initial linear-memory
//! size in 64 KiB pages. The host never executes foreign code; each export
//! resolves to one of the built-in effect transforms in [`crate::engine`].

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::{RemixError, Result};

/// Size of one linear-memory page in bytes.
pub const PAGE_SIZE: usize = 64 * 1024;

/// Leading magic of a module container.
pub const MODULE_MAGIC: [u8; 4] = *b"RXDM";

/// Container format version this crate understands.
pub const MODULE_VERSION: u8 = 1;

/// Effect entry points a module may export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectKind {
    /// One-pole lowpass plus bit-depth reduction.
    Lofi,
    /// Linear-resampling tempo change. The only transform whose output
    /// length differs from its input length.
    TempoShift,
    /// Three-band shelving equalizer driven by a preset id.
    Equalizer,
    /// Deterministic noise bed mixed under the signal.
    AmbientMix,
}

impl EffectKind {
    /// Wire opcode used in the container's export table.
    pub fn opcode(self) -> u8 {
        match self {
            Self::Lofi => 0x01,
            Self::TempoShift => 0x02,
            Self::Equalizer => 0x03,
            Self::AmbientMix => 0x04,
        }
    }

    /// Resolves a wire opcode back to an effect, if known.
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            0x01 => Some(Self::Lofi),
            0x02 => Some(Self::TempoShift),
            0x03 => Some(Self::Equalizer),
            0x04 => Some(Self::AmbientMix),
            _ => None,
        }
    }
}

/// Flat byte-addressable region shared between the host and the module's
/// transforms. Growing the region invalidates every previously taken view,
/// which is tracked with a generation counter.
#[derive(Debug)]
pub struct LinearMemory {
    bytes: Vec<u8>,
    generation: u64,
}

impl LinearMemory {
    fn with_pages(pages: usize) -> Self {
        Self {
            bytes: vec![0; pages * PAGE_SIZE],
            generation: 0,
        }
    }

    /// Current size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True when the region holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Generation counter; bumped on every growth.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Extends the region by `pages` zeroed pages and invalidates all
    /// outstanding views.
    pub fn grow(&mut self, pages: usize) {
        if pages == 0 {
            return;
        }
        let new_len = self.bytes.len() + pages * PAGE_SIZE;
        self.bytes.resize(new_len, 0);
        self.generation += 1;
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

/// A compiled DSP module instance: the export table plus its linear memory.
///
/// Instances are shared as `Arc<DspModule>`; memory sits behind a mutex so
/// the single-load guarantee and bridge copies stay race-free even if a
/// host introduces threads.
#[derive(Debug)]
pub struct DspModule {
    exports: BTreeMap<String, EffectKind>,
    memory: Mutex<LinearMemory>,
}

impl DspModule {
    /// Parses and validates a module container.
    pub fn compile(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);

        let magic = reader.read_array::<4>()?;
        if magic != MODULE_MAGIC {
            return Err(RemixError::Compile("bad magic".to_string()));
        }
        let version = reader.read_u8()?;
        if version != MODULE_VERSION {
            return Err(RemixError::Compile(format!(
                "unsupported container version {version}"
            )));
        }
        let flags = reader.read_u8()?;
        if flags != 0 {
            return Err(RemixError::Compile(format!(
                "reserved flags byte must be zero, found {flags:#04x}"
            )));
        }
        let pages = reader.read_u16()?;
        if pages == 0 {
            return Err(RemixError::Compile(
                "module declares zero memory pages".to_string(),
            ));
        }
        let count = reader.read_u16()?;
        if count == 0 {
            return Err(RemixError::Compile(
                "module declares no exports".to_string(),
            ));
        }

        let mut exports = BTreeMap::new();
        for _ in 0..count {
            let opcode = reader.read_u8()?;
            let kind = EffectKind::from_opcode(opcode).ok_or_else(|| {
                RemixError::Compile(format!("unknown effect opcode {opcode:#04x}"))
            })?;
            let name_len = reader.read_u8()? as usize;
            if name_len == 0 {
                return Err(RemixError::Compile("empty export name".to_string()));
            }
            let raw = reader.read_bytes(name_len)?;
            let name = std::str::from_utf8(raw)
                .map_err(|_| RemixError::Compile("export name is not UTF-8".to_string()))?;
            if exports.insert(name.to_string(), kind).is_some() {
                return Err(RemixError::Compile(format!(
                    "duplicate export name `{name}`"
                )));
            }
        }

        if !reader.is_exhausted() {
            return Err(RemixError::Compile(
                "trailing bytes after export table".to_string(),
            ));
        }

        Ok(Self {
            exports,
            memory: Mutex::new(LinearMemory::with_pages(pages as usize)),
        })
    }

    /// Number of named exports.
    pub fn export_count(&self) -> usize {
        self.exports.len()
    }

    /// Export names in sorted order.
    pub fn export_names(&self) -> Vec<&str> {
        self.exports.keys().map(String::as_str).collect()
    }

    /// Resolves an export name to its effect entry point.
    pub fn resolve(&self, name: &str) -> Option<EffectKind> {
        self.exports.get(name).copied()
    }

    /// Current linear memory size in bytes.
    pub fn memory_size(&self) -> Result<usize> {
        Ok(self.lock_memory()?.len())
    }

    /// Copies the current linear memory out as an owned buffer. The checked
    /// view API in [`crate::bridge`] is the supported mutation path.
    pub fn snapshot_memory(&self) -> Result<Vec<u8>> {
        Ok(self.lock_memory()?.bytes().to_vec())
    }

    /// Grows linear memory by `pages`, invalidating outstanding views.
    pub fn grow_memory(&self, pages: usize) -> Result<()> {
        self.lock_memory()?.grow(pages);
        Ok(())
    }

    pub(crate) fn lock_memory(&self) -> Result<MutexGuard<'_, LinearMemory>> {
        self.memory
            .lock()
            .map_err(|_| RemixError::internal("linear memory lock has been poisoned"))
    }
}

/// Builder/encoder for module containers, used by tooling and tests to
/// produce well-formed binaries.
#[derive(Debug, Clone)]
pub struct ModuleImage {
    pages: u16,
    exports: Vec<(String, EffectKind)>,
}

impl ModuleImage {
    /// Starts an image with the given initial memory size in pages.
    pub fn new(pages: u16) -> Self {
        Self {
            pages,
            exports: Vec::new(),
        }
    }

    /// The image every tool ships by default: all four effects, 4 pages.
    pub fn standard() -> Self {
        Self::new(4)
            .export("lofi", EffectKind::Lofi)
            .export("tempo_shift", EffectKind::TempoShift)
            .export("equalizer", EffectKind::Equalizer)
            .export("ambient_mix", EffectKind::AmbientMix)
    }

    /// Adds a named export.
    pub fn export(mut self, name: impl Into<String>, kind: EffectKind) -> Self {
        self.exports.push((name.into(), kind));
        self
    }

    /// Overrides the initial memory size in pages.
    pub fn with_pages(mut self, pages: u16) -> Self {
        self.pages = pages;
        self
    }

    /// Serializes the image into container bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.pages == 0 {
            return Err(RemixError::InvalidInput(
                "a module needs at least one memory page",
            ));
        }
        if self.exports.is_empty() {
            return Err(RemixError::InvalidInput(
                "a module needs at least one export",
            ));
        }
        if self.exports.len() > u16::MAX as usize {
            return Err(RemixError::InvalidInput("too many exports"));
        }

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MODULE_MAGIC);
        bytes.push(MODULE_VERSION);
        bytes.push(0); // flags, reserved
        bytes.extend_from_slice(&self.pages.to_le_bytes());
        bytes.extend_from_slice(&(self.exports.len() as u16).to_le_bytes());

        for (name, kind) in &self.exports {
            if name.is_empty() || name.len() > u8::MAX as usize {
                return Err(RemixError::InvalidInput(
                    "export names must be 1 to 255 bytes long",
                ));
            }
            bytes.push(kind.opcode());
            bytes.push(name.len() as u8);
            bytes.extend_from_slice(name.as_bytes());
        }

        Ok(bytes)
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|end| *end <= self.buf.len());
        match end {
            Some(end) => {
                let slice = &self.buf[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(RemixError::Compile(
                "unexpected end of module container".to_string(),
            )),
        }
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let slice = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.read_array::<2>()?;
        Ok(u16::from_le_bytes(bytes))
    }

    fn is_exhausted(&self) -> bool {
        self.pos == self.buf.len()
    }
}
