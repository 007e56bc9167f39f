//! Core library for the remix platform's audio rendering pipeline.
//!
//! The crate covers the mechanics of loading, bridging and transforming
//! audio samples in real time: a binary DSP module with linear memory
//! ([`module`], [`loader`]), strictly checked typed views over that memory
//! ([`bridge`]), the effect invocation choreography ([`engine`]), the
//! playback session state machine over an abstract media transport
//! ([`session`]) and the cancellable spectrum sampling loop ([`spectrum`]).

pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod loader;
pub mod module;
pub mod session;
pub mod spectrum;

pub use bridge::{ByteView, FloatView, MemoryBridge};
pub use config::{AppConfig, EngineConfig, SpectrumConfig};
pub use engine::{output_len, EffectEngine, EffectParams};
pub use error::{RemixError, Result};
pub use loader::{DspModuleRegistry, FsModuleSource, ModuleSource};
pub use module::{DspModule, EffectKind, LinearMemory, ModuleImage, PAGE_SIZE};
pub use session::sim::SimTransport;
pub use session::{
    PlaybackSession, SessionCallbacks, SessionState, Track, Transport, TransportEvent,
};
pub use spectrum::{
    AnalysisTap, FftTap, FrameScheduler, FrameToken, FramebufferSurface, ManualScheduler,
    SpectrumSampler, Surface, TAP_OUTPUT_CEILING,
};

#[cfg(feature = "http")]
pub use loader::HttpModuleSource;
