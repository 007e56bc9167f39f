/// Result alias that carries the custom [`RemixError`] type.
pub type Result<T> = std::result::Result<T, RemixError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum RemixError {
    /// The DSP module bytes could not be retrieved from their source.
    #[error("failed to fetch module from `{path}`: {reason}")]
    Fetch { path: String, reason: String },
    /// The fetched bytes do not form a valid DSP module container.
    #[error("invalid DSP module: {0}")]
    Compile(String),
    /// An operation required a loaded DSP module but none is available.
    #[error("no DSP module has been loaded")]
    NotLoaded,
    /// A memory-bridge copy was attempted with mismatched lengths. The copy
    /// is rejected before any byte moves.
    #[error("length mismatch: view holds {expected} elements, array holds {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    /// A typed view does not fit inside the module's linear memory.
    #[error("range at offset {offset} spanning {len} bytes exceeds linear memory of {size} bytes")]
    OutOfBounds { offset: usize, len: usize, size: usize },
    /// A typed view was taken before linear memory grew and no longer
    /// describes a valid region.
    #[error("typed view predates a linear memory growth and must be re-taken")]
    StaleView,
    /// The media transport refused or failed an operation.
    #[error("transport error: {0}")]
    Transport(String),
    /// The requested export name is not present in the module's table.
    #[error("unknown export `{0}`")]
    UnknownExport(String),
    /// A caller-supplied argument was rejected up front.
    #[error("{0}")]
    InvalidInput(&'static str),
    /// Internal invariant failures such as poisoned locks.
    #[error("{0}")]
    Internal(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl RemixError {
    /// Creates an internal error wrapping the provided message.
    pub fn internal<T: Into<String>>(msg: T) -> Self {
        Self::Internal(msg.into())
    }
}
