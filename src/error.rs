use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Unified error type for the storage engine.
///
/// `Clone` so a sticky background error can be handed to every writer that
/// runs into it; I/O errors are shared behind an `Arc` for that reason.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// IO error from disk operations.
    #[error("IO error: {0}")]
    Io(Arc<io::Error>),
    /// Data corruption detected (CRC mismatch, bad format, etc).
    #[error("Corruption: {0}")]
    Corruption(String),
    /// Caller passed something the engine refuses to coerce.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// A block names a compression codec that is not registered.
    #[error("Unknown compression codec id: {0}")]
    UnknownCompression(u8),
    /// A database, file or manifest that must exist does not.
    #[error("Not found: {0}")]
    NotFound(String),
    /// A previous background flush or compaction failed; writes are refused.
    #[error("Background error: {0}")]
    Background(Box<Error>),
    /// The database has been closed.
    #[error("Database is closed")]
    Closed,
}

impl Error {
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn is_corruption(&self) -> bool {
        match self {
            Error::Corruption(_) => true,
            Error::Background(inner) => inner.is_corruption(),
            _ => false,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;
