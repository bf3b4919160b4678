use thiserror::Error;

pub mod backend;
pub mod clock;
pub mod config;
pub mod conformance;
pub mod engine;
pub mod entry;
pub mod persistence;
pub mod sweeper;

pub use backend::{Backend, Capabilities, FileBackend, MemoryBackend};
pub use clock::{Clock, ManualClock, PrecisionClock, SystemClock, Timestamp};
pub use config::Config;
pub use engine::{SetOptions, TtlEngine};
pub use entry::Entry;
pub use sweeper::Sweeper;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("key not found: {key}")]
    NotFound { key: String },

    #[error("operation not supported by backend: {0}")]
    Unsupported(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(String),
}

/// Coarse classification of an [`Error`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Unsupported,
    Io,
    Codec,
}

impl Error {
    pub(crate) fn not_found(key: impl Into<String>) -> Self {
        Error::NotFound { key: key.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::Io(_) => ErrorKind::Io,
            Error::Codec(_) => ErrorKind::Codec,
        }
    }

    /// HTTP-style status code for transports that need one.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::InvalidArgument => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Unsupported => 501,
            ErrorKind::Io | ErrorKind::Codec => 500,
        }
    }

    /// The key this error refers to, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            Error::NotFound { key } => Some(key),
            _ => None,
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
