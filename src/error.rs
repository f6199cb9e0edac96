//! Error types shared by the stores, the coordinator and the worker.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed request parameters or subscriber address. The only error
    /// surfaced synchronously to callers of the coordinator.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("I/O error at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted blob could not be decoded.
    #[error("corrupt blob at '{}': {reason}", path.display())]
    Corruption { path: PathBuf, reason: String },

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Failure raised by an analysis engine while computing a job.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("missing input: {0}")]
    MissingInput(String),

    #[error("artifact store: {0}")]
    Store(String),

    /// The engine panicked instead of returning.
    #[error("engine panicked: {0}")]
    Panicked(String),
}

impl From<Error> for EngineError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation(msg) => Self::InvalidParameters(msg),
            other => Self::Store(other.to_string()),
        }
    }
}

/// Failure raised by a notification transport.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("message rejected: {0}")]
    Rejected(String),
}
