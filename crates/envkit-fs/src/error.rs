//! Error types for envkit-fs

use std::path::PathBuf;
use std::time::Duration;

/// Result type for envkit-fs operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in envkit-fs operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {format} config at {path}: {message}")]
    ConfigParse {
        path: PathBuf,
        format: String,
        message: String,
    },

    #[error("Failed to serialize {format} config for {path}: {message}")]
    ConfigSerialize {
        path: PathBuf,
        format: String,
        message: String,
    },

    #[error("Unsupported config format: {extension}")]
    UnsupportedFormat { extension: String },

    #[error("Lock acquisition failed for {path}")]
    LockFailed { path: PathBuf },

    #[error("Lock on {path} still held by another process after {waited:?}")]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("Path {path} is not a safe relative path: {reason}")]
    UnsafePath { path: String, reason: String },

    #[error("Path {path} escapes its sandbox root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
