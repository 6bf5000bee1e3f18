//! Error types for chatlog-store
//!
//! Running out of events is never an error: readers return short or empty
//! batches instead.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors that can occur while reading log stores
#[derive(Debug, Error)]
pub enum StoreError {
    /// A page or directory listing could not be read or parsed
    #[error("Failed to read {}: {reason}", path.display())]
    StoreRead { path: PathBuf, reason: String },

    /// The caller passed an argument the store cannot use
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A configuration file could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Create a new StoreRead error
    pub fn store_read(path: impl AsRef<Path>, reason: impl ToString) -> Self {
        Self::StoreRead {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// Create a new InvalidArgument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create a new Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::StoreRead {
            path: PathBuf::new(),
            reason: err.to_string(),
        }
    }
}

impl From<chatlog_core::CoreError> for StoreError {
    fn from(err: chatlog_core::CoreError) -> Self {
        StoreError::InvalidArgument(err.to_string())
    }
}
