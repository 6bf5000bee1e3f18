//! Error types for logging setup

use thiserror::Error;

/// Errors that can occur while installing the subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The log directory or file could not be created
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The level or target directives could not be parsed
    #[error("Invalid filter: {0}")]
    Filter(String),

    /// The subscriber or file appender could not be set up
    #[error("Initialization failed: {0}")]
    Init(String),
}
