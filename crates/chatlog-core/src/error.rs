//! Error types for chatlog-core

use thiserror::Error;

/// Errors raised while building core values
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("Empty identifier for {0}")]
    EmptyIdentifier(&'static str),

    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),
}
