//! Domain-level errors (no external dependencies)

use thiserror::Error;

use crate::domain::key::KeyName;

/// Domain errors represent malformed input or irreconcilable state.
/// These are independent of storage and I/O concerns.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("cannot build desired state at '{path}': {message}")]
    Build { path: String, message: String },

    #[error("invalid input: {0}")]
    Validation(String),

    #[error(
        "merge conflict on {} key(s): {}",
        .paths.len(),
        .paths.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
    )]
    MergeConflict { paths: Vec<KeyName> },
}

impl DomainError {
    pub fn build(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Build {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
