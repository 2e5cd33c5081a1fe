//! Application-level errors (wraps domain errors)

use std::io;

use thiserror::Error;

use crate::domain::DomainError;

/// Application errors wrap domain errors and add application-level context.
#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error("{0}")]
    Domain(#[from] DomainError),

    /// Backend bind, read or write failure.
    #[error("mount error: {context}: {source}")]
    Mount {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("config error: {message}")]
    Config { message: String },

    #[error("operation failed: {context}")]
    OperationFailed {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("nothing mounted at {0} and no keys below it")]
    NothingMounted(String),
}

impl ApplicationError {
    pub fn mount(context: impl Into<String>, source: io::Error) -> Self {
        Self::Mount {
            context: context.into(),
            source,
        }
    }
}

/// Result type for application layer operations.
pub type ApplicationResult<T> = Result<T, ApplicationError>;
