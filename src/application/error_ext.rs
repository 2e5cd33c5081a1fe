//! Error conversion helpers for backend I/O
//!
//! Provides an extension trait for cleaner error handling with location context.

use std::io;

use crate::application::{ApplicationError, ApplicationResult};

/// Extension trait for converting `io::Result` to `ApplicationResult` with context.
pub trait IoResultExt<T> {
    /// Report a backend failure as a mount error.
    ///
    /// # Example
    /// ```ignore
    /// backend.read().with_mount_context("read", &backend.location())?;
    /// ```
    fn with_mount_context(self, action: &str, location: &str) -> ApplicationResult<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn with_mount_context(self, action: &str, location: &str) -> ApplicationResult<T> {
        self.map_err(|e| ApplicationError::mount(format!("{action} {location}"), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_io_error_when_adding_mount_context_then_mount_error_names_location() {
        let result: io::Result<()> = Err(io::Error::other("disk full"));

        let err = result
            .with_mount_context("write", "/srv/app.toml")
            .unwrap_err();

        assert!(matches!(err, ApplicationError::Mount { .. }));
        assert_eq!(
            err.to_string(),
            "mount error: write /srv/app.toml: disk full"
        );
    }
}
