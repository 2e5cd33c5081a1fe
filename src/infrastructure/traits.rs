//! I/O boundary traits for testability
//!
//! These traits abstract external I/O operations, allowing services
//! to be tested with mock implementations.

use std::io;
use std::path::Path;

use crate::domain::{BackendSpec, KeyName, KeySet};

/// Filesystem abstraction for testability.
pub trait FileSystem: Send + Sync {
    /// Read file contents to string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Write string content to file.
    fn write(&self, path: &Path, content: &str) -> io::Result<()>;

    /// Check if path exists.
    fn exists(&self, path: &Path) -> bool;

    /// Create directory and all parent directories.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Rename/move a file.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Remove a file.
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Create parent directories if needed.
    fn ensure_parent(&self, path: &Path) -> io::Result<()>;
}

/// Storage of one mounted subtree (or of the root partition).
pub trait Backend: Send + Sync {
    /// Human-readable storage location for messages.
    fn location(&self) -> String;

    /// All stored keys as absolute names.
    fn read(&self) -> io::Result<KeySet>;

    /// Replace the stored content with `keys`.
    fn write(&self, keys: &KeySet) -> io::Result<()>;

    /// Raw stored content, `None` if nothing is stored yet.
    fn snapshot(&self) -> io::Result<Option<String>>;

    /// Put back content captured by [`Backend::snapshot`].
    fn restore(&self, snapshot: Option<&str>) -> io::Result<()>;
}

/// Resolves backend specs to live backends.
pub trait BackendProvider: Send + Sync {
    /// Fill in the storage plugin and recommended plugins; rejects unknown plugins.
    fn prepare(&self, spec: BackendSpec) -> io::Result<BackendSpec>;

    /// Open the storage for a mountpoint at `prefix`.
    fn open(&self, prefix: &KeyName, spec: &BackendSpec) -> io::Result<Box<dyn Backend>>;

    /// Open the root backend holding unmounted keys and the admin subtree.
    fn open_root(&self) -> io::Result<Box<dyn Backend>>;
}

// ============================================================
// REAL IMPLEMENTATIONS
// ============================================================

/// Real filesystem implementation.
#[derive(Debug, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn write(&self, path: &Path, content: &str) -> io::Result<()> {
        std::fs::write(path, content)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn ensure_parent(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                self.create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}
