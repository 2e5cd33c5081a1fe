//! Mount manager: binds key prefixes to backends.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::application::{ApplicationResult, IoResultExt};
use crate::domain::{KeyName, KeySet, MountTable, Mountpoint};
use crate::infrastructure::traits::{Backend, BackendProvider};

/// Effect of a mount request on the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountChange {
    Unchanged,
    Added,
    /// Same prefix, different backend; carries the replaced binding.
    Remounted { previous: Mountpoint },
}

/// Service for mount table changes and subtree I/O.
pub struct MountManager {
    provider: Arc<dyn BackendProvider>,
}

impl MountManager {
    pub fn new(provider: Arc<dyn BackendProvider>) -> Self {
        Self { provider }
    }

    /// Bind `requested` in `table`.
    ///
    /// An identical binding is left alone; a different backend at the same
    /// prefix replaces the old binding.
    #[instrument(level = "debug", skip(self, table, requested), fields(prefix = %requested.prefix))]
    pub fn mount(
        &self,
        table: &mut MountTable,
        requested: Mountpoint,
    ) -> ApplicationResult<MountChange> {
        let location = requested.prefix.to_string();
        let backend = self
            .provider
            .prepare(requested.backend)
            .with_mount_context("mount", &location)?;
        let mountpoint = Mountpoint {
            prefix: requested.prefix,
            backend,
            preserve_keys: requested.preserve_keys,
        };

        match table.get(&mountpoint.prefix) {
            Some(existing) if existing.same_binding(&mountpoint) => {
                debug!("already mounted with identical backend");
                Ok(MountChange::Unchanged)
            }
            Some(_) => {
                info!(backend = %mountpoint.backend.backend, "remounting");
                let previous = table.insert(mountpoint);
                Ok(previous.map_or(MountChange::Added, |previous| MountChange::Remounted {
                    previous,
                }))
            }
            None => {
                info!(backend = %mountpoint.backend.backend, "mounting");
                table.insert(mountpoint);
                Ok(MountChange::Added)
            }
        }
    }

    /// Remove the binding at `prefix`. Returns whether one existed.
    pub fn unmount(&self, table: &mut MountTable, prefix: &KeyName) -> bool {
        let removed = table.remove(prefix).is_some();
        if removed {
            info!(%prefix, "unmounted");
        } else {
            debug!(%prefix, "unmount: nothing mounted");
        }
        removed
    }

    pub fn open(&self, mountpoint: &Mountpoint) -> ApplicationResult<Box<dyn Backend>> {
        self.provider
            .open(&mountpoint.prefix, &mountpoint.backend)
            .with_mount_context("open backend for", &mountpoint.prefix.to_string())
    }

    pub fn open_root(&self) -> ApplicationResult<Box<dyn Backend>> {
        self.provider
            .open_root()
            .with_mount_context("open", "root backend")
    }

    /// Everything `backend` stores for its mounted range.
    pub fn read_subtree(&self, backend: &dyn Backend) -> ApplicationResult<KeySet> {
        backend
            .read()
            .with_mount_context("read", &backend.location())
    }

    /// Replace the content `backend` stores with `keys`.
    pub fn write_subtree(&self, backend: &dyn Backend, keys: &KeySet) -> ApplicationResult<()> {
        debug!(location = %backend.location(), keys = keys.len(), "writing subtree");
        backend
            .write(keys)
            .with_mount_context("write", &backend.location())
    }
}
