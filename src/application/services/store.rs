//! Key store: the live view over all backends and all-or-nothing commits.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::application::services::MountManager;
use crate::application::{ApplicationError, ApplicationResult, IoResultExt};
use crate::domain::{
    diff, is_reserved, mountpoints_root, record_root, ChangeOrigin, DomainError, Key, KeyCompare,
    KeyName, KeySet, MountTable, Owner, RecordingSession,
};
use crate::infrastructure::traits::Backend;

/// Store state loaded once per invocation from the root backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreContext {
    /// Everything the root backend stores, admin subtree included.
    pub root: KeySet,
    pub table: MountTable,
    pub session: RecordingSession,
}

impl StoreContext {
    /// Admin subtree regenerated from the table and the session.
    pub fn admin_keys(&self) -> KeySet {
        let mut keys = self.table.to_keys();
        keys.extend(self.session.to_keys());
        keys
    }
}

/// One backend's slice of the store.
struct Partition {
    /// `None` for the root backend.
    owner: Option<KeyName>,
    backend: Box<dyn Backend>,
    stored: KeySet,
}

/// Merged live tree plus the per-backend content it came from.
pub struct LiveView {
    pub keys: KeySet,
    partitions: Vec<Partition>,
}

/// Value and metadata of one key as reported by [`KeyStore::facts`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KeyFacts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub meta: BTreeMap<String, String>,
}

impl From<&Key> for KeyFacts {
    fn from(key: &Key) -> Self {
        Self {
            value: key.value().map(str::to_string),
            meta: key.meta().clone(),
        }
    }
}

/// Writes staged for one commit, restorable as a unit.
struct Transaction<'a> {
    mounts: &'a MountManager,
    written: Vec<(&'a dyn Backend, Option<String>)>,
}

impl<'a> Transaction<'a> {
    fn new(mounts: &'a MountManager) -> Self {
        Self {
            mounts,
            written: Vec::new(),
        }
    }

    fn write(&mut self, backend: &'a dyn Backend, keys: &KeySet) -> ApplicationResult<()> {
        let snapshot = backend
            .snapshot()
            .with_mount_context("snapshot", &backend.location())?;
        self.written.push((backend, snapshot));
        self.mounts.write_subtree(backend, keys)
    }

    /// Put every touched backend back, newest first.
    fn rollback(self) {
        for (backend, snapshot) in self.written.into_iter().rev() {
            if let Err(e) = backend.restore(snapshot.as_deref()) {
                warn!(location = %backend.location(), error = %e, "rollback failed");
            } else {
                debug!(location = %backend.location(), "rolled back");
            }
        }
    }

    fn len(&self) -> usize {
        self.written.len()
    }
}

/// Service reading and writing the whole store.
pub struct KeyStore {
    mounts: Arc<MountManager>,
    compare: KeyCompare,
}

impl KeyStore {
    pub fn new(mounts: Arc<MountManager>, keep_order: bool) -> Self {
        Self {
            mounts,
            compare: KeyCompare::new(keep_order),
        }
    }

    pub fn mounts(&self) -> &MountManager {
        &self.mounts
    }

    /// Read the root backend and the mount table and session stored in it.
    #[instrument(level = "debug", skip(self))]
    pub fn load(&self) -> ApplicationResult<StoreContext> {
        let backend = self.mounts.open_root()?;
        let root = self.mounts.read_subtree(backend.as_ref())?;
        let table = MountTable::from_keys(&root)?;
        let session = RecordingSession::from_keys(&root)?;
        debug!(
            keys = root.len(),
            mounts = table.len(),
            recording = session.active,
            "loaded store context"
        );
        Ok(StoreContext {
            root,
            table,
            session,
        })
    }

    /// Live tree as seen through `table`; each backend contributes the keys
    /// it owns, anything it stores below a nested mount stays hidden.
    pub fn read_live(&self, root: &KeySet, table: &MountTable) -> ApplicationResult<LiveView> {
        let mut keys = table.owned_by_root(root);
        let mut partitions = Vec::with_capacity(table.len() + 1);
        for mountpoint in table.iter() {
            let backend = self.mounts.open(mountpoint)?;
            let stored = self.mounts.read_subtree(backend.as_ref())?;
            keys.extend(table.owned_by(&stored, &mountpoint.prefix));
            partitions.push(Partition {
                owner: Some(mountpoint.prefix.clone()),
                backend,
                stored,
            });
        }
        // root last: it carries the mount table and the session
        partitions.push(Partition {
            owner: None,
            backend: self.mounts.open_root()?,
            stored: root.clone(),
        });
        Ok(LiveView { keys, partitions })
    }

    /// Persist `target` as the new live tree together with `ctx`'s mount
    /// table and session. Returns how many backends were written.
    ///
    /// Only backends whose content changes are written, the root backend
    /// last. If any write fails, every backend already written is restored
    /// and the error returned.
    #[instrument(level = "debug", skip_all)]
    pub fn commit(
        &self,
        ctx: &StoreContext,
        live: &LiveView,
        target: &KeySet,
    ) -> ApplicationResult<usize> {
        let mut target = target.clone();
        target.remove_recursive(&mountpoints_root());
        target.remove_recursive(&record_root());
        target.extend(ctx.admin_keys());

        let mut tx = Transaction::new(&self.mounts);
        for partition in &live.partitions {
            let owns = |name: &KeyName| match (ctx.table.owner_of(name), &partition.owner) {
                (Owner::Root, None) => true,
                (Owner::Mount(m), Some(prefix)) => &m.prefix == prefix,
                _ => false,
            };
            // stored keys shadowed by another backend are left as they are
            let mut content = partition.stored.filter_names(|n| !owns(n));
            content.extend(target.filter_names(|n| owns(n)));
            if content == partition.stored {
                continue;
            }
            if let Err(e) = tx.write(partition.backend.as_ref(), &content) {
                warn!(error = %e, "write failed, rolling back");
                tx.rollback();
                return Err(e);
            }
        }
        let written = tx.len();
        if written > 0 {
            info!(backends = written, "committed");
        }
        Ok(written)
    }

    /// Flat view of every live key at or below `prefix`.
    #[instrument(level = "debug", skip(self))]
    pub fn facts(&self, prefix: &KeyName) -> ApplicationResult<BTreeMap<String, KeyFacts>> {
        let ctx = self.load()?;
        let live = self.read_live(&ctx.root, &ctx.table)?;
        let facts: BTreeMap<String, KeyFacts> = live
            .keys
            .subtree(prefix)
            .map(|(name, key)| (name.to_string(), KeyFacts::from(key)))
            .collect();
        let mounted =
            ctx.table.covers(prefix) || ctx.table.iter().any(|m| m.prefix.is_below(prefix));
        if facts.is_empty() && !mounted {
            return Err(ApplicationError::NothingMounted(prefix.to_string()));
        }
        Ok(facts)
    }

    /// Set one key's value directly, keeping its metadata.
    #[instrument(level = "debug", skip(self, value))]
    pub fn set_key(&self, name: &KeyName, value: &str) -> ApplicationResult<bool> {
        reject_reserved(name)?;
        self.edit(|keys| {
            let mut key = keys.get(name).cloned().unwrap_or_default();
            key.set_value(value);
            keys.insert(name.clone(), key);
        })
    }

    /// Remove one key, or its whole subtree.
    #[instrument(level = "debug", skip(self))]
    pub fn remove_key(&self, name: &KeyName, recursive: bool) -> ApplicationResult<bool> {
        reject_reserved(name)?;
        self.edit(|keys| {
            if recursive {
                keys.remove_recursive(name);
            } else {
                keys.remove(name);
            }
        })
    }

    /// Apply an external edit to the live tree; an enabled session captures it.
    fn edit(&self, change: impl FnOnce(&mut KeySet)) -> ApplicationResult<bool> {
        let mut ctx = self.load()?;
        let live = self.read_live(&ctx.root, &ctx.table)?;
        let mut target = live.keys.clone();
        change(&mut target);
        let applied = diff(&live.keys, &target, self.compare);
        if applied.is_empty() {
            debug!("edit is a no-op");
            return Ok(false);
        }
        ctx.session
            .capture(&applied, ChangeOrigin::External, false, self.compare);
        self.commit(&ctx, &live, &target)?;
        Ok(true)
    }
}

fn reject_reserved(name: &KeyName) -> ApplicationResult<()> {
    if is_reserved(name) {
        return Err(DomainError::validation(format!(
            "'{name}' is maintained by the store and cannot be edited"
        ))
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BackendSpec, Mountpoint};
    use crate::infrastructure::backends::{FileFormat, PluginRegistry};
    use crate::infrastructure::traits::RealFileSystem;
    use tempfile::TempDir;

    fn name(s: &str) -> KeyName {
        s.parse().unwrap()
    }

    fn store(dir: &TempDir) -> KeyStore {
        let provider = PluginRegistry::new(
            Arc::new(RealFileSystem),
            dir.path().to_path_buf(),
            FileFormat::Toml,
        );
        KeyStore::new(Arc::new(MountManager::new(Arc::new(provider))), false)
    }

    #[test]
    fn given_empty_store_when_loading_then_empty_context() {
        let dir = TempDir::new().unwrap();
        assert_eq!(store(&dir).load().unwrap(), StoreContext::default());
    }

    #[test]
    fn given_mount_when_committing_then_keys_split_between_backends() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut ctx = store.load().unwrap();
        ctx.table.insert(Mountpoint::new(
            name("user:/app"),
            BackendSpec::new("json", "app.json"),
        ));
        let live = store.read_live(&ctx.root, &ctx.table).unwrap();
        let target: KeySet = [
            (name("user:/app/port"), Key::with_value("8080")),
            (name("user:/other"), Key::with_value("x")),
        ]
        .into_iter()
        .collect();

        assert_eq!(store.commit(&ctx, &live, &target).unwrap(), 2);

        let app = std::fs::read_to_string(dir.path().join("app.json")).unwrap();
        assert!(app.contains("port"));
        assert!(!app.contains("other"));
        let ctx = store.load().unwrap();
        assert_eq!(ctx.table.len(), 1);
        assert!(ctx.root.contains(&name("user:/other")));
        let live = store.read_live(&ctx.root, &ctx.table).unwrap();
        assert_eq!(live.keys.len(), target.len() + ctx.table.to_keys().len());
    }

    #[test]
    fn given_unchanged_target_when_committing_then_nothing_written() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.set_key(&name("user:/a"), "1").unwrap();
        let ctx = store.load().unwrap();
        let live = store.read_live(&ctx.root, &ctx.table).unwrap();

        assert_eq!(store.commit(&ctx, &live, &live.keys).unwrap(), 0);
    }

    #[test]
    fn given_keys_when_querying_facts_then_flat_map_under_prefix() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.set_key(&name("user:/a/x"), "1").unwrap();
        store.set_key(&name("user:/b"), "2").unwrap();

        let facts = store.facts(&name("user:/a")).unwrap();

        assert_eq!(facts.len(), 1);
        assert_eq!(facts["user:/a/x"].value.as_deref(), Some("1"));
    }

    #[test]
    fn given_nothing_under_prefix_when_querying_facts_then_nothing_mounted() {
        let dir = TempDir::new().unwrap();
        let err = store(&dir).facts(&name("user:/nowhere")).unwrap_err();
        assert!(matches!(err, ApplicationError::NothingMounted(_)));
    }

    #[test]
    fn given_reserved_key_when_setting_then_validation_error() {
        let dir = TempDir::new().unwrap();
        let err = store(&dir)
            .set_key(&name("system:/elektra/record/config/active"), "1")
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Domain(DomainError::Validation(_))));
    }

    #[test]
    fn given_existing_key_when_removing_recursively_then_subtree_gone() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.set_key(&name("user:/a/x"), "1").unwrap();
        store.set_key(&name("user:/a/y"), "2").unwrap();

        assert!(store.remove_key(&name("user:/a"), true).unwrap());
        assert!(!store.remove_key(&name("user:/a"), true).unwrap());
        assert!(store.facts(&name("user:/a")).is_err());
    }
}
