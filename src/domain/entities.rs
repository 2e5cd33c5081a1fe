//! Domain entities: mountpoints, the mount table, and the administrative subtree.

use std::collections::BTreeMap;

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::key::{Key, KeyName, Namespace, Segment};
use crate::domain::keyset::KeySet;

const ADMIN: &str = "elektra";
const MOUNTPOINTS: &str = "mountpoints";
const RECORD: &str = "record";

/// `system:/elektra`: nothing may be mounted at or below it.
pub fn admin_root() -> KeyName {
    KeyName::new(Namespace::System, vec![Segment::name(ADMIN)])
}

/// `system:/elektra/mountpoints`: persisted mount table.
pub fn mountpoints_root() -> KeyName {
    admin_root().child(Segment::name(MOUNTPOINTS))
}

/// `system:/elektra/record`: persisted recording session.
pub fn record_root() -> KeyName {
    admin_root().child(Segment::name(RECORD))
}

/// Names owned by the engine's own bookkeeping; read-only for desired state.
pub fn is_reserved(name: &KeyName) -> bool {
    name.is_below_or_same(&mountpoints_root()) || name.is_below_or_same(&record_root())
}

/// One plugin of a backend with its configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginSpec {
    pub name: String,
    pub config: BTreeMap<String, String>,
}

impl PluginSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: BTreeMap::new(),
        }
    }
}

/// How a mounted subtree is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSpec {
    /// Storage plugin name (`toml`, `json`, ...).
    pub backend: String,
    /// File location, resolved by the backend provider.
    pub file: String,
    pub resolver: String,
    pub plugins: Vec<PluginSpec>,
    /// Whether recommended plugins are added to `plugins` on mount.
    pub recommends: bool,
}

pub const DEFAULT_RESOLVER: &str = "resolver";

impl BackendSpec {
    pub fn new(backend: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            file: file.into(),
            resolver: DEFAULT_RESOLVER.to_string(),
            plugins: Vec::new(),
            recommends: false,
        }
    }
}

/// A path prefix bound to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mountpoint {
    pub prefix: KeyName,
    pub backend: BackendSpec,
    /// Carry keys over from the previous backend when remounting.
    pub preserve_keys: bool,
}

impl Mountpoint {
    pub fn new(prefix: KeyName, backend: BackendSpec) -> Self {
        Self {
            prefix,
            backend,
            preserve_keys: false,
        }
    }

    /// Same prefix and storage; `preserve_keys` only matters while remounting.
    pub fn same_binding(&self, other: &Mountpoint) -> bool {
        self.prefix == other.prefix && self.backend == other.backend
    }
}

/// Where a key is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner<'a> {
    Root,
    Mount(&'a Mountpoint),
}

/// All active mountpoints, keyed by prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountTable {
    mounts: BTreeMap<KeyName, Mountpoint>,
}

impl MountTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, prefix: &KeyName) -> Option<&Mountpoint> {
        self.mounts.get(prefix)
    }

    pub fn insert(&mut self, mountpoint: Mountpoint) -> Option<Mountpoint> {
        self.mounts.insert(mountpoint.prefix.clone(), mountpoint)
    }

    pub fn remove(&mut self, prefix: &KeyName) -> Option<Mountpoint> {
        self.mounts.remove(prefix)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mountpoint> {
        self.mounts.values()
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }

    /// Longest mountpoint covering `name`, or the root backend.
    ///
    /// The administrative subtree always belongs to the root backend, even
    /// below a mount at an ancestor such as `system:/`.
    pub fn owner_of(&self, name: &KeyName) -> Owner<'_> {
        if name.is_below_or_same(&admin_root()) {
            return Owner::Root;
        }
        self.mounts
            .values()
            .filter(|m| name.is_below_or_same(&m.prefix))
            .max_by_key(|m| m.prefix.depth())
            .map_or(Owner::Root, Owner::Mount)
    }

    /// Whether `name` lies at or below some mountpoint.
    pub fn covers(&self, name: &KeyName) -> bool {
        matches!(self.owner_of(name), Owner::Mount(_))
    }

    /// Whether `name` is stored by the mountpoint at `prefix`.
    pub fn is_owned_by(&self, name: &KeyName, prefix: &KeyName) -> bool {
        matches!(self.owner_of(name), Owner::Mount(m) if &m.prefix == prefix)
    }

    /// Keys of `keys` stored by the mountpoint at `prefix` (nested mounts excluded).
    pub fn owned_by(&self, keys: &KeySet, prefix: &KeyName) -> KeySet {
        keys.cut(prefix).filter_names(|n| self.is_owned_by(n, prefix))
    }

    /// Keys of `keys` stored by the root backend.
    pub fn owned_by_root(&self, keys: &KeySet) -> KeySet {
        keys.filter_names(|n| !self.covers(n))
    }

    /// Persisted form below `system:/elektra/mountpoints`.
    ///
    /// One entry per prefix (the prefix is a single escaped segment) with
    /// `backend`, `file`, `resolver`, `recommends`, `preserveKeys` and
    /// `plugins/#N` (value = plugin name, metadata `config/<option>`).
    pub fn to_keys(&self) -> KeySet {
        let root = mountpoints_root();
        let mut keys = KeySet::new();
        for mount in self.mounts.values() {
            let entry = root.child(Segment::name(mount.prefix.to_string()));
            let spec = &mount.backend;
            keys.insert(entry.clone(), Key::new());
            keys.insert(entry.join_path("backend"), Key::with_value(&spec.backend));
            keys.insert(entry.join_path("file"), Key::with_value(&spec.file));
            keys.insert(entry.join_path("resolver"), Key::with_value(&spec.resolver));
            keys.insert(entry.join_path("recommends"), Key::with_value(flag(spec.recommends)));
            keys.insert(
                entry.join_path("preserveKeys"),
                Key::with_value(flag(mount.preserve_keys)),
            );
            let plugins = entry.join_path("plugins");
            for (index, plugin) in spec.plugins.iter().enumerate() {
                let mut key = Key::with_value(&plugin.name);
                for (option, value) in &plugin.config {
                    key.set_meta(format!("config/{option}"), value.clone());
                }
                keys.insert(plugins.child(Segment::Index(index)), key);
            }
        }
        keys
    }

    /// Read the table back from its persisted form; other keys are ignored.
    pub fn from_keys(keys: &KeySet) -> DomainResult<Self> {
        let root = mountpoints_root();
        let mut table = MountTable::new();
        for entry in keys.children(&root) {
            let Some(Segment::Name(prefix)) = entry.base_name() else {
                return Err(DomainError::validation(format!(
                    "malformed mount table entry '{entry}'"
                )));
            };
            let prefix: KeyName = prefix.parse()?;
            let field = |name: &str| {
                keys.get(&entry.join_path(name))
                    .and_then(Key::value)
                    .map(str::to_string)
            };
            let backend = field("backend").ok_or_else(|| {
                DomainError::validation(format!("mount table entry '{prefix}' has no backend"))
            })?;
            let plugins_root = entry.join_path("plugins");
            let plugins = keys
                .children(&plugins_root)
                .iter()
                .filter_map(|p| keys.get(p))
                .map(|key| PluginSpec {
                    name: key.value().unwrap_or_default().to_string(),
                    config: key
                        .meta()
                        .iter()
                        .filter_map(|(m, v)| {
                            m.strip_prefix("config/").map(|o| (o.to_string(), v.clone()))
                        })
                        .collect(),
                })
                .collect();
            table.insert(Mountpoint {
                prefix,
                backend: BackendSpec {
                    backend,
                    file: field("file").unwrap_or_default(),
                    resolver: field("resolver").unwrap_or_else(|| DEFAULT_RESOLVER.to_string()),
                    plugins,
                    recommends: field("recommends").as_deref() == Some("1"),
                },
                preserve_keys: field("preserveKeys").as_deref() == Some("1"),
            });
        }
        Ok(table)
    }
}

pub(crate) fn flag(on: bool) -> &'static str {
    if on {
        "1"
    } else {
        "0"
    }
}
