//! File-format backends and the plugin registry resolving mount specs to them.
//!
//! A backend file is a flat document mapping key names to `{ value, meta }`.
//! The root backend stores absolute names; a mounted backend stores names
//! relative to its mountpoint, with `/` standing for the mountpoint itself.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::domain::{BackendSpec, Key, KeyName, KeySet, PluginSpec};
use crate::infrastructure::traits::{Backend, BackendProvider, FileSystem};
use crate::util::path::{expand_env_vars, resolve_against, sanitize_file_stem};

/// Serialization format of a backend file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Toml,
    Json,
}

impl FileFormat {
    pub const ALL: [FileFormat; 2] = [FileFormat::Toml, FileFormat::Json];

    pub fn name(&self) -> &'static str {
        match self {
            FileFormat::Toml => "toml",
            FileFormat::Json => "json",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_name)
    }

    fn encode(&self, doc: &BTreeMap<String, StoredKey>) -> io::Result<String> {
        match self {
            FileFormat::Toml => toml::to_string_pretty(doc).map_err(invalid_data),
            FileFormat::Json => serde_json::to_string_pretty(doc)
                .map(|mut s| {
                    s.push('\n');
                    s
                })
                .map_err(invalid_data),
        }
    }

    fn decode(&self, content: &str) -> io::Result<BTreeMap<String, StoredKey>> {
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        match self {
            FileFormat::Toml => toml::from_str(content).map_err(invalid_data),
            FileFormat::Json => serde_json::from_str(content).map_err(invalid_data),
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FileFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(&s.to_ascii_lowercase())
            .ok_or_else(|| format!("unknown file format '{s}' (expected toml or json)"))
    }
}

fn invalid_data(e: impl fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct StoredKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    meta: BTreeMap<String, String>,
}

const SELF_NAME: &str = "/";

/// Backend storing a key partition in one TOML or JSON file.
pub struct FileBackend {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    format: FileFormat,
    /// `None` for the root backend (absolute names).
    prefix: Option<KeyName>,
}

impl FileBackend {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        path: PathBuf,
        format: FileFormat,
        prefix: Option<KeyName>,
    ) -> Self {
        Self {
            fs,
            path,
            format,
            prefix,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn stored_name(&self, name: &KeyName) -> io::Result<String> {
        match &self.prefix {
            None => Ok(name.to_string()),
            Some(prefix) => match name.relative_to(prefix) {
                Some(rel) if rel.is_empty() => Ok(SELF_NAME.to_string()),
                Some(rel) => Ok(rel),
                None => Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("key '{name}' is outside mountpoint '{prefix}'"),
                )),
            },
        }
    }

    fn key_name(&self, stored: &str) -> io::Result<KeyName> {
        match &self.prefix {
            None => stored.parse().map_err(invalid_data),
            Some(prefix) if stored == SELF_NAME => Ok(prefix.clone()),
            Some(prefix) => Ok(prefix.join_path(stored)),
        }
    }

    /// Write through a sibling temp file and rename over the target.
    fn write_atomic(&self, content: &str) -> io::Result<()> {
        self.fs.ensure_parent(&self.path)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        self.fs.write(&tmp, content)?;
        self.fs.rename(&tmp, &self.path)
    }
}

impl Backend for FileBackend {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn read(&self) -> io::Result<KeySet> {
        if !self.fs.exists(&self.path) {
            return Ok(KeySet::new());
        }
        let content = self.fs.read_to_string(&self.path)?;
        let doc = self.format.decode(&content)?;
        doc.into_iter()
            .map(|(stored, key)| {
                Ok((self.key_name(&stored)?, Key::from_parts(key.value, key.meta)))
            })
            .collect()
    }

    fn write(&self, keys: &KeySet) -> io::Result<()> {
        let doc = keys
            .iter()
            .map(|(name, key)| {
                Ok((
                    self.stored_name(name)?,
                    StoredKey {
                        value: key.value().map(str::to_string),
                        meta: key.meta().clone(),
                    },
                ))
            })
            .collect::<io::Result<BTreeMap<_, _>>>()?;
        let content = self.format.encode(&doc)?;
        debug!(path = %self.path.display(), keys = keys.len(), "writing backend file");
        self.write_atomic(&content)
    }

    fn snapshot(&self) -> io::Result<Option<String>> {
        if self.fs.exists(&self.path) {
            self.fs.read_to_string(&self.path).map(Some)
        } else {
            Ok(None)
        }
    }

    fn restore(&self, snapshot: Option<&str>) -> io::Result<()> {
        match snapshot {
            Some(content) => self.write_atomic(content),
            None if self.fs.exists(&self.path) => self.fs.remove_file(&self.path),
            None => Ok(()),
        }
    }
}

/// Plugins accepted in a mount's plugin list besides the storage formats.
/// They are recorded in the mount table; the file backends ignore them.
pub const FILTER_PLUGINS: &[&str] = &["sync", "type", "base64", "validation", "glob"];

const RESOLVER_PREFIX: &str = "resolver";
const ROOT_FILE: &str = "default";
const MOUNTS_DIR: &str = "mounts";

/// Known plugins and where their files live.
pub struct PluginRegistry {
    fs: Arc<dyn FileSystem>,
    base_dir: PathBuf,
    root_format: FileFormat,
}

impl PluginRegistry {
    pub fn new(fs: Arc<dyn FileSystem>, base_dir: PathBuf, root_format: FileFormat) -> Self {
        Self {
            fs,
            base_dir,
            root_format,
        }
    }

    pub fn root_path(&self) -> PathBuf {
        self.base_dir
            .join(ROOT_FILE)
            .with_extension(self.root_format.name())
    }

    pub fn recommended_plugins(&self, backend: &str) -> Vec<&'static str> {
        match FileFormat::from_name(backend) {
            Some(_) => vec!["type"],
            None => Vec::new(),
        }
    }

    fn is_known(name: &str) -> bool {
        FileFormat::from_name(name).is_some() || FILTER_PLUGINS.contains(&name)
    }

    /// Absolute file of a mount; an empty `file` gets a default below `base_dir`.
    pub fn resolve_file(&self, prefix: &KeyName, spec: &BackendSpec) -> PathBuf {
        if spec.file.trim().is_empty() {
            let stem = sanitize_file_stem(&prefix.to_string());
            return self
                .base_dir
                .join(MOUNTS_DIR)
                .join(format!("{stem}.{}", spec.backend));
        }
        resolve_against(&self.base_dir, Path::new(&expand_env_vars(&spec.file)))
    }
}

fn unsupported(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, message)
}

impl BackendProvider for PluginRegistry {
    #[instrument(
        level = "debug",
        skip(self, spec),
        fields(backend = %spec.backend, file = %spec.file)
    )]
    fn prepare(&self, mut spec: BackendSpec) -> io::Result<BackendSpec> {
        if let Some(unknown) = spec.plugins.iter().find(|p| !Self::is_known(&p.name)) {
            return Err(unsupported(format!("unknown plugin '{}'", unknown.name)));
        }
        if !spec.resolver.starts_with(RESOLVER_PREFIX) {
            return Err(unsupported(format!("unknown resolver '{}'", spec.resolver)));
        }
        if spec.backend.is_empty() {
            spec.backend = spec
                .plugins
                .iter()
                .find_map(|p| FileFormat::from_name(&p.name))
                .or_else(|| FileFormat::from_path(Path::new(&spec.file)))
                .map(|f| f.name().to_string())
                .ok_or_else(|| {
                    unsupported(format!(
                        "no storage plugin for '{}': name one of toml, json",
                        spec.file
                    ))
                })?;
        } else if FileFormat::from_name(&spec.backend).is_none() {
            return Err(unsupported(format!("unknown backend '{}'", spec.backend)));
        }
        if spec.recommends {
            for plugin in self.recommended_plugins(&spec.backend) {
                if !spec.plugins.iter().any(|p| p.name == plugin) {
                    spec.plugins.push(PluginSpec::new(plugin));
                }
            }
        }
        Ok(spec)
    }

    fn open(&self, prefix: &KeyName, spec: &BackendSpec) -> io::Result<Box<dyn Backend>> {
        let format = FileFormat::from_name(&spec.backend)
            .ok_or_else(|| unsupported(format!("unknown backend '{}'", spec.backend)))?;
        Ok(Box::new(FileBackend::new(
            self.fs.clone(),
            self.resolve_file(prefix, spec),
            format,
            Some(prefix.clone()),
        )))
    }

    fn open_root(&self) -> io::Result<Box<dyn Backend>> {
        Ok(Box::new(FileBackend::new(
            self.fs.clone(),
            self.root_path(),
            self.root_format,
            None,
        )))
    }
}
