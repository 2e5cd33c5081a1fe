//! Reconcile requests: parsing and validation of the request document.
//!
//! Everything here runs before any store I/O; malformed input surfaces as a
//! validation error.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use serde_json::Value;

use crate::domain::{
    admin_root, BackendSpec, DomainError, DomainResult, KeyName, MergeStrategy, Mountpoint,
    PluginSpec, RemoveSpec, DEFAULT_RESOLVER,
};

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
struct RawRequest {
    mountpoint: Option<String>,
    mount: Vec<RawMount>,
    umount: Vec<String>,
    #[serde(alias = "filename")]
    file: Option<String>,
    backend: Option<String>,
    plugins: Vec<Value>,
    #[serde(alias = "includeRecommendedPlugins")]
    recommends: Option<bool>,
    resolver: Option<String>,
    preserve_keys: bool,
    keys: Value,
    remove: Vec<Value>,
    record: Option<RawRecord>,
    merge: Option<RawMerge>,
    #[serde(alias = "keeporder")]
    keep_order: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
struct RawMount {
    mountpoint: String,
    #[serde(alias = "filename")]
    file: Option<String>,
    backend: Option<String>,
    plugins: Vec<Value>,
    #[serde(alias = "includeRecommendedPlugins")]
    recommends: Option<bool>,
    resolver: Option<String>,
    preserve_keys: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
struct RawRecord {
    enable: Option<bool>,
    #[serde(alias = "clear")]
    reset: bool,
    parent_key: Option<String>,
    record_ansible: bool,
    skip: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawMerge {
    strategy: Option<String>,
    base: Value,
}

/// Recording changes requested for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordRequest {
    /// `Some(true)` enables, `Some(false)` disables, `None` leaves the state.
    pub enable: Option<bool>,
    pub reset: bool,
    pub scope: Option<KeyName>,
    /// Capture this invocation's own convergence writes.
    pub record_reconcile: bool,
    /// Leave the session alone and capture nothing for this invocation.
    pub skip: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeRequest {
    pub strategy: MergeStrategy,
    /// Explicit common ancestor in desired-state syntax.
    pub base: Option<Value>,
}

/// A validated reconcile request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileRequest {
    /// Base for relative key names.
    pub mountpoint: Option<KeyName>,
    pub mounts: Vec<Mountpoint>,
    pub umount: Vec<KeyName>,
    pub keys: Value,
    pub remove: Vec<RemoveSpec>,
    pub record: Option<RecordRequest>,
    pub merge: Option<MergeRequest>,
    /// `None` falls back to the configured default.
    pub keep_order: Option<bool>,
}

fn invalid(format_name: &str, e: impl std::fmt::Display) -> DomainError {
    DomainError::validation(format!("malformed {format_name} request: {e}"))
}

impl ReconcileRequest {
    pub fn from_json(input: &str) -> DomainResult<Self> {
        let raw: RawRequest = serde_json::from_str(input).map_err(|e| invalid("JSON", e))?;
        Self::from_raw(raw)
    }

    pub fn from_toml(input: &str) -> DomainResult<Self> {
        let raw: RawRequest = toml::from_str(input).map_err(|e| invalid("TOML", e))?;
        Self::from_raw(raw)
    }

    /// Request given as an already parsed document.
    pub fn from_value(input: Value) -> DomainResult<Self> {
        let raw: RawRequest = serde_json::from_value(input).map_err(|e| invalid("JSON", e))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawRequest) -> DomainResult<Self> {
        let mountpoint = raw
            .mountpoint
            .as_deref()
            .map(parse_mountpoint)
            .transpose()?;

        let mut mounts = raw
            .mount
            .into_iter()
            .map(|m| {
                let prefix = parse_mountpoint(&m.mountpoint)?;
                let spec = backend_spec(m.backend, m.file, m.plugins, m.recommends, m.resolver)?;
                Ok(Mountpoint {
                    prefix,
                    backend: spec,
                    preserve_keys: m.preserve_keys,
                })
            })
            .collect::<DomainResult<Vec<_>>>()?;

        let legacy_mount = raw.file.is_some() || raw.backend.is_some() || !raw.plugins.is_empty();
        if legacy_mount {
            let Some(prefix) = mountpoint.clone() else {
                return Err(DomainError::validation(
                    "'file', 'backend' and 'plugins' need a 'mountpoint'",
                ));
            };
            let spec = backend_spec(
                raw.backend,
                raw.file,
                raw.plugins,
                raw.recommends,
                raw.resolver,
            )?;
            mounts.insert(
                0,
                Mountpoint {
                    prefix,
                    backend: spec,
                    preserve_keys: raw.preserve_keys,
                },
            );
        }

        let mut seen = BTreeSet::new();
        for mount in &mounts {
            if !seen.insert(mount.prefix.clone()) {
                return Err(DomainError::validation(format!(
                    "mountpoint '{}' given more than once",
                    mount.prefix
                )));
            }
        }

        // a lone mount is the base for relative names
        let mountpoint = match mountpoint {
            Some(prefix) => Some(prefix),
            None if mounts.len() == 1 => Some(mounts[0].prefix.clone()),
            None => None,
        };

        let umount = raw
            .umount
            .iter()
            .map(|p| parse_mountpoint(p))
            .collect::<DomainResult<Vec<_>>>()?;
        if let Some(both) = umount.iter().find(|p| seen.contains(*p)) {
            return Err(DomainError::validation(format!(
                "'{both}' is both mounted and unmounted"
            )));
        }

        let remove = raw
            .remove
            .iter()
            .map(|entry| RemoveSpec::parse(entry, mountpoint.as_ref()))
            .collect::<DomainResult<Vec<_>>>()?;

        let record = raw
            .record
            .map(|r| {
                Ok::<_, DomainError>(RecordRequest {
                    enable: r.enable,
                    reset: r.reset,
                    scope: r
                        .parent_key
                        .as_deref()
                        .map(|k| KeyName::resolve(k, mountpoint.as_ref()))
                        .transpose()?,
                    record_reconcile: r.record_ansible,
                    skip: r.skip,
                })
            })
            .transpose()?;

        let merge = raw
            .merge
            .map(|m| {
                Ok::<_, DomainError>(MergeRequest {
                    strategy: match m.strategy {
                        Some(s) => s.parse()?,
                        None => MergeStrategy::default(),
                    },
                    base: (!m.base.is_null()).then_some(m.base),
                })
            })
            .transpose()?;

        Ok(Self {
            mountpoint,
            mounts,
            umount,
            keys: raw.keys,
            remove,
            record,
            merge,
            keep_order: raw.keep_order,
        })
    }
}

/// Absolute mountpoint outside the administrative subtree.
fn parse_mountpoint(raw: &str) -> DomainResult<KeyName> {
    let prefix = KeyName::resolve(raw, None).map_err(|e| match e {
        DomainError::Validation(message) if raw.trim().starts_with('/') => DomainError::Validation(
            format!("cascading mountpoints not supported: {message}"),
        ),
        other => other,
    })?;
    if prefix.is_below_or_same(&admin_root()) {
        return Err(DomainError::validation(format!(
            "cannot mount '{prefix}': reserved for the store's own bookkeeping"
        )));
    }
    Ok(prefix)
}

fn backend_spec(
    backend: Option<String>,
    file: Option<String>,
    plugins: Vec<Value>,
    recommends: Option<bool>,
    resolver: Option<String>,
) -> DomainResult<BackendSpec> {
    Ok(BackendSpec {
        backend: backend.unwrap_or_default(),
        file: file.unwrap_or_default(),
        resolver: resolver.unwrap_or_else(|| DEFAULT_RESOLVER.to_string()),
        plugins: plugins.iter().map(parse_plugin).collect::<DomainResult<_>>()?,
        recommends: recommends.unwrap_or(true),
    })
}

/// `"name"`, `{name: null}` or `{name: {option: value, ...}}`.
fn parse_plugin(entry: &Value) -> DomainResult<PluginSpec> {
    match entry {
        Value::String(name) => Ok(PluginSpec::new(name.as_str())),
        Value::Object(fields) if fields.len() == 1 => {
            let Some((name, options)) = fields.iter().next() else {
                return Err(DomainError::validation("empty plugin entry"));
            };
            let config = match options {
                Value::Null => BTreeMap::new(),
                Value::Object(options) => options
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), scalar(v, name)?)))
                    .collect::<DomainResult<_>>()?,
                other => {
                    return Err(DomainError::validation(format!(
                        "options of plugin '{name}' must be a mapping, found {other}"
                    )))
                }
            };
            Ok(PluginSpec {
                name: name.clone(),
                config,
            })
        }
        other => Err(DomainError::validation(format!(
            "malformed plugin entry: {other}"
        ))),
    }
}

fn scalar(value: &Value, plugin: &str) -> DomainResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Bool(_) | Value::Number(_) => Ok(value.to_string()),
        other => Err(DomainError::validation(format!(
            "option of plugin '{plugin}' must be a scalar, found {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn name(s: &str) -> KeyName {
        s.parse().unwrap()
    }

    #[test]
    fn given_legacy_single_mount_when_parsing_then_mount_at_mountpoint() {
        let request = ReconcileRequest::from_value(json!({
            "mountpoint": "system:/hosts",
            "filename": "/etc/hosts.toml",
            "plugins": [{"toml": {"delimiter": ":"}}, "sync"],
            "keys": {"ipv4": {"localhost": "127.0.0.1"}},
        }))
        .unwrap();

        assert_eq!(request.mounts.len(), 1);
        let mount = &request.mounts[0];
        assert_eq!(mount.prefix, name("system:/hosts"));
        assert_eq!(mount.backend.file, "/etc/hosts.toml");
        assert_eq!(mount.backend.plugins[0].config["delimiter"], ":");
        assert_eq!(mount.backend.plugins[1].name, "sync");
        assert!(mount.backend.recommends);
    }

    #[test]
    fn given_toml_request_when_parsing_then_same_as_json() {
        let toml = r#"
            mountpoint = "user:/app"
            keepOrder = true
            remove = ["old", { path = "user:/tmp", recursive = true }]

            [keys.server]
            port = "8080"

            [merge]
            strategy = "theirs"
        "#;

        let request = ReconcileRequest::from_toml(toml).unwrap();

        assert_eq!(request.keep_order, Some(true));
        assert_eq!(request.remove[0].path, name("user:/app/old"));
        assert!(request.remove[1].recursive);
        assert_eq!(request.merge.unwrap().strategy, MergeStrategy::Theirs);
        assert_eq!(request.keys, json!({"server": {"port": "8080"}}));
    }

    #[test]
    fn given_record_clear_alias_when_parsing_then_reset() {
        let request = ReconcileRequest::from_value(json!({
            "mountpoint": "user:/app",
            "record": {"enable": true, "clear": true, "parentKey": "sub", "recordAnsible": true},
        }))
        .unwrap();
        let record = request.record.unwrap();
        assert!(record.reset);
        assert_eq!(record.scope, Some(name("user:/app/sub")));
        assert!(record.record_reconcile);
    }

    #[rstest::rstest]
    #[case(json!({"mountpoint": "/hosts", "file": "h.toml"}))]
    #[case(json!({"mount": [{"mountpoint": "system:/elektra/x", "backend": "toml"}]}))]
    #[case(json!({"merge": {"strategy": "newest"}}))]
    #[case(json!({"file": "x.toml"}))]
    #[case(json!({"unknown": 1}))]
    #[case(json!({"mount": [{"mountpoint": "user:/a"}], "umount": ["user:/a"]}))]
    fn given_invalid_request_when_parsing_then_validation_error(#[case] input: Value) {
        assert!(matches!(
            ReconcileRequest::from_value(input),
            Err(DomainError::Validation(_))
        ));
    }
}
