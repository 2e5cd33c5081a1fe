//! Configuration management with layered loading
//!
//! Precedence (lowest to highest):
//! 1. Compiled defaults
//! 2. Global config: `$XDG_CONFIG_HOME/rsconf/rsconf.toml`
//! 3. Explicit config file (`--config`)
//! 4. Environment variables: `RSCONF_*` prefix

use std::path::{Path, PathBuf};
use std::str::FromStr;

use config::{Config, ConfigError, Environment};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::application::ApplicationError;
use crate::infrastructure::backends::FileFormat;
use crate::util::path::expand_env_vars;

/// Unified configuration for rsconf.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Directory holding the root backend file and default mount files (default: ~/.rsconf)
    pub base_dir: PathBuf,
    /// Format of the root backend file `base_dir/default.<format>`
    pub root_format: FileFormat,
    /// Default for requests that do not set `keepOrder`
    pub keep_order: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_dir: dirs_default_base_dir(),
            root_format: FileFormat::Toml,
            keep_order: false,
        }
    }
}

/// Raw settings for intermediate parsing: `None` means "not specified, inherit".
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct RawSettings {
    pub base_dir: Option<PathBuf>,
    pub root_format: Option<FileFormat>,
    pub keep_order: Option<bool>,
}

/// Get the default base directory (~/.rsconf).
fn dirs_default_base_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".rsconf"))
        .unwrap_or_else(|| PathBuf::from("~/.rsconf"))
}

/// Get the XDG config directory for rsconf.
pub fn global_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "rsconf").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the global config file.
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("rsconf.toml"))
}

/// Load a TOML file into RawSettings.
fn load_raw_settings(path: &Path) -> Result<RawSettings, ApplicationError> {
    let content = std::fs::read_to_string(path).map_err(|e| ApplicationError::Config {
        message: format!("read {}: {}", path.display(), e),
    })?;
    toml::from_str(&content).map_err(|e| ApplicationError::Config {
        message: format!("parse {}: {}", path.display(), e),
    })
}

impl Settings {
    /// Path of the root backend file.
    pub fn root_file(&self) -> PathBuf {
        self.base_dir
            .join(format!("default.{}", self.root_format.name()))
    }

    /// Expand shell variables and tilde in `base_dir`.
    fn expand_paths(&mut self) {
        let expanded = expand_env_vars(self.base_dir.to_string_lossy().as_ref());
        self.base_dir = PathBuf::from(expanded);
    }

    /// Overlay wins where it specifies a value.
    fn merge_with(&self, overlay: &RawSettings) -> Self {
        Self {
            base_dir: overlay
                .base_dir
                .clone()
                .unwrap_or_else(|| self.base_dir.clone()),
            root_format: overlay.root_format.unwrap_or(self.root_format),
            keep_order: overlay.keep_order.unwrap_or(self.keep_order),
        }
    }

    /// Load settings with layered precedence.
    ///
    /// An explicit `config_file` must exist; the global file is optional.
    pub fn load(config_file: Option<&Path>) -> Result<Self, ApplicationError> {
        let mut current = Self::default();

        if let Some(global_path) = global_config_path() {
            if global_path.exists() {
                debug!(path = %global_path.display(), "loading global config");
                current = current.merge_with(&load_raw_settings(&global_path)?);
            }
        }

        if let Some(path) = config_file {
            debug!(path = %path.display(), "loading config file");
            current = current.merge_with(&load_raw_settings(path)?);
        }

        current = Self::apply_env_overrides(current)?;
        current.expand_paths();

        Ok(current)
    }

    /// Apply RSCONF_* environment variables as explicit overrides.
    fn apply_env_overrides(mut settings: Self) -> Result<Self, ApplicationError> {
        let config = Config::builder()
            .add_source(
                Environment::with_prefix("RSCONF")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(config_err)?;

        if let Ok(val) = config.get_string("base_dir") {
            settings.base_dir = PathBuf::from(val);
        }
        if let Ok(val) = config.get_string("root_format") {
            settings.root_format =
                FileFormat::from_str(&val).map_err(|message| ApplicationError::Config {
                    message: format!("RSCONF_ROOT_FORMAT: {message}"),
                })?;
        }
        match config.get_bool("keep_order") {
            Ok(val) => settings.keep_order = val,
            Err(ConfigError::NotFound(_)) => {}
            Err(e) => return Err(config_err(e)),
        }

        Ok(settings)
    }

    /// Show the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ApplicationError> {
        toml::to_string_pretty(self).map_err(|e| ApplicationError::Config {
            message: format!("serialize config: {e}"),
        })
    }

    /// Generate a template config file.
    pub fn template() -> String {
        r#"# rsconf configuration
#
# Locations (by precedence, lowest to highest):
#   Global: ~/.config/rsconf/rsconf.toml
#   File:   rsconf --config <file>
#   Env:    RSCONF_* environment variables (e.g. RSCONF_BASE_DIR)

# Directory holding the root store file and default mount files
# base_dir = "~/.rsconf"

# Format of the root store file base_dir/default.<format>: "toml" or "json"
# root_format = "toml"

# Record array order in `order` metadata unless a request sets keepOrder
# keep_order = false
"#
        .to_string()
    }
}

fn config_err(e: ConfigError) -> ApplicationError {
    ApplicationError::Config {
        message: e.to_string(),
    }
}
