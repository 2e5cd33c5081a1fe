//! Integration tests for Settings layered loading.
//!
//! These run without a global config, so an explicit file layers directly
//! over the compiled defaults.

use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;

use rsconf::application::ApplicationError;
use rsconf::config::Settings;
use rsconf::infrastructure::backends::FileFormat;

#[test]
fn given_config_file_when_load_then_overrides_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rsconf.toml");
    fs::write(
        &path,
        r#"
base_dir = "/srv/rsconf"
root_format = "json"
"#,
    )
    .unwrap();

    let settings = Settings::load(Some(&path)).expect("load settings");

    assert_eq!(settings.base_dir, PathBuf::from("/srv/rsconf"));
    assert_eq!(settings.root_format, FileFormat::Json);
    assert!(!settings.keep_order, "unspecified fields keep their default");
    assert_eq!(settings.root_file(), PathBuf::from("/srv/rsconf/default.json"));
}

#[test]
fn given_tilde_in_config_file_when_load_then_base_dir_expanded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rsconf.toml");
    fs::write(&path, "base_dir = \"~/conf-store\"\n").unwrap();

    let settings = Settings::load(Some(&path)).expect("load settings");

    let home = std::env::var("HOME").expect("HOME should be set");
    assert_eq!(settings.base_dir, PathBuf::from(home).join("conf-store"));
}

#[test]
fn given_unknown_root_format_when_load_then_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rsconf.toml");
    fs::write(&path, "root_format = \"yaml\"\n").unwrap();

    let err = Settings::load(Some(&path)).unwrap_err();

    assert!(matches!(err, ApplicationError::Config { .. }));
}

#[test]
fn given_unknown_field_when_load_then_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rsconf.toml");
    fs::write(&path, "editor = \"vim\"\n").unwrap();

    assert!(matches!(
        Settings::load(Some(&path)),
        Err(ApplicationError::Config { .. })
    ));
}

#[test]
fn given_missing_config_file_when_load_then_config_error() {
    let dir = TempDir::new().unwrap();
    let err = Settings::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
    assert!(err.to_string().contains("absent.toml"));
}

#[test]
fn given_settings_when_to_toml_then_round_trips() {
    let settings = Settings {
        base_dir: PathBuf::from("/srv/rsconf"),
        root_format: FileFormat::Json,
        keep_order: true,
    };

    let rendered = settings.to_toml().unwrap();
    let parsed: Settings = toml::from_str(&rendered).unwrap();

    assert_eq!(parsed, settings);
}
