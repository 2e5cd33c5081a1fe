//! Path helpers shared by configuration and backend resolution.

use std::path::{Path, PathBuf};

/// Expand `~`, `$VAR` and `${VAR}` in a path-like string.
///
/// Unknown variables leave the input unchanged.
pub fn expand_env_vars(path: &str) -> String {
    shellexpand::full(path)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| path.to_string())
}

/// Resolve `path` against `base` unless it is already absolute.
pub fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Turn a key prefix into a file stem: every non-alphanumeric character becomes `_`.
pub fn sanitize_file_stem(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
