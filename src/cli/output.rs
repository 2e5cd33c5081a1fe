//! Terminal output formatting with colors
//!
//! Respects NO_COLOR, CLICOLOR, CLICOLOR_FORCE automatically.

use colored::Colorize;

use crate::domain::{Diff, Key};

/// Print error (red bold "error:" prefix) to stderr
pub fn error(msg: &(impl std::fmt::Display + ?Sized)) {
    eprintln!("{}: {}", "error".red().bold(), msg);
}

/// Print success status (green checkmark)
pub fn success(msg: &(impl std::fmt::Display + ?Sized)) {
    println!("{} {}", "✓".green(), msg);
}

/// Print completed action (green label)
pub fn action(label: &str, msg: &(impl std::fmt::Display + ?Sized)) {
    println!("{}: {}", label.green(), msg);
}

/// Print section header (cyan bold)
pub fn header(msg: &(impl std::fmt::Display + ?Sized)) {
    println!("{}", msg.to_string().cyan().bold());
}

/// Print diff addition (green +)
pub fn diff_add(msg: &(impl std::fmt::Display + ?Sized)) {
    println!("  {} {}", "+".green(), msg);
}

/// Print diff modification (yellow ~)
pub fn diff_modify(msg: &(impl std::fmt::Display + ?Sized)) {
    println!("  {} {}", "~".yellow(), msg);
}

/// Print diff removal (red -)
pub fn diff_remove(msg: &(impl std::fmt::Display + ?Sized)) {
    println!("  {} {}", "-".red(), msg);
}

/// Print plain output (no color, for data)
pub fn info(msg: &(impl std::fmt::Display + ?Sized)) {
    println!("{}", msg);
}

/// `name = value`, or the bare name for a key without value.
pub fn key_line(name: &(impl std::fmt::Display + ?Sized), key: &Key) -> String {
    match key.value() {
        Some(value) => format!("{name} = {value}"),
        None => name.to_string(),
    }
}

/// Print every change of a diff, additions, modifications and removals in path order.
pub fn diff(diff: &Diff) {
    for name in diff.names() {
        if let Some(key) = diff.added.get(name) {
            diff_add(&key_line(name, key));
        } else if let Some((old, new)) = diff.modified.get(name) {
            let old = old.value().unwrap_or("");
            diff_modify(&format!("{} ({old} -> {})", name, new.value().unwrap_or("")));
        } else if let Some(key) = diff.removed.get(name) {
            diff_remove(&key_line(name, key));
        }
    }
}
