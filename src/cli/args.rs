//! CLI argument definitions using clap

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum, ValueHint};

/// Declarative reconciliation of hierarchical key-value configuration stores
#[derive(Parser, Debug)]
#[command(name = "rsconf")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Turn debugging information on (-d info, -dd debug, -ddd trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub debug: u8,

    /// Config file layered over the global config
    #[arg(short, long, global = true, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile the store with a request document
    Apply {
        /// Request file (.json or .toml), or `-` for stdin
        #[arg(value_hint = ValueHint::FilePath)]
        request: PathBuf,

        /// Request format; inferred from the file extension when omitted
        #[arg(short, long, value_enum)]
        format: Option<RequestFormat>,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show every key at or below a prefix
    Facts {
        /// Key prefix, e.g. `user:/app`
        prefix: String,

        /// Render as a tree
        #[arg(short, long, conflicts_with = "json")]
        tree: bool,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Set a single key's value
    Set {
        /// Absolute key name
        key: String,
        value: String,
    },

    /// Remove a key
    Rm {
        /// Absolute key name
        key: String,

        /// Remove the whole subtree
        #[arg(short, long)]
        recursive: bool,
    },

    /// Manage settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completions
    Completion {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show effective configuration
    Show,

    /// Print a commented config template
    Template,

    /// Show config and store file locations
    Path,
}

/// Request document format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestFormat {
    Json,
    Toml,
}
