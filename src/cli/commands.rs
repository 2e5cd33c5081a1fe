//! Command dispatch: turns parsed arguments into service calls.

use std::collections::BTreeMap;
use std::io::{self, Read};
use std::path::Path;

use clap::CommandFactory;
use termtree::Tree;
use tracing::{debug, instrument};

use crate::application::services::KeyFacts;
use crate::application::{ApplicationError, ReconcileRequest};
use crate::cli::args::{Cli, Commands, ConfigCommands, RequestFormat};
use crate::cli::error::{CliError, CliResult};
use crate::cli::output;
use crate::config::{global_config_path, Settings};
use crate::domain::{KeyName, Segment};
use crate::infrastructure::di::ServiceContainer;
use crate::infrastructure::InfraError;

/// Run the selected subcommand.
pub fn execute(cli: &Cli) -> CliResult<()> {
    let Some(command) = &cli.command else {
        return Err(CliError::Usage(
            "no command given, see `rsconf --help`".to_string(),
        ));
    };

    if let Commands::Completion { shell } = command {
        let mut cmd = Cli::command();
        let name = cmd.get_name().to_string();
        clap_complete::generate(*shell, &mut cmd, name, &mut io::stdout());
        return Ok(());
    }

    let settings = Settings::load(cli.config.as_deref())?;
    if let Commands::Config { command } = command {
        return config(command, &settings);
    }

    let container = ServiceContainer::new(settings);
    match command {
        Commands::Apply {
            request,
            format,
            json,
        } => apply(&container, request, *format, *json),
        Commands::Facts { prefix, tree, json } => facts(&container, prefix, *tree, *json),
        Commands::Set { key, value } => set(&container, key, value),
        Commands::Rm { key, recursive } => rm(&container, key, *recursive),
        Commands::Config { .. } | Commands::Completion { .. } => Ok(()),
    }
}

#[instrument(skip(container))]
fn apply(
    container: &ServiceContainer,
    path: &Path,
    format: Option<RequestFormat>,
    json: bool,
) -> CliResult<()> {
    let request = read_request(path, format)?;
    let outcome = container.reconciler().reconcile(&request)?;

    if json {
        let doc = serde_json::json!({
            "changed": outcome.changed,
            "message": outcome.message,
            "added": outcome.diff.added.keys().map(ToString::to_string).collect::<Vec<_>>(),
            "modified": outcome.diff.modified.keys().map(ToString::to_string).collect::<Vec<_>>(),
            "removed": outcome.diff.removed.keys().map(ToString::to_string).collect::<Vec<_>>(),
        });
        output::info(&to_json(&doc)?);
    } else if outcome.changed {
        output::success(&outcome.message);
        output::diff(&outcome.diff);
    } else {
        output::info(&outcome.message);
    }
    Ok(())
}

fn read_request(path: &Path, format: Option<RequestFormat>) -> CliResult<ReconcileRequest> {
    let stdin = path == Path::new("-");
    let input = if stdin {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| InfraError::io("read request from stdin", e))?;
        buf
    } else {
        std::fs::read_to_string(path)
            .map_err(|e| InfraError::io(format!("read request {}", path.display()), e))?
    };

    let format = match format {
        Some(format) => format,
        None if stdin => RequestFormat::Json,
        None => match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => RequestFormat::Toml,
            Some("json") => RequestFormat::Json,
            _ => {
                return Err(CliError::InvalidArgs(format!(
                    "cannot infer request format of {}, pass --format",
                    path.display()
                )))
            }
        },
    };
    debug!(?format, "parsing request");

    let request = match format {
        RequestFormat::Json => ReconcileRequest::from_json(&input),
        RequestFormat::Toml => ReconcileRequest::from_toml(&input),
    }?;
    Ok(request)
}

#[instrument(skip(container))]
fn facts(container: &ServiceContainer, prefix: &str, tree: bool, json: bool) -> CliResult<()> {
    let prefix = parse_key(prefix)?;
    let facts = container.store.facts(&prefix)?;

    if json {
        output::info(&to_json(&facts)?);
    } else if tree {
        output::info(&facts_tree(&prefix, &facts));
    } else {
        for (name, fact) in &facts {
            match &fact.value {
                Some(value) => output::info(&format!("{name} = {value}")),
                None => output::info(name),
            }
            for (meta, value) in &fact.meta {
                output::info(&format!("  {meta}: {value}"));
            }
        }
    }
    Ok(())
}

/// Render facts as a tree below `prefix`, implying missing intermediate nodes.
fn facts_tree(prefix: &KeyName, facts: &BTreeMap<String, KeyFacts>) -> Tree<String> {
    let names: BTreeMap<KeyName, &KeyFacts> = facts
        .iter()
        .filter_map(|(name, fact)| name.parse().ok().map(|name: KeyName| (name, fact)))
        .collect();

    fn label(name: &KeyName, text: String, names: &BTreeMap<KeyName, &KeyFacts>) -> String {
        match names.get(name).and_then(|f| f.value.as_deref()) {
            Some(value) => format!("{text} = {value}"),
            None => text,
        }
    }

    // descendants are contiguous after `node`, so only its own range is scanned
    fn build(node: &KeyName, names: &BTreeMap<KeyName, &KeyFacts>) -> Vec<Tree<String>> {
        let depth = node.depth() + 1;
        let mut children: Vec<KeyName> = names
            .range(node.clone()..)
            .map(|(n, _)| n)
            .take_while(|n| n.is_below_or_same(node))
            .filter(|n| n.is_below(node))
            .map(|n| n.truncate(depth))
            .collect();
        children.dedup();
        children
            .iter()
            .map(|child| {
                let text = child.base_name().map(Segment::to_string).unwrap_or_default();
                Tree::new(label(child, text, names)).with_leaves(build(child, names))
            })
            .collect()
    }

    Tree::new(label(prefix, prefix.to_string(), &names)).with_leaves(build(prefix, &names))
}

#[instrument(skip(container, value))]
fn set(container: &ServiceContainer, key: &str, value: &str) -> CliResult<()> {
    let name = parse_key(key)?;
    if container.store.set_key(&name, value)? {
        output::action("Set", &format!("{name} = {value}"));
    } else {
        output::info(&format!("{name} already {value}"));
    }
    Ok(())
}

#[instrument(skip(container))]
fn rm(container: &ServiceContainer, key: &str, recursive: bool) -> CliResult<()> {
    let name = parse_key(key)?;
    if container.store.remove_key(&name, recursive)? {
        output::action("Removed", &name);
    } else {
        output::info(&format!("{name} does not exist"));
    }
    Ok(())
}

fn config(command: &ConfigCommands, settings: &Settings) -> CliResult<()> {
    match command {
        ConfigCommands::Show => output::info(&settings.to_toml()?),
        ConfigCommands::Template => output::info(&Settings::template()),
        ConfigCommands::Path => {
            output::header("Config files");
            match global_config_path() {
                Some(path) => output::info(&format!("global: {}", path.display())),
                None => output::info("global: (no home directory)"),
            }
            output::header("Store");
            output::info(&format!("base dir:  {}", settings.base_dir.display()));
            output::info(&format!("root file: {}", settings.root_file().display()));
        }
    }
    Ok(())
}

fn parse_key(raw: &str) -> CliResult<KeyName> {
    raw.parse::<KeyName>()
        .map_err(|e| CliError::InvalidArgs(format!("'{raw}': {e}")))
}

fn to_json(value: &impl serde::Serialize) -> CliResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| {
        ApplicationError::OperationFailed {
            context: "render JSON".to_string(),
            source: Box::new(e),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> KeyName {
        s.parse().unwrap()
    }

    #[test]
    fn given_sparse_facts_when_rendering_tree_then_intermediate_nodes_implied() {
        let facts: BTreeMap<String, KeyFacts> = [
            ("user:/app/db/host", Some("localhost")),
            ("user:/app/port", Some("8080")),
        ]
        .into_iter()
        .map(|(n, v)| {
            (
                n.to_string(),
                KeyFacts {
                    value: v.map(str::to_string),
                    meta: BTreeMap::new(),
                },
            )
        })
        .collect();

        let rendered = facts_tree(&name("user:/app"), &facts).to_string();

        assert!(rendered.starts_with("user:/app\n"));
        assert!(rendered.contains("db\n"));
        assert!(rendered.contains("host = localhost"));
        assert!(rendered.contains("port = 8080"));
    }

    #[test]
    fn given_sibling_with_shared_prefix_when_rendering_tree_then_not_nested() {
        let facts: BTreeMap<String, KeyFacts> = ["user:/app/a", "user:/app/a/b", "user:/app/ab"]
            .into_iter()
            .map(|n| {
                let fact = KeyFacts {
                    value: Some("1".to_string()),
                    meta: BTreeMap::new(),
                };
                (n.to_string(), fact)
            })
            .collect();

        let rendered = facts_tree(&name("user:/app"), &facts).to_string();

        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 4, "{rendered}");
        assert!(lines[1].ends_with("a = 1"), "{rendered}");
        assert!(lines[2].contains("b = 1") && lines[2].starts_with('│'), "{rendered}");
        assert!(lines[3].ends_with("ab = 1") && lines[3].starts_with('└'), "{rendered}");
    }
}
