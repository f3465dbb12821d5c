//! Command-line interface for confmap
//!
//! Thin glue over the store: argument parsing, location overrides, and the
//! editor launcher. All persistence semantics live in [`crate::store`].

use crate::resolve;
use crate::store::{ConfigMap, ConfigStore, Format, PersistenceOptions, StoreLocation};
use crate::Result;
use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use std::env;
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

/// confmap command-line interface
#[derive(Parser)]
#[command(name = "confmap")]
#[command(about = "Persistent key=value configuration store for command-line programs")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct ConfmapCli {
    /// Configuration directory (defaults to the platform configuration
    /// directory for --name)
    #[arg(short, long, global = true)]
    pub dir: Option<PathBuf>,

    /// Configuration file name
    #[arg(short, long, global = true)]
    pub file: Option<String>,

    /// Program name used to resolve the default directory
    #[arg(short, long, global = true)]
    pub name: Option<String>,

    /// Use the line-oriented key=value format instead of the JSON document
    #[arg(long, global = true)]
    pub lines: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Print the value stored under a key
    Get {
        /// Key to look up
        key: String,
    },

    /// Store a value under a key and save
    Set {
        /// Key to store under
        key: String,

        /// Value to store
        value: String,

        /// Overwrite even if another process saved a newer document
        #[arg(long)]
        force: bool,
    },

    /// Remove a key and save
    Delete {
        /// Key to remove
        key: String,
    },

    /// List all stored keys
    Keys,

    /// Print the path of the backing file
    Path,

    /// Print the serialized store
    Dump,

    /// Reset the store to an empty persisted document
    Init,

    /// Open the backing file in the configured editor
    Edit,
}

/// Executes a parsed command line against a store built from its global
/// options.
pub fn run(cli: ConfmapCli) -> Result<()> {
    let store = build_store(&cli);

    store
        .load()
        .with_context(|| format!("failed to load {}", store.path().display()))?;
    debug!(path = %store.path().display(), "store ready");

    match cli.command {
        Commands::Get { key } => {
            let value = store.get(&key);
            if !value.is_empty() {
                println!("{}", value);
            }
        }

        Commands::Set { key, value, force } => {
            store.set(&key, &value);
            let result = if force {
                store.force_save()
            } else {
                store.save()
            };
            match result {
                Err(err) if err.is_stale_write() => {
                    bail!("{} (rerun to retry against the newer document, or pass --force to overwrite it)", err);
                }
                other => other?,
            }
        }

        Commands::Delete { key } => {
            store.delete(&key);
            store.save()?;
        }

        Commands::Keys => {
            for key in store.keys() {
                println!("{}", key);
            }
        }

        Commands::Path => {
            println!("{}", store.path().display());
        }

        Commands::Dump => {
            print!("{}", store.serialize()?);
            if store.format() == Format::Document {
                println!();
            }
        }

        Commands::Init => {
            store.init()?;
        }

        Commands::Edit => {
            edit(&store)?;
        }
    }

    Ok(())
}

fn build_store(cli: &ConfmapCli) -> ConfigMap {
    let name = cli
        .name
        .clone()
        .unwrap_or_else(resolve::executable_name);

    let dir = cli
        .dir
        .clone()
        .unwrap_or_else(|| resolve::resolve_config_dir(&name));

    let format = if cli.lines {
        Format::Line
    } else {
        Format::Document
    };

    let file = cli.file.clone().unwrap_or_else(|| {
        match format {
            Format::Document => "config.json".to_string(),
            Format::Line => "values".to_string(),
        }
    });

    ConfigMap::with_options(
        StoreLocation::new(dir, file),
        format,
        PersistenceOptions::default(),
    )
}

/// Launches an editor on the backing file. The editor is taken from the
/// store's own EDITOR key first, then the EDITOR and VISUAL environment
/// variables.
fn edit(store: &ConfigMap) -> Result<()> {
    let editor = find_editor(store).ok_or_else(|| anyhow!("unable to determine editor"))?;

    let status = Command::new(&editor)
        .arg(store.path())
        .status()
        .with_context(|| format!("failed to launch editor {}", editor))?;

    if !status.success() {
        bail!("editor {} exited with {}", editor, status);
    }
    Ok(())
}

fn find_editor(store: &ConfigMap) -> Option<String> {
    let from_store = store.get("EDITOR");
    if !from_store.is_empty() {
        return Some(from_store);
    }

    env::var("EDITOR")
        .ok()
        .filter(|editor| !editor.is_empty())
        .or_else(|| env::var("VISUAL").ok().filter(|editor| !editor.is_empty()))
}
