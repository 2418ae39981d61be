//! Config command - View and initialise configuration
//!
//! - `show` prints the effective configuration and the files it came from
//! - `init` writes a default config file for the workspace or the user

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use duchain_config::{ConfigLoader, ConfigSource, DuchainConfig};
use serde::Serialize;

use super::{load_config, resolve_workspace};
use crate::GlobalOptions;

/// Config management commands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show(ShowArgs),

    /// Create a default configuration file
    Init(InitArgs),
}

#[derive(clap::Args, Debug)]
pub struct ShowArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(clap::Args, Debug)]
pub struct InitArgs {
    /// Create ~/.duchain/config.toml instead of the workspace's
    #[arg(long)]
    global: bool,
}

/// One file layer of the effective configuration
#[derive(Debug, Clone, Serialize)]
struct Layer {
    kind: &'static str,
    path: PathBuf,
}

impl From<&ConfigSource> for Layer {
    fn from(source: &ConfigSource) -> Self {
        let kind = match source {
            ConfigSource::Global(_) => "global",
            ConfigSource::Local(_) => "workspace",
            ConfigSource::File(_) => "file",
        };
        Self {
            kind,
            path: source.path().to_path_buf(),
        }
    }
}

#[derive(Serialize)]
struct Shown<'a> {
    layers: Vec<Layer>,
    config: &'a DuchainConfig,
}

/// Execute the config command
pub async fn execute(cmd: ConfigCommand, global: GlobalOptions) -> Result<()> {
    match cmd {
        ConfigCommand::Show(args) => execute_show(args, global),
        ConfigCommand::Init(args) => execute_init(args, global),
    }
}

fn layers(global: &GlobalOptions, workspace: &std::path::Path) -> Vec<Layer> {
    let sources = match global.config {
        Some(ref path) => vec![ConfigSource::File(path.clone())],
        None => ConfigLoader::new().sources(workspace),
    };
    sources.iter().map(Layer::from).collect()
}

fn execute_show(args: ShowArgs, global: GlobalOptions) -> Result<()> {
    let workspace = resolve_workspace(&global)?;
    let config = load_config(&global, &workspace)?;
    let layers = layers(&global, &workspace);

    if args.json {
        let shown = Shown {
            layers,
            config: &config,
        };
        println!("{}", serde_json::to_string_pretty(&shown)?);
        return Ok(());
    }

    println!("Configuration Layers");
    println!("====================\n");
    if layers.is_empty() {
        println!("(built-in defaults only)");
    }
    for layer in &layers {
        println!("{:<10} {}", layer.kind, layer.path.display());
    }

    println!("\nEffective Configuration");
    println!("=======================\n");
    print!(
        "{}",
        toml::to_string_pretty(&config).context("Failed to render configuration")?
    );
    Ok(())
}

fn execute_init(args: InitArgs, global: GlobalOptions) -> Result<()> {
    let loader = ConfigLoader::new();
    let path = if args.global {
        loader
            .init_global()
            .context("Failed to initialise global configuration")?
    } else {
        let workspace = resolve_workspace(&global)?;
        loader
            .init_local(&workspace)
            .context("Failed to initialise workspace configuration")?
    };
    println!("Configuration at {}", path.display());
    Ok(())
}
