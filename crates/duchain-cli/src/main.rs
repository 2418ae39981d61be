//! DUChain CLI - Replay, query and check a definition-use chain
//!
//! A command-line front-end for the DUChain engine. Builder event streams
//! (JSON) are replayed into a chain, which can then be dumped or queried.
//!
//! # Usage
//!
//! ```bash
//! # Replay every event file below a directory and dump the result
//! duchain replay events/ --dump
//!
//! # Look a name up in a replayed document
//! duchain query events/ --document main.cpp --name ns::Vec::size
//!
//! # Run the randomized consistency checks
//! duchain stress --contexts 200 --cycles 50 --seed 7
//!
//! # Show the effective configuration
//! duchain config show
//! ```

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use duchain_config::{LogFormat, LogLevel, LoggingConfig, Visibility};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

mod commands;
mod progress;

/// DUChain - Semantic index of declarations, scopes and uses
#[derive(Parser, Debug)]
#[command(name = "duchain")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOptions,
}

/// Global options available to all commands
#[derive(Args, Debug, Clone)]
struct GlobalOptions {
    /// Workspace whose `.duchain/config.toml` is used
    #[arg(long, short = 'w', global = true, env = "DUCHAIN_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Path to configuration file (replaces global and workspace config)
    #[arg(long, short = 'c', global = true, env = "DUCHAIN_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// Visibility policy for name lookup (declared-before-use, class-members-visible)
    #[arg(long, global = true, env = "DUCHAIN_VISIBILITY", value_parser = parse_visibility)]
    visibility: Option<Visibility>,

    /// Replay documents one at a time
    #[arg(long, global = true)]
    sequential: bool,
}

fn parse_visibility(s: &str) -> Result<Visibility, String> {
    s.parse()
        .map_err(|e: duchain_config::ConfigError| e.to_string())
}

impl GlobalOptions {
    /// Convert global options to config overrides
    pub fn to_config_overrides(&self) -> duchain_config::ConfigOverrides {
        duchain_config::ConfigOverrides {
            workspace_root: self.workspace.clone(),
            visibility: self.visibility,
            parallel: self.sequential.then_some(false),
            ..Default::default()
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay builder event streams into a chain
    Replay(commands::replay::ReplayArgs),

    /// Replay event streams, then look a name up
    Query(commands::query::QueryArgs),

    /// Run the randomized import-structure and set-algebra checks
    Stress(commands::stress::StressArgs),

    /// View and initialise configuration
    #[command(subcommand)]
    Config(commands::config::ConfigCommand),
}

/// Install the stderr (or file) subscriber. `RUST_LOG` wins over the flags,
/// which win over the configured level.
fn init_logging(global: &GlobalOptions, logging: &LoggingConfig) -> Result<()> {
    let level = if global.quiet {
        LogLevel::Error
    } else if global.verbose {
        LogLevel::Debug.min(logging.level)
    } else {
        logging.level
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let writer = match logging.file {
        Some(ref path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };
    let ansi = logging.file.is_none();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi);
    let installed = match logging.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install logger: {}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A broken config file is reported by the command itself
    let logging = commands::resolve_workspace(&cli.global)
        .and_then(|workspace| commands::load_config(&cli.global, &workspace))
        .map(|config| config.logging)
        .unwrap_or_default();
    init_logging(&cli.global, &logging)?;

    match cli.command {
        Commands::Replay(args) => commands::replay::execute(args, cli.global).await,
        Commands::Query(args) => commands::query::execute(args, cli.global).await,
        Commands::Stress(args) => commands::stress::execute(args, cli.global).await,
        Commands::Config(cmd) => commands::config::execute(cmd, cli.global).await,
    }
}
