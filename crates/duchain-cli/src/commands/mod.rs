//! CLI command implementations
//!
//! This module contains all DUChain CLI command implementations and the
//! plumbing they share: configuration, event file discovery and replay.

pub mod config;
pub mod query;
pub mod replay;
pub mod stress;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use duchain_config::{ConfigLoader, DuchainConfig, Visibility};
use duchain_core::{
    load_events, replay, split_documents, ChainOptions, DUChain, DocumentScript, ReplayOptions,
    ReplaySummary, VisibilityMode,
};
use tracing::debug;
use walkdir::WalkDir;

use crate::GlobalOptions;

/// Resolve the workspace path from options or current directory.
pub fn resolve_workspace(global: &GlobalOptions) -> Result<PathBuf> {
    match global.workspace {
        Some(ref path) => {
            if !path.is_dir() {
                anyhow::bail!("Workspace '{}' is not a directory", path.display());
            }
            path.canonicalize()
                .with_context(|| format!("Failed to resolve workspace {}", path.display()))
        }
        None => std::env::current_dir().context("Failed to get current directory"),
    }
}

/// Load configuration with CLI overrides applied.
pub fn load_config(global: &GlobalOptions, workspace: &Path) -> Result<DuchainConfig> {
    let mut loader = ConfigLoader::new();
    let overrides = global.to_config_overrides();

    if let Some(ref config_path) = global.config {
        return loader
            .load_file(config_path, Some(&overrides))
            .with_context(|| format!("Failed to load config file {}", config_path.display()));
    }

    loader
        .load(workspace, Some(&overrides))
        .context("Failed to load configuration")
}

/// Chain tuning taken from the configuration.
pub fn chain_options(config: &DuchainConfig) -> ChainOptions {
    ChainOptions {
        visibility: match config.chain.visibility {
            Visibility::DeclaredBeforeUse => VisibilityMode::DeclaredBeforeUse,
            Visibility::ClassMembersVisible => VisibilityMode::ClassMembersVisible,
        },
        import_cache_capacity: config.chain.import_cache_capacity,
        observer_capacity: config.observers.capacity,
        set_prune_interval: config.sets.prune_interval,
    }
}

pub fn replay_options(config: &DuchainConfig) -> ReplayOptions {
    ReplayOptions {
        parallel: config.replay.parallel,
        register: config.replay.register,
    }
}

/// Event files named by `paths`. Directories are walked for `*.json`
/// files; files are taken as given. The result is sorted and deduplicated.
pub fn collect_event_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path).follow_links(true) {
                let entry =
                    entry.with_context(|| format!("Failed to walk {}", path.display()))?;
                let is_json = entry.path().extension().is_some_and(|ext| ext == "json");
                if entry.file_type().is_file() && is_json {
                    files.push(entry.into_path());
                }
            }
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            anyhow::bail!("No such file or directory: {}", path.display());
        }
    }
    files.sort();
    files.dedup();

    if files.is_empty() {
        anyhow::bail!("No event files found");
    }
    Ok(files)
}

/// Decode every event file into document scripts, in file order.
pub fn load_scripts(files: &[PathBuf]) -> Result<Vec<DocumentScript>> {
    let mut scripts = Vec::new();
    for file in files {
        let events =
            load_events(file).with_context(|| format!("Failed to load {}", file.display()))?;
        let documents = split_documents(events)
            .with_context(|| format!("Malformed event stream in {}", file.display()))?;
        debug!("{}: {} document(s)", file.display(), documents.len());
        scripts.extend(documents);
    }
    Ok(scripts)
}

/// Replay `scripts` on a blocking thread; the caller must hold no chain lock.
pub async fn replay_scripts(
    chain: Arc<DUChain>,
    scripts: Vec<DocumentScript>,
    options: ReplayOptions,
) -> Result<ReplaySummary> {
    tokio::task::spawn_blocking(move || replay(&chain, scripts, &options))
        .await
        .context("Replay task failed")?
        .context("Replay failed")
}

/// Print an info message (respects quiet flag).
pub fn print_info(message: &str, quiet: bool) {
    if !quiet {
        eprintln!("{}", message);
    }
}
