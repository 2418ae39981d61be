//! Replay command - Build a chain from builder event streams
//!
//! Replays every event file given, prints a summary and optionally:
//! - an outline of each replayed document (`--dump`)
//! - a Graphviz rendering of one document (`--dot`)
//! - counts of the change notifications raised while replaying (`--watch`)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use duchain_core::{
    dump_chain, dump_dot_graph, DUChain, DUChainReadLocker, DUChainWriteLocker, ReplaySummary,
};
use tokio::task::JoinHandle;
use tracing::info;

use super::{
    chain_options, collect_event_files, load_config, load_scripts, print_info, replay_options,
    replay_scripts, resolve_workspace,
};
use crate::progress::{finish, spinner, Outcome};
use crate::GlobalOptions;

/// Arguments for the replay command
#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Event files, or directories searched for `*.json` event files
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Print an outline of every replayed document
    #[arg(long)]
    dump: bool,

    /// Write a Graphviz rendering of one document to FILE
    #[arg(long, value_name = "FILE")]
    dot: Option<PathBuf>,

    /// Document rendered by --dot (default: the last one replayed)
    #[arg(long, value_name = "URL", requires = "dot")]
    dot_document: Option<String>,

    /// Report the change notifications raised while replaying
    #[arg(long)]
    watch: bool,
}

/// Execute the replay command
pub async fn execute(args: ReplayArgs, global: GlobalOptions) -> Result<()> {
    let workspace = resolve_workspace(&global)?;
    let config = load_config(&global, &workspace)?;

    if !config.replay.register && (args.dump || args.dot.is_some()) {
        anyhow::bail!("--dump and --dot need registered documents (replay.register is false)");
    }

    let files = collect_event_files(&args.paths)?;
    let scripts = load_scripts(&files)?;
    let chain = Arc::new(DUChain::with_options(chain_options(&config)));

    let watcher = if args.watch {
        Some(watch(&chain)?)
    } else {
        None
    };

    let pb = spinner(
        &format!(
            "Replaying {} document(s) from {} file(s)...",
            scripts.len(),
            files.len()
        ),
        global.quiet,
    );
    let summary = match replay_scripts(Arc::clone(&chain), scripts, replay_options(&config)).await {
        Ok(summary) => summary,
        Err(error) => {
            finish(pb, Outcome::Failed, "Replay failed");
            return Err(error);
        }
    };
    let totals = summary.totals();
    let message = format!(
        "Replayed {} document(s) in {} wave(s), {}ms",
        summary.documents.len(),
        summary.waves,
        summary.elapsed_ms
    );
    if totals.unresolved_uses > 0 {
        finish(
            pb,
            Outcome::Warning,
            &format!("{} ({} unresolved use(s))", message, totals.unresolved_uses),
        );
    } else {
        finish(pb, Outcome::Done, &message);
    }

    println!("Documents:     {}", summary.documents.len());
    println!("Contexts:      {}", totals.contexts);
    println!("Declarations:  {}", totals.declarations);
    println!(
        "Uses:          {} ({} unresolved)",
        totals.uses, totals.unresolved_uses
    );
    println!("Imports:       {}", totals.imports);

    if let Some((observer, task)) = watcher {
        {
            let _write = DUChainWriteLocker::new(chain.lock());
            chain
                .remove_observer(observer)
                .context("Failed to remove observer")?;
        }
        let counts = task.await.context("Observer task failed")?;
        println!("\nNotifications");
        for (relationship, count) in &counts {
            println!("  {:<24} {}", relationship, count);
        }
        println!("  {:<24} {}", "dropped", chain.observers().dropped_count());
    }

    if args.dump {
        let _read = DUChainReadLocker::new(chain.lock());
        for document in &summary.documents {
            println!();
            print!("{}", dump_chain(&chain, document.top));
        }
    }

    if let Some(ref path) = args.dot {
        write_dot(&chain, &summary, args.dot_document.as_deref(), path)?;
        print_info(&format!("Wrote {}", path.display()), global.quiet);
    }

    Ok(())
}

/// Subscribe to the chain and count notifications per relationship until
/// the observer is removed.
fn watch(
    chain: &DUChain,
) -> Result<(duchain_core::ObserverId, JoinHandle<BTreeMap<String, usize>>)> {
    let (observer, mut receiver) = {
        let _write = DUChainWriteLocker::new(chain.lock());
        chain.add_observer(None).context("Failed to add observer")?
    };

    let task = tokio::spawn(async move {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        while let Some(event) = receiver.recv().await {
            let key = format!("{:?} {:?}", event.modification, event.relationship);
            *counts.entry(key).or_default() += 1;
        }
        counts
    });
    Ok((observer, task))
}

fn write_dot(
    chain: &DUChain,
    summary: &ReplaySummary,
    document: Option<&str>,
    path: &Path,
) -> Result<()> {
    let top = match document {
        Some(url) => summary
            .top(url)
            .ok_or_else(|| anyhow::anyhow!("Document '{}' was not replayed", url))?,
        None => summary
            .documents
            .last()
            .map(|document| document.top)
            .ok_or_else(|| anyhow::anyhow!("No documents were replayed"))?,
    };

    let dot = {
        let _read = DUChainReadLocker::new(chain.lock());
        let root = chain
            .root_context(top)
            .ok_or_else(|| anyhow::anyhow!("Replayed document is not accessible"))?;
        dump_dot_graph(chain, root)
    };
    info!("Writing dot graph to {}", path.display());
    std::fs::write(path, dot).with_context(|| format!("Failed to write {}", path.display()))
}
