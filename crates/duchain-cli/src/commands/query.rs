//! Query command - Look a name up in replayed documents
//!
//! Replays the given event streams, then resolves a (possibly qualified)
//! name as seen from a document, optionally at a position. Every
//! declaration found is printed with its definition and its uses across
//! all documents.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use duchain_core::{
    DUChain, DUChainReadLocker, IndexedDeclaration, QualifiedIdentifier, SimpleCursor,
};
use serde::Serialize;

use super::{
    chain_options, collect_event_files, load_config, load_scripts, replay_options,
    replay_scripts, resolve_workspace,
};
use crate::progress::{finish, spinner, Outcome};
use crate::GlobalOptions;

/// Arguments for the query command
#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Event files, or directories searched for `*.json` event files
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// URL of the document the lookup starts in
    #[arg(long, short = 'd')]
    document: String,

    /// Name to look up (e.g. "ns::Vec::size", "A<int>::m")
    #[arg(long, short = 'n')]
    name: String,

    /// Line of the lookup position (0-based)
    #[arg(long, requires = "column")]
    line: Option<i32>,

    /// Column of the lookup position (0-based)
    #[arg(long, requires = "line")]
    column: Option<i32>,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// One declaration found by the lookup
#[derive(Debug, Clone, Serialize)]
pub struct DeclarationReport {
    pub name: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    pub document: String,
    pub range: String,
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
    pub uses: Vec<UseReport>,
}

/// Uses of a declaration inside one document
#[derive(Debug, Clone, Serialize)]
pub struct UseReport {
    pub document: String,
    pub ranges: Vec<String>,
}

/// Execute the query command
pub async fn execute(args: QueryArgs, global: GlobalOptions) -> Result<()> {
    let workspace = resolve_workspace(&global)?;
    let config = load_config(&global, &workspace)?;

    let files = collect_event_files(&args.paths)?;
    let scripts = load_scripts(&files)?;
    let chain = Arc::new(DUChain::with_options(chain_options(&config)));

    // Queries run on this thread, so documents must be registered
    let mut options = replay_options(&config);
    options.register = true;

    let pb = spinner(
        &format!("Replaying {} document(s)...", scripts.len()),
        global.quiet,
    );
    let summary = match replay_scripts(Arc::clone(&chain), scripts, options).await {
        Ok(summary) => summary,
        Err(error) => {
            finish(pb, Outcome::Failed, "Replay failed");
            return Err(error);
        }
    };
    finish(
        pb,
        Outcome::Done,
        &format!("Replayed {} document(s)", summary.documents.len()),
    );

    let position = match (args.line, args.column) {
        (Some(line), Some(column)) => SimpleCursor::new(line, column),
        _ => SimpleCursor::invalid(),
    };
    let reports = lookup(&chain, &args.document, &args.name, position)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    if reports.is_empty() {
        println!("No declarations of '{}' visible in {}", args.name, args.document);
        return Ok(());
    }
    for report in &reports {
        print_report(report);
    }
    Ok(())
}

/// Resolve `name` in `document` at `position` (the whole document when
/// invalid).
pub fn lookup(
    chain: &DUChain,
    document: &str,
    name: &str,
    position: SimpleCursor,
) -> Result<Vec<DeclarationReport>> {
    let _read = DUChainReadLocker::new(chain.lock());
    let root = chain
        .chain_for_document(document)
        .and_then(|top| chain.root_context(top))
        .ok_or_else(|| anyhow::anyhow!("Document '{}' is not in the chain", document))?;

    let context = if position.is_valid() {
        chain.find_context_at(root, position)
    } else {
        root
    };
    let identifier = QualifiedIdentifier::parse(name);
    let found = chain.find_declarations(context, &identifier, position);

    Ok(found
        .into_iter()
        .filter_map(|declaration| report(chain, declaration))
        .collect())
}

fn url_of(chain: &DUChain, declaration: IndexedDeclaration) -> String {
    chain
        .with_top(declaration.top(), |top| top.url())
        .unwrap_or_else(|| "<destroyed>".to_string())
}

fn report(chain: &DUChain, declaration: IndexedDeclaration) -> Option<DeclarationReport> {
    let (name, kind, type_name, range) = chain.with_declaration(declaration, |current| {
        (
            current.qualified_identifier().to_string(),
            format!("{:?}", current.kind()),
            current.abstract_type().map(|ty| ty.to_string()),
            current.range().to_string(),
        )
    })?;
    let id = chain.declaration_id(declaration);

    let definition = chain.definition(declaration).and_then(|definition| {
        chain
            .with_declaration(definition, |current| current.range())
            .map(|range| format!("{} {}", url_of(chain, definition), range))
    });

    let uses = id
        .as_ref()
        .map(|id| {
            chain
                .uses_of(id)
                .into_iter()
                .map(|(top, ranges)| UseReport {
                    document: chain
                        .with_top(top, |top| top.url())
                        .unwrap_or_else(|| "<destroyed>".to_string()),
                    ranges: ranges.iter().map(ToString::to_string).collect(),
                })
                .collect()
        })
        .unwrap_or_default();

    Some(DeclarationReport {
        name,
        kind,
        type_name,
        document: url_of(chain, declaration),
        range,
        id: id.map(|id| id.to_string()),
        definition,
        uses,
    })
}

fn print_report(report: &DeclarationReport) {
    match report.type_name {
        Some(ref ty) => println!("{} : {} ({})", report.name, ty, report.kind),
        None => println!("{} ({})", report.name, report.kind),
    }
    println!("  declared   {} {}", report.document, report.range);
    if let Some(ref definition) = report.definition {
        println!("  defined    {}", definition);
    }
    if let Some(ref id) = report.id {
        println!("  id         {}", id);
    }
    if report.uses.is_empty() {
        println!("  no uses");
    }
    for uses in &report.uses {
        println!("  used in    {}: {}", uses.document, uses.ranges.join(", "));
    }
}
