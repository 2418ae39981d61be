//! Event stream replay
//!
//! Documents are replayed in dependency order: a document is built only after
//! every document it imports. Documents without pending imports form a wave;
//! the documents of a wave are replayed in parallel on the rayon pool, each
//! worker holding the write lock while it builds its document.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::events::{BuildEvent, DocumentScript};
use super::{BuildError, BuildStats, ChainBuilder, Result};
use crate::chain::DUChain;
use crate::declaration::DeclarationFlags;
use crate::environment::{MacroEnvironmentFile, StandardEnvironmentManager, MACRO_ENVIRONMENT};
use crate::identifier::{Identifier, QualifiedIdentifier};
use crate::indexed::IndexedTopContext;
use crate::lock::DUChainWriteLocker;

/// How a set of documents is replayed.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Replay independent documents in parallel
    pub parallel: bool,
    /// Register replayed documents. Unregistered documents stay private to
    /// the replaying thread, so replay is sequential then.
    pub register: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            register: true,
        }
    }
}

/// One replayed document.
#[derive(Debug, Clone)]
pub struct ReplayedDocument {
    pub url: String,
    pub top: IndexedTopContext,
    pub stats: BuildStats,
}

/// Outcome of [`replay`], documents in replay order.
#[derive(Debug, Clone, Default)]
pub struct ReplaySummary {
    pub documents: Vec<ReplayedDocument>,
    pub waves: usize,
    pub elapsed_ms: u128,
}

impl ReplaySummary {
    pub fn top(&self, url: &str) -> Option<IndexedTopContext> {
        self.documents
            .iter()
            .rev()
            .find(|document| document.url == url)
            .map(|document| document.top)
    }

    /// Stats summed over all documents.
    pub fn totals(&self) -> BuildStats {
        self.documents
            .iter()
            .fold(BuildStats::default(), |mut totals, document| {
                totals.contexts += document.stats.contexts;
                totals.declarations += document.stats.declarations;
                totals.uses += document.stats.uses;
                totals.unresolved_uses += document.stats.unresolved_uses;
                totals.imports += document.stats.imports;
                totals
            })
    }
}

/// Replay `scripts` into `chain`.
///
/// Parallel replay needs the calling thread to hold no chain lock; a caller
/// already holding the write lock gets sequential replay on its own thread.
pub fn replay(
    chain: &DUChain,
    scripts: Vec<DocumentScript>,
    options: &ReplayOptions,
) -> Result<ReplaySummary> {
    let start = Instant::now();
    let holds_write = chain.lock().current_thread_has_write_lock();
    if !holds_write && chain.lock().current_thread_has_read_lock() {
        return Err(BuildError::WriteLockRequired);
    }

    if scripts.iter().any(DocumentScript::uses_environment) {
        let _write = DUChainWriteLocker::new(chain.lock());
        if !chain.has_parsing_environment_manager(MACRO_ENVIRONMENT) {
            debug!("Registering the macro environment manager for replay");
            chain.add_parsing_environment_manager(Box::new(StandardEnvironmentManager::new(
                MACRO_ENVIRONMENT,
            )))?;
        }
    }

    let waves = schedule(&scripts)?;
    let parallel = options.parallel && options.register && !holds_write;
    info!(
        "Replaying {} document(s) in {} wave(s){}",
        scripts.len(),
        waves.len(),
        if parallel { " in parallel" } else { "" }
    );

    let mut summary = ReplaySummary {
        waves: waves.len(),
        ..Default::default()
    };
    let mut known: HashMap<String, IndexedTopContext> = HashMap::new();
    for wave in waves {
        let results: Vec<Result<ReplayedDocument>> = if parallel {
            wave.par_iter()
                .map(|index| {
                    let _write = DUChainWriteLocker::new(chain.lock());
                    replay_document(chain, &scripts[*index], &known, true)
                })
                .collect()
        } else {
            let _write = DUChainWriteLocker::new(chain.lock());
            wave.iter()
                .map(|index| replay_document(chain, &scripts[*index], &known, options.register))
                .collect()
        };
        for result in results {
            let document = result?;
            known.insert(document.url.clone(), document.top);
            summary.documents.push(document);
        }
    }

    summary.elapsed_ms = start.elapsed().as_millis();
    let totals = summary.totals();
    info!(
        "Replayed {} document(s): {} contexts, {} declarations, {} uses ({} unresolved) in {}ms",
        summary.documents.len(),
        totals.contexts,
        totals.declarations,
        totals.uses,
        totals.unresolved_uses,
        summary.elapsed_ms
    );
    Ok(summary)
}

/// Replay one document. The calling thread must hold the write lock.
///
/// Imports are resolved against `known` (documents replayed earlier in the
/// same run) before the registry.
pub fn replay_document(
    chain: &DUChain,
    script: &DocumentScript,
    known: &HashMap<String, IndexedTopContext>,
    register: bool,
) -> Result<ReplayedDocument> {
    let mut builder = ChainBuilder::begin(chain, script.identified_file(), script.range)?;
    for event in &script.events {
        apply_event(&mut builder, script, event, known)?;
    }
    let stats = builder.stats();
    let top = if register {
        builder.finish()?
    } else {
        builder.finish_unregistered()?
    };
    Ok(ReplayedDocument {
        url: script.url.clone(),
        top,
        stats,
    })
}

fn apply_event(
    builder: &mut ChainBuilder<'_>,
    script: &DocumentScript,
    event: &BuildEvent,
    known: &HashMap<String, IndexedTopContext>,
) -> Result<()> {
    match event {
        BuildEvent::OpenContext {
            kind,
            range,
            scope,
            owned,
        } => {
            let scope = scope.as_deref().map(QualifiedIdentifier::parse);
            if *owned {
                let owner = builder
                    .last_declaration()
                    .ok_or(BuildError::NoDeclaration("open_context"))?;
                builder.open_internal_context(owner, *range, *kind, scope)?;
            } else {
                builder.open_context(*range, *kind, scope)?;
            }
        }
        BuildEvent::CloseContext => {
            builder.close_context()?;
        }
        BuildEvent::Declare {
            name,
            range,
            kind,
            type_name,
            default_type,
            access,
            definition,
            forward,
            type_alias,
            defines,
            comment,
        } => {
            let abstract_type = type_name
                .as_deref()
                .map(|spelled| builder.resolve_type(spelled, range.start));
            let declaration =
                builder.declare(Identifier::parse(name), *range, *kind, abstract_type)?;

            let mut flags = DeclarationFlags::empty();
            flags.set(DeclarationFlags::DEFINITION, *definition);
            flags.set(DeclarationFlags::FORWARD_DECLARATION, *forward);
            flags.set(DeclarationFlags::TYPE_ALIAS, *type_alias);
            if !flags.is_empty() {
                builder.set_flags(declaration, flags)?;
            }
            if let Some(spelled) = default_type {
                let default = builder.resolve_type(spelled, range.start);
                builder.set_template_parameter_default(declaration, default)?;
            }
            if let Some(access) = access {
                builder.set_access(declaration, *access)?;
            }
            if let Some(defines) = defines {
                let declared = QualifiedIdentifier::parse(defines);
                if builder.define(declaration, &declared)?.is_none() {
                    warn!("{}: no declaration {} to define", script.url, declared);
                }
            }
            if let Some(comment) = comment {
                builder.set_comment(declaration, comment.clone())?;
            }
        }
        BuildEvent::Use { name, range } => {
            builder.use_name(&QualifiedIdentifier::parse(name), *range)?;
        }
        BuildEvent::Import { document, position } => {
            let root = known
                .get(document)
                .and_then(|top| builder.chain().root_context(*top));
            match root {
                Some(root) => builder.import_context(root, *position)?,
                None => builder.import_document(document, *position)?,
            }
        }
        BuildEvent::UsingNamespace { name, position } => {
            let name = QualifiedIdentifier::parse(name);
            if builder.use_namespace(&name, *position)? == 0 {
                debug!("{}: namespace {} not found", script.url, name);
            }
        }
        BuildEvent::Environment { macros } => {
            let file = macros.iter().fold(
                MacroEnvironmentFile::new(script.identified_file()),
                |file, (name, value)| file.with_macro(name.clone(), value.clone()),
            );
            builder.set_environment_file(Arc::new(file))?;
        }
        BuildEvent::BeginDocument { .. } | BuildEvent::EndDocument => {
            return Err(BuildError::OutsideDocument(event.name()));
        }
    }
    Ok(())
}

/// Group scripts into waves such that every document comes after the
/// documents it imports. Imports of documents outside `scripts` are left to
/// the registry.
fn schedule(scripts: &[DocumentScript]) -> Result<Vec<Vec<usize>>> {
    let index_of: HashMap<&str, usize> = scripts
        .iter()
        .enumerate()
        .map(|(index, script)| (script.url.as_str(), index))
        .collect();

    let mut pending: Vec<BTreeSet<usize>> = scripts
        .iter()
        .enumerate()
        .map(|(index, script)| {
            script
                .imported_documents()
                .into_iter()
                .filter_map(|url| index_of.get(url).copied())
                .filter(|imported| *imported != index)
                .collect()
        })
        .collect();

    let mut done = vec![false; scripts.len()];
    let mut waves = Vec::new();
    while done.iter().any(|finished| !finished) {
        let wave: Vec<usize> = (0..scripts.len())
            .filter(|index| !done[*index] && pending[*index].is_empty())
            .collect();
        if wave.is_empty() {
            let cyclic = (0..scripts.len())
                .filter(|index| !done[*index])
                .map(|index| scripts[index].url.clone())
                .collect();
            return Err(BuildError::CyclicImports(cyclic));
        }
        for index in &wave {
            done[*index] = true;
        }
        for imports in &mut pending {
            for index in &wave {
                imports.remove(index);
            }
        }
        waves.push(wave);
    }
    Ok(waves)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::{SimpleCursor, SimpleRange};

    fn script(url: &str, imports: &[&str]) -> DocumentScript {
        DocumentScript {
            url: url.to_string(),
            identity: 0,
            range: SimpleRange::default(),
            events: imports
                .iter()
                .map(|document| BuildEvent::Import {
                    document: document.to_string(),
                    position: SimpleCursor::invalid(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_schedule_orders_by_imports() {
        let scripts = vec![
            script("main.cpp", &["b.h", "a.h"]),
            script("b.h", &["a.h"]),
            script("a.h", &[]),
            script("other.cpp", &["system.h"]),
        ];
        let waves = schedule(&scripts).unwrap();
        assert_eq!(waves, vec![vec![2, 3], vec![1], vec![0]]);
    }

    #[test]
    fn test_schedule_rejects_cycles() {
        let scripts = vec![script("a.h", &["b.h"]), script("b.h", &["a.h"])];
        match schedule(&scripts) {
            Err(BuildError::CyclicImports(urls)) => {
                assert_eq!(urls, vec!["a.h".to_string(), "b.h".to_string()])
            }
            other => panic!("expected a cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_import_is_ignored_by_schedule() {
        let scripts = vec![script("a.h", &["a.h"])];
        assert_eq!(schedule(&scripts).unwrap(), vec![vec![0]]);
    }

    #[test]
    fn test_summary_totals() {
        let stats = BuildStats {
            contexts: 1,
            declarations: 2,
            uses: 3,
            unresolved_uses: 1,
            imports: 0,
        };
        let summary = ReplaySummary {
            documents: vec![
                ReplayedDocument {
                    url: "a".into(),
                    top: crate::arena::Handle::new(0, 0),
                    stats,
                },
                ReplayedDocument {
                    url: "b".into(),
                    top: crate::arena::Handle::new(1, 0),
                    stats,
                },
            ],
            waves: 1,
            elapsed_ms: 0,
        };
        assert_eq!(summary.totals().declarations, 4);
        assert_eq!(summary.totals().unresolved_uses, 2);
        assert_eq!(summary.top("b"), Some(crate::arena::Handle::new(1, 0)));
    }
}
