//! Event stream replay tests for the DUChain.
//!
//! Streams are written to temporary files and replayed end to end:
//! - dependency waves and parallel replay
//! - lookup and use tracking across replayed documents
//! - diagnostic dumps of the result
//! - cyclic and unknown imports
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package duchain-core --test replay
//! ```

mod common;

use std::path::PathBuf;

use common::at;
use duchain_core::{
    dump_chain, dump_dot_graph, load_events, replay, split_documents, BuildError, DUChain,
    DUChainReadLocker, DocumentScript, QualifiedIdentifier, ReplayOptions, SimpleCursor,
    MACRO_ENVIRONMENT,
};
use tempfile::TempDir;

// ============================================================================
// Test Fixtures
// ============================================================================

const PROJECT: &str = r#"[
  {"event": "begin_document", "url": "vec.h",
   "range": {"start": {"line": 0, "column": 0}, "end": {"line": 20, "column": 0}}},
  {"event": "open_context", "kind": "namespace", "scope": "ns",
   "range": {"start": {"line": 1, "column": 0}, "end": {"line": 6, "column": 1}}},
  {"event": "declare", "name": "Vec", "kind": "type",
   "range": {"start": {"line": 2, "column": 6}, "end": {"line": 2, "column": 9}}},
  {"event": "open_context", "kind": "class", "scope": "Vec", "owned": true,
   "range": {"start": {"line": 2, "column": 10}, "end": {"line": 4, "column": 1}}},
  {"event": "declare", "name": "size", "type": "int",
   "range": {"start": {"line": 3, "column": 8}, "end": {"line": 3, "column": 12}}},
  {"event": "close_context"},
  {"event": "close_context"},
  {"event": "end_document"},

  {"event": "begin_document", "url": "main.cpp",
   "range": {"start": {"line": 0, "column": 0}, "end": {"line": 20, "column": 0}}},
  {"event": "import", "document": "vec.h"},
  {"event": "using_namespace", "name": "ns", "position": {"line": 2, "column": 0}},
  {"event": "declare", "name": "v", "type": "Vec",
   "range": {"start": {"line": 3, "column": 4}, "end": {"line": 3, "column": 5}}},
  {"event": "use", "name": "Vec::size",
   "range": {"start": {"line": 4, "column": 0}, "end": {"line": 4, "column": 9}}},
  {"event": "use", "name": "missing",
   "range": {"start": {"line": 5, "column": 0}, "end": {"line": 5, "column": 7}}},
  {"event": "end_document"},

  {"event": "begin_document", "url": "util.cpp",
   "range": {"start": {"line": 0, "column": 0}, "end": {"line": 20, "column": 0}}},
  {"event": "import", "document": "vec.h"},
  {"event": "declare", "name": "w", "type": "int",
   "range": {"start": {"line": 1, "column": 4}, "end": {"line": 1, "column": 5}}},
  {"event": "use", "name": "ns::Vec",
   "range": {"start": {"line": 2, "column": 0}, "end": {"line": 2, "column": 7}}},
  {"event": "end_document"}
]"#;

fn write_stream(dir: &TempDir, name: &str, text: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, text).unwrap();
    path
}

fn load_scripts(text: &str) -> Vec<DocumentScript> {
    let dir = tempfile::tempdir().unwrap();
    let path = write_stream(&dir, "events.json", text);
    split_documents(load_events(&path).unwrap()).unwrap()
}

fn document(url: &str, body: &str) -> String {
    format!(
        r#"{{"event": "begin_document", "url": "{}"}},{}{{"event": "end_document"}}"#,
        url, body
    )
}

// ============================================================================
// Replay
// ============================================================================

#[test]
fn test_replay_runs_in_dependency_waves() {
    let chain = DUChain::new();
    let summary = replay(&chain, load_scripts(PROJECT), &ReplayOptions::default()).unwrap();

    assert_eq!(summary.waves, 2);
    assert_eq!(summary.documents.len(), 3);
    assert_eq!(summary.documents[0].url, "vec.h");

    let totals = summary.totals();
    assert_eq!(totals.declarations, 4);
    assert_eq!(totals.uses, 3);
    assert_eq!(totals.unresolved_uses, 1);
    assert_eq!(totals.imports, 3);

    let _read = DUChainReadLocker::new(chain.lock());
    let mut documents = chain.documents();
    documents.sort();
    assert_eq!(documents, vec!["main.cpp", "util.cpp", "vec.h"]);
    for url in ["vec.h", "main.cpp", "util.cpp"] {
        assert_eq!(chain.chain_for_document(url), summary.top(url));
    }
    assert!(chain.self_analysis().is_empty());
}

#[test]
fn test_replayed_uses_resolve_across_documents() {
    let chain = DUChain::new();
    let summary = replay(&chain, load_scripts(PROJECT), &ReplayOptions::default()).unwrap();

    let _read = DUChainReadLocker::new(chain.lock());
    let header = chain.root_context(summary.top("vec.h").unwrap()).unwrap();
    let main = summary.top("main.cpp").unwrap();

    let size = chain.find_declarations(
        header,
        &QualifiedIdentifier::parse("ns::Vec::size"),
        SimpleCursor::invalid(),
    );
    assert_eq!(size.len(), 1);
    let id = chain.declaration_id(size[0]).unwrap();
    assert_eq!(chain.use_count(&id), 1);
    assert_eq!(chain.using_documents(&id), vec![main]);

    let main_root = chain.root_context(main).unwrap();
    let vec = QualifiedIdentifier::parse("Vec");
    assert!(chain.find_declarations(main_root, &vec, at(1, 0)).is_empty());
    assert_eq!(chain.find_declarations(main_root, &vec, at(3, 0)).len(), 1);
}

#[test]
fn test_sequential_replay_matches_parallel() {
    let parallel_chain = DUChain::new();
    let parallel = replay(
        &parallel_chain,
        load_scripts(PROJECT),
        &ReplayOptions::default(),
    )
    .unwrap();

    let sequential_chain = DUChain::new();
    let sequential = replay(
        &sequential_chain,
        load_scripts(PROJECT),
        &ReplayOptions {
            parallel: false,
            register: true,
        },
    )
    .unwrap();

    assert_eq!(parallel.waves, sequential.waves);
    assert_eq!(parallel.totals(), sequential.totals());
}

#[test]
fn test_unregistered_replay_stays_private() {
    let chain = DUChain::new();
    let summary = replay(
        &chain,
        load_scripts(PROJECT),
        &ReplayOptions {
            parallel: true,
            register: false,
        },
    )
    .unwrap();

    assert_eq!(summary.totals().unresolved_uses, 1);
    let _read = DUChainReadLocker::new(chain.lock());
    assert!(chain.chain_for_document("vec.h").is_none());
    assert!(chain.root_context(summary.top("main.cpp").unwrap()).is_some());
}

#[test]
fn test_environment_events_register_manager() {
    let stream = format!(
        "[{},{}]",
        r#"{"event": "begin_document", "url": "config.h", "identity": 1},
           {"event": "environment", "macros": {"DEBUG": "1"}},
           {"event": "end_document"}"#,
        r#"{"event": "begin_document", "url": "config.h", "identity": 2},
           {"event": "environment", "macros": {"DEBUG": null}},
           {"event": "end_document"}"#
    );
    let chain = DUChain::new();
    replay(&chain, load_scripts(&stream), &ReplayOptions::default()).unwrap();

    let _read = DUChainReadLocker::new(chain.lock());
    assert!(chain.has_parsing_environment_manager(MACRO_ENVIRONMENT));
    assert_eq!(chain.chains_for_document("config.h").len(), 2);
    assert_eq!(chain.environment_file_count(MACRO_ENVIRONMENT), Some(2));
}

// ============================================================================
// Dumps
// ============================================================================

#[test]
fn test_dumps_of_replayed_document() {
    let chain = DUChain::new();
    let summary = replay(&chain, load_scripts(PROJECT), &ReplayOptions::default()).unwrap();
    let main = summary.top("main.cpp").unwrap();

    let _read = DUChainReadLocker::new(chain.lock());
    let dump = dump_chain(&chain, main);
    assert!(dump.starts_with("top main.cpp [registered]"));
    assert!(dump.contains("import Global vec.h"));
    assert!(dump.contains("declaration v"));
    assert!(dump.contains("use [5:0, 5:7) -> <unresolved>"));

    let dot = dump_dot_graph(&chain, chain.root_context(main).unwrap());
    assert!(dot.contains("vec.h"));
    assert!(dot.contains("Namespace ns"));
    assert!(dot.contains("import"));
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_cyclic_imports_are_rejected() {
    let stream = format!(
        "[{},{}]",
        document("a.cpp", r#"{"event": "import", "document": "b.cpp"},"#),
        document("b.cpp", r#"{"event": "import", "document": "a.cpp"},"#)
    );
    let chain = DUChain::new();
    match replay(&chain, load_scripts(&stream), &ReplayOptions::default()) {
        Err(BuildError::CyclicImports(urls)) => assert_eq!(urls, vec!["a.cpp", "b.cpp"]),
        other => panic!("expected cyclic imports, got {:?}", other),
    }
}

#[test]
fn test_unknown_import_is_reported() {
    let stream = format!(
        "[{}]",
        document("lonely.cpp", r#"{"event": "import", "document": "nowhere.h"},"#)
    );
    let chain = DUChain::new();
    match replay(&chain, load_scripts(&stream), &ReplayOptions::default()) {
        Err(BuildError::UnknownDocument(url)) => assert_eq!(url, "nowhere.h"),
        other => panic!("expected an unknown document, got {:?}", other),
    }
}

#[test]
fn test_replay_under_read_lock_is_refused() {
    let chain = DUChain::new();
    let _read = DUChainReadLocker::new(chain.lock());
    let result = replay(&chain, load_scripts(PROJECT), &ReplayOptions::default());
    assert!(matches!(result, Err(BuildError::WriteLockRequired)));
}
