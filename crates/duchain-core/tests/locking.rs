//! Lock protocol tests for the DUChain.
//!
//! These tests drive one chain from several threads:
//! - readers run concurrently and see registered documents
//! - writers wait for readers and exclude each other
//! - unregistered documents stay private to the thread building them
//! - mutations without the write lock are refused
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package duchain-core --test locking
//! cargo test --package duchain-core --test locking --release
//! ```

mod common;

use common::{line, write_locked, DocumentFixture};
use duchain_core::{
    ChainBuilder, DUChain, DUChainError, DUChainReadLocker, DUChainWriteLocker, IdentifiedFile,
    QualifiedIdentifier, SimpleCursor,
};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Barrier;
use std::thread;
use std::time::Duration;

// ============================================================================
// Readers and Writers
// ============================================================================

#[test]
fn test_concurrent_lookups_under_read_lock() {
    let chain = DUChain::new();
    let fixture = write_locked(&chain, || DocumentFixture::int_i(&chain, "shared.cpp"));
    let i = QualifiedIdentifier::parse("i");

    let found: Vec<usize> = (0..64)
        .into_par_iter()
        .map(|_| {
            let _read = DUChainReadLocker::new(chain.lock());
            chain
                .find_declarations(fixture.root, &i, SimpleCursor::invalid())
                .len()
        })
        .collect();

    assert!(found.iter().all(|count| *count == 1));
    assert_eq!(chain.lock().reader_count(), 0);
}

#[test]
fn test_readers_overlap() {
    let chain = DUChain::new();
    write_locked(&chain, || DocumentFixture::int_i(&chain, "overlap.cpp"));
    let barrier = Barrier::new(4);

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                let _read = DUChainReadLocker::new(chain.lock());
                // Every reader must be inside the read section at once.
                barrier.wait();
                assert_eq!(chain.documents(), vec!["overlap.cpp".to_string()]);
            });
        }
    });
}

#[test]
fn test_writer_waits_for_reader() {
    let chain = DUChain::new();
    let wrote = AtomicBool::new(false);

    let read = DUChainReadLocker::new(chain.lock());
    thread::scope(|scope| {
        let writer = scope.spawn(|| {
            let _write = DUChainWriteLocker::new(chain.lock());
            chain
                .create_top_context(IdentifiedFile::from("late.cpp"), line(0))
                .unwrap();
            wrote.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!wrote.load(Ordering::SeqCst));
        drop(read);
        writer.join().unwrap();
    });

    assert!(wrote.load(Ordering::SeqCst));
    assert_eq!(chain.top_context_count(), 1);
}

#[test]
fn test_parallel_builders_serialize_on_write_lock() {
    let chain = DUChain::new();

    (0..8).into_par_iter().for_each(|index| {
        let _write = DUChainWriteLocker::new(chain.lock());
        let url = format!("parallel_{}.cpp", index);
        let builder = ChainBuilder::begin(&chain, IdentifiedFile::from(url.as_str()), line(0))
            .unwrap();
        builder.finish().unwrap();
    });

    let _read = DUChainReadLocker::new(chain.lock());
    assert_eq!(chain.documents().len(), 8);
    assert!(chain.self_analysis().is_empty());
}

// ============================================================================
// Document Privacy
// ============================================================================

#[test]
fn test_unregistered_document_is_private_to_its_builder() {
    let chain = DUChain::new();
    let top = write_locked(&chain, || {
        let builder =
            ChainBuilder::begin(&chain, IdentifiedFile::from("private.cpp"), line(0)).unwrap();
        let top = builder.finish_unregistered().unwrap();
        assert!(chain.with_top(top, |_| ()).is_some());
        top
    });

    let visible_elsewhere = |chain: &DUChain| {
        thread::scope(|scope| {
            scope
                .spawn(|| {
                    let _read = DUChainReadLocker::new(chain.lock());
                    chain.with_top(top, |_| ()).is_some()
                })
                .join()
                .unwrap()
        })
    };

    assert!(!visible_elsewhere(&chain));
    write_locked(&chain, || chain.add_document_chain(top).unwrap());
    assert!(visible_elsewhere(&chain));
}

// ============================================================================
// Misuse
// ============================================================================

#[test]
fn test_builder_refuses_without_write_lock() {
    let chain = DUChain::new();
    let _read = DUChainReadLocker::new(chain.lock());
    assert!(ChainBuilder::begin(&chain, IdentifiedFile::from("refused.cpp"), line(0)).is_err());
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "requires the DUChain write lock")]
fn test_mutation_without_write_lock_panics_in_debug() {
    let chain = DUChain::new();
    let _read = DUChainReadLocker::new(chain.lock());
    let _ = chain.create_top_context(IdentifiedFile::from("refused.cpp"), line(0));
}

#[test]
#[cfg(not(debug_assertions))]
fn test_mutation_without_write_lock_is_refused() {
    let chain = DUChain::new();
    let _read = DUChainReadLocker::new(chain.lock());
    let result = chain.create_top_context(IdentifiedFile::from("refused.cpp"), line(0));
    assert_eq!(
        result,
        Err(DUChainError::WriteLockRequired {
            operation: "create_top_context"
        })
    );
    assert_eq!(chain.top_context_count(), 0);
}
