//! Change notification tests for the DUChain.
//!
//! Observers subscribe through the chain and receive structural changes:
//! - context, declaration, import and registration events
//! - bounded channels drop events for lagging observers
//! - removed observers stop receiving events
//! - draining from an async task
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package duchain-core --test observers
//! ```

mod common;

use common::{build_document, line, span, write_locked, DocumentFixture};
use duchain_core::{
    ChangeEvent, ChangeReceiver, ChangeSubject, ContextType, DUChain, DUChainWriteLocker,
    DeclarationKind, Identifier, Modification, Relationship, SimpleCursor,
};

// ============================================================================
// Test Helpers
// ============================================================================

fn drain(receiver: &mut ChangeReceiver) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

fn has_event(
    events: &[ChangeEvent],
    subject: ChangeSubject,
    modification: Modification,
    relationship: Relationship,
) -> bool {
    events.iter().any(|event| {
        event.subject == subject
            && event.modification == modification
            && event.relationship == relationship
    })
}

// ============================================================================
// Structural Events
// ============================================================================

#[test]
fn test_building_a_document_notifies() {
    let chain = DUChain::new();
    write_locked(&chain, || {
        let (_, mut receiver) = chain.add_observer(None).unwrap();

        let mut declared = None;
        let mut opened = None;
        let top = build_document(&chain, "events.cpp", |builder| {
            opened = Some(
                builder
                    .open_context(line(1), ContextType::Function, None)
                    .unwrap(),
            );
            declared = Some(
                builder
                    .declare(
                        Identifier::new("local"),
                        span(1, 4, 9),
                        DeclarationKind::Instance,
                        None,
                    )
                    .unwrap(),
            );
            builder.close_context().unwrap();
        });
        let root = chain.root_context(top).unwrap();
        let (opened, declared) = (opened.unwrap(), declared.unwrap());
        let events = drain(&mut receiver);

        let child = events
            .iter()
            .find(|event| event.relationship == Relationship::ChildContexts)
            .unwrap();
        assert_eq!(child.subject, ChangeSubject::Context(root));
        assert_eq!(child.related, Some(ChangeSubject::Context(opened)));

        let declaration = events
            .iter()
            .find(|event| event.relationship == Relationship::LocalDeclarations)
            .unwrap();
        assert_eq!(declaration.subject, ChangeSubject::Context(opened));
        assert_eq!(declaration.related, Some(ChangeSubject::Declaration(declared)));
        assert_eq!(declaration.modification, Modification::Addition);

        assert!(has_event(
            &events,
            ChangeSubject::Context(root),
            Modification::Addition,
            Relationship::Registration
        ));
    });
}

#[test]
fn test_import_events_cover_both_ends() {
    let chain = DUChain::new();
    write_locked(&chain, || {
        let header = DocumentFixture::int_i(&chain, "observed.h");
        let source = DocumentFixture::int_i(&chain, "observed.cpp");
        let (_, mut receiver) = chain.add_observer(None).unwrap();

        chain
            .add_imported_parent_context(source.root, header.root, SimpleCursor::invalid())
            .unwrap();
        chain
            .remove_imported_parent_context(source.root, header.root)
            .unwrap();
        let events = drain(&mut receiver);

        for modification in [Modification::Addition, Modification::Removal] {
            assert!(has_event(
                &events,
                ChangeSubject::Context(source.root),
                modification,
                Relationship::ImportedParentContexts
            ));
            assert!(has_event(
                &events,
                ChangeSubject::Context(header.root),
                modification,
                Relationship::ImportedChildContexts
            ));
        }
    });
}

#[test]
fn test_destroying_a_document_reports_deletion() {
    let chain = DUChain::new();
    write_locked(&chain, || {
        let fixture = DocumentFixture::int_i(&chain, "doomed.cpp");
        let (_, mut receiver) = chain.add_observer(None).unwrap();

        chain.destroy_top_context(fixture.top).unwrap();
        let events = drain(&mut receiver);

        assert!(has_event(
            &events,
            ChangeSubject::Context(fixture.root),
            Modification::Deletion,
            Relationship::Identity
        ));
    });
}

// ============================================================================
// Delivery
// ============================================================================

#[test]
fn test_lagging_observer_loses_events() {
    let chain = DUChain::new();
    write_locked(&chain, || {
        let (_, mut slow) = chain.add_observer(Some(1)).unwrap();
        let (_, mut fast) = chain.add_observer(Some(256)).unwrap();

        DocumentFixture::int_i(&chain, "burst.cpp");

        let fast_events = drain(&mut fast);
        let slow_events = drain(&mut slow);
        assert!(fast_events.len() > 1);
        assert_eq!(slow_events.len(), 1);
        assert_eq!(slow_events[0], fast_events[0]);
        assert!(chain.observers().dropped_count() >= (fast_events.len() - 1) as u64);
    });
}

#[test]
fn test_removed_observer_is_disconnected() {
    let chain = DUChain::new();
    write_locked(&chain, || {
        let (id, mut receiver) = chain.add_observer(None).unwrap();
        chain.remove_observer(id).unwrap();

        DocumentFixture::int_i(&chain, "silent.cpp");
        assert!(drain(&mut receiver).is_empty());
        assert_eq!(chain.observers().observer_count(), 0);
    });
}

#[tokio::test]
async fn test_observer_drained_from_task() {
    let chain = DUChain::new();
    let (id, mut receiver) = {
        let _write = DUChainWriteLocker::new(chain.lock());
        chain.add_observer(None).unwrap()
    };

    let collector = tokio::spawn(async move {
        let mut declarations = 0;
        while let Some(event) = receiver.recv().await {
            if event.relationship == Relationship::LocalDeclarations {
                declarations += 1;
            }
        }
        declarations
    });

    {
        let _write = DUChainWriteLocker::new(chain.lock());
        DocumentFixture::int_i(&chain, "first.cpp");
        DocumentFixture::int_i(&chain, "second.cpp");
        chain.remove_observer(id).unwrap();
    }

    assert_eq!(collector.await.unwrap(), 2);
}
