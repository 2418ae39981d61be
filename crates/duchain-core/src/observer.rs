//! Change notifications
//!
//! Structural changes are published as [`ChangeEvent`] values. Each observer
//! owns the receiving half of a bounded `tokio::sync::mpsc` channel and
//! drains it at its own pace, from a task or a plain thread via
//! `blocking_recv`.
//!
//! Delivery never blocks the chain: a full channel drops the event and
//! counts it, a closed channel unsubscribes its observer. Dispatch itself is
//! serialized by a mutex separate from the chain lock, so events of one batch
//! reach every observer contiguously and in order.

use crate::indexed::{IndexedContext, IndexedDeclaration};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Kind of a structural change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Modification {
    Addition,
    Removal,
    Change,
    Deletion,
}

/// Which relation of the subject changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Relationship {
    Identity,
    ParentContext,
    ChildContexts,
    ImportedParentContexts,
    ImportedChildContexts,
    LocalDeclarations,
    Uses,
    Type,
    InternalContext,
    Definition,
    Specializations,
    Instantiations,
    EnvironmentFile,
    Registration,
}

/// The object a change is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeSubject {
    Context(IndexedContext),
    Declaration(IndexedDeclaration),
    Definition(IndexedDeclaration),
    Use {
        context: IndexedContext,
        index: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChangeEvent {
    pub subject: ChangeSubject,
    pub modification: Modification,
    pub relationship: Relationship,
    pub related: Option<ChangeSubject>,
}

impl ChangeEvent {
    pub fn context_changed(
        context: IndexedContext,
        modification: Modification,
        relationship: Relationship,
        related: Option<ChangeSubject>,
    ) -> Self {
        Self {
            subject: ChangeSubject::Context(context),
            modification,
            relationship,
            related,
        }
    }

    pub fn declaration_changed(
        declaration: IndexedDeclaration,
        modification: Modification,
        relationship: Relationship,
        related: Option<ChangeSubject>,
    ) -> Self {
        Self {
            subject: ChangeSubject::Declaration(declaration),
            modification,
            relationship,
            related,
        }
    }

    pub fn definition_changed(
        definition: IndexedDeclaration,
        modification: Modification,
        relationship: Relationship,
        related: Option<ChangeSubject>,
    ) -> Self {
        Self {
            subject: ChangeSubject::Definition(definition),
            modification,
            relationship,
            related,
        }
    }

    pub fn use_changed(
        context: IndexedContext,
        index: usize,
        modification: Modification,
        related: Option<ChangeSubject>,
    ) -> Self {
        Self {
            subject: ChangeSubject::Use { context, index },
            modification,
            relationship: Relationship::Uses,
            related,
        }
    }
}

/// Identifies a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl ObserverId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Receiving half handed to an observer.
pub type ChangeReceiver = mpsc::Receiver<ChangeEvent>;

/// Fan-out of change events to subscribed observers.
#[derive(Debug)]
pub struct ObserverBus {
    observers: Mutex<Vec<(ObserverId, mpsc::Sender<ChangeEvent>)>>,
    /// Serializes dispatch; distinct from the chain lock.
    notification: Mutex<()>,
    next_id: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    default_capacity: usize,
}

impl ObserverBus {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
            notification: Mutex::new(()),
            next_id: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            default_capacity: default_capacity.max(1),
        }
    }

    /// Subscribe with a channel of `capacity` events (default when `None`).
    pub fn subscribe(&self, capacity: Option<usize>) -> (ObserverId, ChangeReceiver) {
        let capacity = capacity.unwrap_or(self.default_capacity).max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.lock().push((id, sender));
        debug!("Observer {} subscribed (capacity {})", id.0, capacity);
        (id, receiver)
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        before != observers.len()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn has_observers(&self) -> bool {
        !self.observers.lock().is_empty()
    }

    /// Events dropped because an observer's channel was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Deliver `events` to every observer.
    pub fn dispatch(&self, events: Vec<ChangeEvent>) {
        if events.is_empty() {
            return;
        }
        let _serial = self.notification.lock();
        let senders: Vec<_> = self.observers.lock().clone();
        if senders.is_empty() {
            return;
        }

        let mut closed = Vec::new();
        for (id, sender) in &senders {
            for event in &events {
                match sender.try_send(*event) {
                    Ok(()) => {
                        self.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Full(_)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!("Observer {} is lagging, dropped {:?}", id.0, event);
                    }
                    Err(TrySendError::Closed(_)) => {
                        closed.push(*id);
                        break;
                    }
                }
            }
        }

        if !closed.is_empty() {
            debug!("Removing {} closed observer(s)", closed.len());
            self.observers
                .lock()
                .retain(|(id, _)| !closed.contains(id));
        }
    }
}

impl Default for ObserverBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Handle;

    fn event(modification: Modification) -> ChangeEvent {
        ChangeEvent::context_changed(
            IndexedContext::new(Handle::new(0, 0), Handle::new(0, 0)),
            modification,
            Relationship::ChildContexts,
            None,
        )
    }

    #[test]
    fn test_dispatch_reaches_every_observer() {
        let bus = ObserverBus::new(8);
        let (_, mut first) = bus.subscribe(None);
        let (_, mut second) = bus.subscribe(None);

        bus.dispatch(vec![event(Modification::Addition), event(Modification::Removal)]);

        for receiver in [&mut first, &mut second] {
            assert_eq!(receiver.try_recv().unwrap().modification, Modification::Addition);
            assert_eq!(receiver.try_recv().unwrap().modification, Modification::Removal);
            assert!(receiver.try_recv().is_err());
        }
        assert_eq!(bus.delivered_count(), 4);
    }

    #[test]
    fn test_full_channel_drops_events() {
        let bus = ObserverBus::new(8);
        let (_, mut receiver) = bus.subscribe(Some(1));

        bus.dispatch(vec![event(Modification::Addition), event(Modification::Change)]);

        assert_eq!(bus.dropped_count(), 1);
        assert_eq!(receiver.try_recv().unwrap().modification, Modification::Addition);
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_closed_receiver_is_unsubscribed() {
        let bus = ObserverBus::new(8);
        let (_, receiver) = bus.subscribe(None);
        let (kept, _kept_receiver) = bus.subscribe(None);
        drop(receiver);

        bus.dispatch(vec![event(Modification::Deletion)]);

        assert_eq!(bus.observer_count(), 1);
        assert!(bus.unsubscribe(kept));
        assert!(!bus.unsubscribe(kept));
    }
}
