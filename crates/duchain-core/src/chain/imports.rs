//! Import edges and transitive import closures
//!
//! Every context's closure (the set of contexts it imports, directly or
//! transitively) is computed on demand and kept in a bounded LRU cache.
//! Changing an edge invalidates the closure of the importing context and of
//! everything that (transitively) imports it; unrelated entries stay valid.
//!
//! Closures are sets over per-context indices. Every import target gets an
//! index when the edge is added, and a destroyed context gives its index back
//! once no cached closure can refer to it any more.

use super::store::ChainStore;
use super::DUChain;
use crate::context::Import;
use crate::error::{usage_error, DUChainError, Result};
use crate::indexed::IndexedContext;
use crate::observer::{ChangeEvent, ChangeSubject, Modification, Relationship};
use crate::range::SimpleCursor;
use crate::set_repository::{Index, Set};
use lru::LruCache;
use std::collections::{HashMap, HashSet, VecDeque};
use std::num::NonZeroUsize;
use tracing::trace;

/// Import closure cache metrics for monitoring
#[derive(Debug, Clone, Default)]
pub struct ImportCacheMetrics {
    /// Closures served from the cache
    pub hits: u64,
    /// Closures that had to be computed
    pub misses: u64,
    /// Cached closures dropped because an edge changed
    pub invalidations: u64,
    /// Closures currently cached
    pub entries: usize,
    /// Live contexts holding a closure index
    pub indexed_contexts: usize,
}

impl ImportCacheMetrics {
    /// Get hit rate as a fraction (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    fn record_hit(&mut self) {
        self.hits += 1;
    }

    fn record_miss(&mut self) {
        self.misses += 1;
    }

    fn record_invalidation(&mut self) {
        self.invalidations += 1;
    }
}

/// Closure indices of contexts; indices of released contexts are reused.
#[derive(Default)]
pub(crate) struct ContextIndices {
    indices: HashMap<IndexedContext, Index>,
    contexts: Vec<Option<IndexedContext>>,
    free: Vec<Index>,
}

impl ContextIndices {
    pub(crate) fn intern(&mut self, context: IndexedContext) -> Index {
        if let Some(index) = self.indices.get(&context) {
            return *index;
        }
        let index = match self.free.pop() {
            Some(index) => {
                if let Some(slot) = self.contexts.get_mut(index as usize) {
                    *slot = Some(context);
                }
                index
            }
            None => {
                self.contexts.push(Some(context));
                (self.contexts.len() - 1) as Index
            }
        };
        self.indices.insert(context, index);
        index
    }

    pub(crate) fn find(&self, context: &IndexedContext) -> Option<Index> {
        self.indices.get(context).copied()
    }

    pub(crate) fn get(&self, index: Index) -> Option<IndexedContext> {
        self.contexts.get(index as usize).copied().flatten()
    }

    /// Give the index of `context` back. Returns whether it had one.
    pub(crate) fn release(&mut self, context: &IndexedContext) -> bool {
        let Some(index) = self.indices.remove(context) else {
            return false;
        };
        if let Some(slot) = self.contexts.get_mut(index as usize) {
            *slot = None;
        }
        self.free.push(index);
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.indices.len()
    }
}

pub(crate) struct ImportCache {
    closures: LruCache<IndexedContext, Set>,
    metrics: ImportCacheMetrics,
}

impl ImportCache {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            closures: LruCache::new(capacity),
            metrics: ImportCacheMetrics::default(),
        }
    }

    pub(crate) fn get(&mut self, context: &IndexedContext) -> Option<Set> {
        match self.closures.get(context) {
            Some(set) => {
                self.metrics.record_hit();
                Some(set.clone())
            }
            None => {
                self.metrics.record_miss();
                None
            }
        }
    }

    pub(crate) fn put(&mut self, context: IndexedContext, closure: Set) {
        self.closures.put(context, closure);
    }

    pub(crate) fn invalidate(&mut self, context: &IndexedContext) {
        if self.closures.pop(context).is_some() {
            self.metrics.record_invalidation();
        }
    }

    pub(crate) fn clear(&mut self) {
        self.closures.clear();
    }

    pub(crate) fn metrics(&self) -> ImportCacheMetrics {
        ImportCacheMetrics {
            entries: self.closures.len(),
            ..self.metrics.clone()
        }
    }
}

impl DUChain {
    /// Make `imported` visible from `context`, from `position` onwards
    /// (an invalid position makes it visible throughout the context).
    ///
    /// Adding an edge that already exists is a no-op. An edge that would
    /// make a context import itself is refused.
    pub fn add_imported_parent_context(
        &self,
        context: IndexedContext,
        imported: IndexedContext,
        position: SimpleCursor,
    ) -> Result<()> {
        self.require_write("add_imported_parent_context")?;
        if context == imported {
            return usage_error(DUChainError::ImportCycle);
        }

        let mut guard = self.store.write();
        let store = &mut *guard;
        let Some(importing) = store.accessible_context(context) else {
            return usage_error(DUChainError::InvalidHandle { kind: "context" });
        };
        if importing.imports_directly(imported) {
            return Ok(());
        }
        if store.accessible_context(imported).is_none() {
            return usage_error(DUChainError::InvalidHandle { kind: "context" });
        }
        let context_index = self.context_index(context);
        if self.closure_set(store, imported).contains(context_index) {
            return usage_error(DUChainError::ImportCycle);
        }

        self.context_index(imported);
        if let Some(importing) = store.context_mut(context) {
            importing.imported_parents.push(Import::new(imported, position));
        }
        if let Some(target) = store.context_mut(imported) {
            if !target.importers.contains(&context) {
                target.importers.push(context);
            }
        }
        self.invalidate_importers(store, context);
        drop(guard);

        trace!("{:?} imports {:?} from {}", context, imported, position);
        self.notify(vec![
            ChangeEvent::context_changed(
                context,
                Modification::Addition,
                Relationship::ImportedParentContexts,
                Some(ChangeSubject::Context(imported)),
            ),
            ChangeEvent::context_changed(
                imported,
                Modification::Addition,
                Relationship::ImportedChildContexts,
                Some(ChangeSubject::Context(context)),
            ),
        ]);
        Ok(())
    }

    /// Remove the edge from `context` to `imported`; missing edges are
    /// ignored.
    pub fn remove_imported_parent_context(
        &self,
        context: IndexedContext,
        imported: IndexedContext,
    ) -> Result<()> {
        self.remove_imported_parent_contexts(context, &[imported])
    }

    pub fn remove_imported_parent_contexts(
        &self,
        context: IndexedContext,
        imported: &[IndexedContext],
    ) -> Result<()> {
        self.require_write("remove_imported_parent_contexts")?;
        let mut guard = self.store.write();
        let store = &mut *guard;
        if store.accessible_context(context).is_none() {
            return usage_error(DUChainError::InvalidHandle { kind: "context" });
        }

        let mut events = Vec::new();
        for parent in imported {
            self.unlink_import(store, context, *parent, &mut events);
        }
        drop(guard);

        self.notify(events);
        Ok(())
    }

    /// Remove every import edge leaving `context`.
    pub fn clear_imported_parent_contexts(&self, context: IndexedContext) -> Result<()> {
        self.require_write("clear_imported_parent_contexts")?;
        let mut guard = self.store.write();
        let store = &mut *guard;
        let Some(importing) = store.accessible_context(context) else {
            return usage_error(DUChainError::InvalidHandle { kind: "context" });
        };
        let parents: Vec<IndexedContext> = importing
            .imported_parents
            .iter()
            .map(|import| import.context)
            .collect();

        let mut events = Vec::new();
        for parent in parents {
            self.unlink_import(store, context, parent, &mut events);
        }
        drop(guard);

        self.notify(events);
        Ok(())
    }

    /// Whether `other` is in the import closure of `context`.
    ///
    /// With a valid `position`, only direct imports in effect at that
    /// position are followed; imports further down are always followed.
    ///
    /// Import targets are indexed when their edge is added, so a context
    /// without an index is imported by nobody.
    pub fn imports(
        &self,
        context: IndexedContext,
        other: IndexedContext,
        position: SimpleCursor,
    ) -> bool {
        self.check_read("imports");
        let Some(target) = self.context_indices.lock().find(&other) else {
            return false;
        };
        let store = self.store.read();
        let Some(importing) = store.accessible_context(context) else {
            return false;
        };

        if !position.is_valid() {
            return self.closure_set(&store, context).contains(target);
        }
        importing
            .imported_parents
            .iter()
            .filter(|import| import.is_visible_at(position))
            .any(|import| {
                import.context == other || self.closure_set(&store, import.context).contains(target)
            })
    }

    /// Every context transitively imported by `context`, in index order.
    pub fn import_closure(&self, context: IndexedContext) -> Vec<IndexedContext> {
        self.check_read("import_closure");
        let store = self.store.read();
        if store.accessible_context(context).is_none() {
            return Vec::new();
        }
        self.closure_set(&store, context)
            .iter()
            .filter_map(|index| self.context_at(index))
            .filter(|imported| store.context(*imported).is_some())
            .collect()
    }

    pub fn import_cache_metrics(&self) -> ImportCacheMetrics {
        ImportCacheMetrics {
            indexed_contexts: self.context_indices.lock().len(),
            ..self.import_cache.lock().metrics()
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    pub(crate) fn context_index(&self, context: IndexedContext) -> Index {
        self.context_indices.lock().intern(context)
    }

    pub(crate) fn context_at(&self, index: Index) -> Option<IndexedContext> {
        self.context_indices.lock().get(index)
    }

    /// Release the closure index of a context about to be destroyed. Its
    /// import edges must already be gone, so no cached closure holds the
    /// index.
    pub(crate) fn release_context_index(&self, context: IndexedContext) {
        self.import_cache.lock().invalidate(&context);
        if self.context_indices.lock().release(&context) {
            trace!("Released closure index of {:?}", context);
        }
    }

    /// Closure of `context`, computed with a per-call memo so diamonds are
    /// visited once.
    pub(crate) fn closure_set(&self, store: &ChainStore, context: IndexedContext) -> Set {
        let mut memo = HashMap::new();
        self.closure_with_memo(store, context, &mut memo)
    }

    fn closure_with_memo(
        &self,
        store: &ChainStore,
        context: IndexedContext,
        memo: &mut HashMap<IndexedContext, Set>,
    ) -> Set {
        if let Some(closure) = memo.get(&context) {
            return closure.clone();
        }
        if let Some(closure) = self.import_cache.lock().get(&context) {
            memo.insert(context, closure.clone());
            return closure;
        }
        // Placeholder so a corrupt cyclic graph terminates.
        memo.insert(context, self.sets.empty_set());

        let mut closure = self.sets.empty_set();
        if let Some(importing) = store.context(context) {
            for import in &importing.imported_parents {
                closure = closure.with(self.context_index(import.context));
                let nested = self.closure_with_memo(store, import.context, memo);
                if !nested.is_empty() {
                    closure = closure.union(&nested);
                }
            }
        }

        memo.insert(context, closure.clone());
        self.import_cache.lock().put(context, closure.clone());
        closure
    }

    /// Drop the cached closures of `context` and all its transitive
    /// importers.
    pub(crate) fn invalidate_importers(&self, store: &ChainStore, context: IndexedContext) {
        let mut cache = self.import_cache.lock();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([context]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            cache.invalidate(&current);
            if let Some(current) = store.context(current) {
                queue.extend(current.importers.iter().copied());
            }
        }
    }

    /// Remove one edge, keeping both directions consistent.
    pub(crate) fn unlink_import(
        &self,
        store: &mut ChainStore,
        context: IndexedContext,
        imported: IndexedContext,
        events: &mut Vec<ChangeEvent>,
    ) {
        let removed = match store.context_mut(context) {
            Some(importing) => {
                let before = importing.imported_parents.len();
                importing
                    .imported_parents
                    .retain(|import| import.context != imported);
                before != importing.imported_parents.len()
            }
            None => false,
        };
        if let Some(target) = store.context_mut(imported) {
            target.importers.retain(|importer| *importer != context);
        }
        if !removed {
            return;
        }

        self.invalidate_importers(store, context);
        events.push(ChangeEvent::context_changed(
            context,
            Modification::Removal,
            Relationship::ImportedParentContexts,
            Some(ChangeSubject::Context(imported)),
        ));
        events.push(ChangeEvent::context_changed(
            imported,
            Modification::Removal,
            Relationship::ImportedChildContexts,
            Some(ChangeSubject::Context(context)),
        ));
    }

    /// Remove every edge touching `context` in either direction.
    pub(crate) fn remove_all_import_edges(
        &self,
        store: &mut ChainStore,
        context: IndexedContext,
        events: &mut Vec<ChangeEvent>,
    ) {
        let Some(current) = store.context(context) else {
            return;
        };
        let parents: Vec<IndexedContext> = current
            .imported_parents
            .iter()
            .map(|import| import.context)
            .collect();
        let importers = current.importers.clone();

        for parent in parents {
            self.unlink_import(store, context, parent, events);
        }
        for importer in importers {
            self.unlink_import(store, importer, context, events);
        }
        self.invalidate_importers(store, context);
    }
}
