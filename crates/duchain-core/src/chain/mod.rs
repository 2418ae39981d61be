//! The DUChain
//!
//! [`DUChain`] is the process-wide index of parsed documents. It owns every
//! [`TopDUContext`], the registry mapping document identities to them, the
//! parsing environment managers, the symbol table and the observer bus.
//!
//! # Locking
//!
//! All access follows the protocol of [`DUChainLock`] (see [`DUChain::lock`]):
//! mutations require the write lock of the calling thread and are refused
//! otherwise, reads require at least the read lock. The internal store lock
//! is only held for the duration of a single call and never across calls.
//!
//! ```ignore
//! let chain = DUChain::new();
//! let _write = DUChainWriteLocker::new(chain.lock());
//! let top = chain.create_top_context(IdentifiedFile::from("a.cpp"), range)?;
//! chain.add_document_chain(top)?;
//! ```
//!
//! Graph objects are addressed by handles ([`IndexedContext`],
//! [`IndexedDeclaration`], [`IndexedTopContext`]). A handle into a destroyed
//! document no longer resolves and every accessor returns `None` for it.

mod build;
mod imports;
mod query;
mod store;
mod templates;

pub use imports::ImportCacheMetrics;

use crate::environment::{
    EnvironmentType, IdentifiedFile, ParsingEnvironment, ParsingEnvironmentFile,
    ParsingEnvironmentManager,
};
use crate::error::{usage_error, DUChainError, Result};
use crate::indexed::{IndexedContext, IndexedTopContext};
use crate::interner::IndexedString;
use crate::lock::{DUChainLock, DUChainWriteLocker};
use crate::observer::{
    ChangeEvent, ChangeReceiver, Modification, ObserverBus, ObserverId, Relationship,
};
use crate::range::SimpleRange;
use crate::set_repository::SetRepository;
use crate::top_context::{TopContextState, TopDUContext};
use crate::visibility::{VisibilityMode, VisibilityPolicy};
use imports::{ContextIndices, ImportCache};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use store::ChainStore;
use tracing::{debug, error, info, warn};

/// Tuning knobs of a chain.
#[derive(Debug, Clone)]
pub struct ChainOptions {
    /// Built-in visibility policy used by name lookup.
    pub visibility: VisibilityMode,
    /// Maximum number of cached import closures.
    pub import_cache_capacity: usize,
    /// Default channel capacity of new observers.
    pub observer_capacity: usize,
    /// Node creations between sweeps of the set repository (0 disables).
    pub set_prune_interval: u64,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            visibility: VisibilityMode::default(),
            import_cache_capacity: 4096,
            observer_capacity: 1024,
            set_prune_interval: 4096,
        }
    }
}

/// Process-wide semantic index.
pub struct DUChain {
    lock: DUChainLock,
    store: RwLock<ChainStore>,
    sets: SetRepository,
    context_indices: Mutex<ContextIndices>,
    import_cache: Mutex<ImportCache>,
    observers: ObserverBus,
    visibility: Arc<dyn VisibilityPolicy>,
    options: ChainOptions,
}

impl std::fmt::Debug for DUChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DUChain")
            .field("lock", &self.lock)
            .field("options", &self.options)
            .field("visibility", &self.visibility)
            .finish()
    }
}

impl Default for DUChain {
    fn default() -> Self {
        Self::new()
    }
}

impl DUChain {
    pub fn new() -> Self {
        Self::with_options(ChainOptions::default())
    }

    pub fn with_options(options: ChainOptions) -> Self {
        let visibility = options.visibility.policy();
        Self::with_visibility_policy(options, visibility)
    }

    /// Chain with a language-specific visibility policy.
    pub fn with_visibility_policy(
        options: ChainOptions,
        visibility: Arc<dyn VisibilityPolicy>,
    ) -> Self {
        Self {
            lock: DUChainLock::new(),
            store: RwLock::new(ChainStore::new()),
            sets: SetRepository::with_prune_interval("duchain", options.set_prune_interval),
            context_indices: Mutex::new(ContextIndices::default()),
            import_cache: Mutex::new(ImportCache::new(options.import_cache_capacity)),
            observers: ObserverBus::new(options.observer_capacity),
            visibility,
            options,
        }
    }

    /// The lock every caller must hold while using the chain.
    pub fn lock(&self) -> &DUChainLock {
        &self.lock
    }

    pub fn options(&self) -> &ChainOptions {
        &self.options
    }

    /// Repository holding import closures and use sets.
    pub fn sets(&self) -> &SetRepository {
        &self.sets
    }

    pub fn observers(&self) -> &ObserverBus {
        &self.observers
    }

    // ========================================================================
    // Lock discipline
    // ========================================================================

    pub(crate) fn require_write(&self, operation: &'static str) -> Result<()> {
        if self.lock.current_thread_has_write_lock() {
            Ok(())
        } else {
            usage_error(DUChainError::WriteLockRequired { operation })
        }
    }

    /// Reads without a lock are reported but still served.
    pub(crate) fn check_read(&self, operation: &'static str) {
        if !self.lock.current_thread_has_read_lock() {
            error!("{} called without holding the DUChain lock", operation);
            debug_assert!(false, "{} requires the DUChain read lock", operation);
        }
    }

    pub(crate) fn notify(&self, events: Vec<ChangeEvent>) {
        self.observers.dispatch(events);
    }

    // ========================================================================
    // Top contexts
    // ========================================================================

    /// Create an empty, unregistered top context for `identity`.
    ///
    /// Until registered it is only visible to the calling thread.
    pub fn create_top_context(
        &self,
        identity: IdentifiedFile,
        range: SimpleRange,
    ) -> Result<IndexedTopContext> {
        self.require_write("create_top_context")?;
        let mut store = self.store.write();
        let handle = store.tops.next_handle();
        store.tops.insert(TopDUContext::new(handle, identity, range));
        debug!("Created top context {:?} for {}", handle, identity);
        Ok(handle)
    }

    /// Register `top` so it becomes discoverable under its identity.
    ///
    /// A different top context registered under the same identity is
    /// unregistered (not destroyed). The top's environment file, if any, is
    /// registered with the manager for its type.
    pub fn add_document_chain(&self, top: IndexedTopContext) -> Result<()> {
        self.require_write("add_document_chain")?;
        let mut store = self.store.write();

        let (identity, state, file) = match store.tops.get(top) {
            Some(context) => (
                context.identity,
                context.state,
                context.environment_file.clone(),
            ),
            None => return usage_error(DUChainError::InvalidHandle { kind: "top context" }),
        };
        if state == TopContextState::Registered {
            return usage_error(DUChainError::AlreadyRegistered(identity.to_string()));
        }

        let replaced = store
            .chains
            .get(&identity)
            .copied()
            .filter(|previous| *previous != top);
        if let Some(previous) = replaced {
            store.unregister(previous);
        }

        if let Some(file) = file {
            if let Err(error) = store.add_environment_file(file) {
                if let Some(previous) = replaced {
                    store.reregister(previous);
                }
                return usage_error(error);
            }
        }
        if replaced.is_some() {
            info!("Replaced document chain for {}", identity);
        }

        store.chains.insert(identity, top);
        if let Some(context) = store.tops.get_mut(top) {
            context.state = TopContextState::Registered;
        }
        let root = store.root_of(top);
        drop(store);

        debug!("Registered document chain {}", identity);
        if let Some(root) = root {
            self.notify(vec![ChangeEvent::context_changed(
                root,
                Modification::Addition,
                Relationship::Registration,
                None,
            )]);
        }
        Ok(())
    }

    /// Remove the registry entry for `identity`; the context is not
    /// destroyed. Returns the previously registered top context.
    pub fn remove_document_chain(
        &self,
        identity: &IdentifiedFile,
    ) -> Result<Option<IndexedTopContext>> {
        self.require_write("remove_document_chain")?;
        let mut store = self.store.write();
        let Some(top) = store.chains.get(identity).copied() else {
            return Ok(None);
        };
        store.unregister(top);
        let root = store.root_of(top);
        drop(store);

        debug!("Removed document chain {}", identity);
        if let Some(root) = root {
            self.notify(vec![ChangeEvent::context_changed(
                root,
                Modification::Removal,
                Relationship::Registration,
                None,
            )]);
        }
        Ok(Some(top))
    }

    /// Destroy `top` and everything it owns. Registered contexts are
    /// unregistered first. Handles into it stop resolving.
    pub fn destroy_top_context(&self, top: IndexedTopContext) -> Result<()> {
        self.require_write("destroy_top_context")?;
        let mut store = self.store.write();
        let Some(root) = store.root_of(top) else {
            return usage_error(DUChainError::InvalidHandle { kind: "top context" });
        };
        let mut events = Vec::new();
        self.destroy_top(&mut store, top, &mut events);
        drop(store);

        events.push(ChangeEvent::context_changed(
            root,
            Modification::Deletion,
            Relationship::Identity,
            None,
        ));
        self.notify(events);
        Ok(())
    }

    fn destroy_top(
        &self,
        store: &mut ChainStore,
        top: IndexedTopContext,
        events: &mut Vec<ChangeEvent>,
    ) {
        if store.tops.get(top).is_some_and(TopDUContext::is_registered) {
            store.unregister(top);
        }
        if let Some(root) = store.root_of(top) {
            self.delete_context_contents(store, root, events);
        }
        // Anonymous contexts left behind may still import other documents.
        let remaining: Vec<IndexedContext> = store
            .tops
            .get(top)
            .map(|context| {
                context
                    .contexts
                    .handles()
                    .into_iter()
                    .map(|local| IndexedContext::new(top, local))
                    .collect()
            })
            .unwrap_or_default();
        for context in &remaining {
            self.remove_all_import_edges(store, *context, events);
        }
        for context in remaining {
            self.release_context_index(context);
        }
        store.remove_top_uses(top);
        if let Some(removed) = store.tops.remove(top) {
            debug!("Destroyed top context for {}", removed.identity);
        }
    }

    /// Destroy every top context and empty every environment manager.
    ///
    /// Acquires the write lock itself.
    pub fn clear(&self) -> Result<()> {
        let locker = DUChainWriteLocker::new(&self.lock);
        if !locker.locked() {
            return usage_error(DUChainError::WriteLockRequired { operation: "clear" });
        }

        let mut store = self.store.write();
        let tops = store.tops.handles();
        let mut events = Vec::new();
        for top in &tops {
            self.destroy_top(&mut store, *top, &mut events);
        }
        for manager in store.managers.values_mut() {
            manager.clear();
        }
        store.chains.clear();
        store.symbols.clear();
        store.definitions.clear();
        store.uses.clear();
        drop(store);

        self.import_cache.lock().clear();
        info!("Cleared DUChain ({} top contexts destroyed)", tops.len());
        self.notify(events);
        Ok(())
    }

    // ========================================================================
    // Registry queries
    // ========================================================================

    /// The first registered parse of `url` in identity order.
    pub fn chain_for_document(&self, url: &str) -> Option<IndexedTopContext> {
        self.check_read("chain_for_document");
        let url = IndexedString::new(url);
        let store = self.store.read();
        store
            .chains
            .range(IdentifiedFile::new(url, 0)..)
            .take_while(|(identity, _)| identity.url() == url)
            .map(|(_, top)| *top)
            .next()
    }

    /// The parse registered under `identity`. Identity index 0 stands for
    /// any parse of the URL and behaves like [`DUChain::chain_for_document`].
    pub fn chain_for_identity(&self, identity: &IdentifiedFile) -> Option<IndexedTopContext> {
        self.check_read("chain_for_identity");
        let store = self.store.read();
        if identity.identity() != 0 {
            return store.chains.get(identity).copied();
        }
        store
            .chains
            .range(*identity..)
            .take_while(|(registered, _)| registered.url() == identity.url())
            .map(|(_, top)| *top)
            .next()
    }

    /// Every registered parse of `url`, in identity order.
    pub fn chains_for_document(&self, url: &str) -> Vec<IndexedTopContext> {
        self.check_read("chains_for_document");
        let url = IndexedString::new(url);
        let store = self.store.read();
        store
            .chains
            .range(IdentifiedFile::new(url, 0)..)
            .take_while(|(identity, _)| identity.url() == url)
            .map(|(_, top)| *top)
            .collect()
    }

    /// The parse of `url` best matching `environment`, according to the
    /// manager registered for the environment's type.
    ///
    /// Does not fall back to [`DUChain::chain_for_document`] when no manager
    /// exists or nothing matches.
    pub fn chain_for_document_in_environment(
        &self,
        url: &str,
        environment: &dyn ParsingEnvironment,
    ) -> Option<IndexedTopContext> {
        self.check_read("chain_for_document_in_environment");
        let url = IndexedString::new(url);
        let store = self.store.read();
        let manager = store.managers.get(&environment.environment_type())?;
        let identity = manager.find(url, environment)?;
        store.chains.get(&identity).copied()
    }

    /// URLs of all registered documents, sorted.
    pub fn documents(&self) -> Vec<String> {
        self.check_read("documents");
        let store = self.store.read();
        let mut urls: Vec<String> = store
            .chains
            .keys()
            .map(|identity| identity.url().to_string())
            .collect();
        urls.dedup();
        urls
    }

    /// Every registered top context in identity order.
    pub fn all_chains(&self) -> Vec<IndexedTopContext> {
        self.check_read("all_chains");
        self.store.read().chains.values().copied().collect()
    }

    /// Number of live top contexts, registered or not.
    pub fn top_context_count(&self) -> usize {
        self.store.read().tops.len()
    }

    // ========================================================================
    // Environments
    // ========================================================================

    pub fn add_parsing_environment_manager(
        &self,
        manager: Box<dyn ParsingEnvironmentManager>,
    ) -> Result<()> {
        self.require_write("add_parsing_environment_manager")?;
        let environment_type = manager.environment_type();
        let mut store = self.store.write();
        if store.managers.contains_key(&environment_type) {
            return usage_error(DUChainError::DuplicateManager(environment_type));
        }
        store.managers.insert(environment_type, manager);
        debug!("Added parsing environment manager for type {}", environment_type);
        Ok(())
    }

    pub fn remove_parsing_environment_manager(
        &self,
        environment_type: EnvironmentType,
    ) -> Result<Option<Box<dyn ParsingEnvironmentManager>>> {
        self.require_write("remove_parsing_environment_manager")?;
        let removed = self.store.write().managers.remove(&environment_type);
        if removed.is_some() {
            debug!("Removed parsing environment manager for type {}", environment_type);
        }
        Ok(removed)
    }

    pub fn has_parsing_environment_manager(&self, environment_type: EnvironmentType) -> bool {
        self.store.read().managers.contains_key(&environment_type)
    }

    /// Number of files known to the manager of `environment_type`.
    pub fn environment_file_count(&self, environment_type: EnvironmentType) -> Option<usize> {
        self.store
            .read()
            .managers
            .get(&environment_type)
            .map(|manager| manager.file_count())
    }

    /// Attach `file` to `top`, replacing its previous environment file.
    ///
    /// For registered contexts the managers are updated too.
    pub fn update_context_environment(
        &self,
        top: IndexedTopContext,
        file: Arc<dyn ParsingEnvironmentFile>,
    ) -> Result<()> {
        self.require_write("update_context_environment")?;
        let mut store = self.store.write();
        let Some(context) = store.tops.get(top) else {
            return usage_error(DUChainError::InvalidHandle { kind: "top context" });
        };
        let registered = context.is_registered();
        let previous = context.environment_file.clone();

        if registered {
            if let Some(previous) = &previous {
                store.remove_environment_file(previous.as_ref());
            }
            if let Err(error) = store.add_environment_file(Arc::clone(&file)) {
                if let Some(previous) = previous {
                    if let Err(restore) = store.add_environment_file(previous) {
                        warn!("Could not restore previous environment file: {}", restore);
                    }
                }
                return usage_error(error);
            }
        }
        if let Some(context) = store.tops.get_mut(top) {
            context.environment_file = Some(file);
        }
        let root = store.root_of(top);
        drop(store);

        if let Some(root) = root {
            self.notify(vec![ChangeEvent::context_changed(
                root,
                Modification::Change,
                Relationship::EnvironmentFile,
                None,
            )]);
        }
        Ok(())
    }

    pub fn environment_file(
        &self,
        top: IndexedTopContext,
    ) -> Option<Arc<dyn ParsingEnvironmentFile>> {
        self.check_read("environment_file");
        let store = self.store.read();
        store
            .accessible_top(top)
            .and_then(|context| context.environment_file.clone())
    }

    // ========================================================================
    // Observers
    // ========================================================================

    /// Subscribe to change notifications. Requires the write lock.
    pub fn add_observer(&self, capacity: Option<usize>) -> Result<(ObserverId, ChangeReceiver)> {
        self.require_write("add_observer")?;
        Ok(self.observers.subscribe(capacity))
    }

    pub fn remove_observer(&self, id: ObserverId) -> Result<()> {
        self.require_write("remove_observer")?;
        if self.observers.unsubscribe(id) {
            Ok(())
        } else {
            warn!("Removing unknown observer {}", id.value());
            usage_error(DUChainError::UnknownObserver(id.value()))
        }
    }
}
