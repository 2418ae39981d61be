//! Top contexts
//!
//! A [`TopDUContext`] is the root of one parse of one document. It owns the
//! arenas holding every context and declaration of the parse, the table of
//! declarations referenced by its uses, and the parse's environment file.

use crate::arena::{Arena, Handle};
use crate::context::DUContext;
use crate::declaration::Declaration;
use crate::declaration_id::DeclarationId;
use crate::environment::{IdentifiedFile, ParsingEnvironmentFile};
use crate::indexed::{IndexedContext, IndexedTopContext};
use crate::range::SimpleRange;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Lifecycle of a top context. Destruction removes it from the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TopContextState {
    /// Being populated; visible only to the building thread.
    Building,
    /// Discoverable through the registry.
    Registered,
    /// Removed from the registry but not yet destroyed.
    Unregistered,
}

pub struct TopDUContext {
    pub(crate) handle: IndexedTopContext,
    pub(crate) identity: IdentifiedFile,
    pub(crate) range: SimpleRange,
    pub(crate) state: TopContextState,
    pub(crate) builder_thread: ThreadId,
    pub(crate) contexts: Arena<DUContext>,
    pub(crate) declarations: Arena<Declaration>,
    pub(crate) root: Handle<DUContext>,
    pub(crate) environment_file: Option<Arc<dyn ParsingEnvironmentFile>>,
    /// Declarations referenced by uses in this document.
    pub(crate) declaration_table: Vec<DeclarationId>,
    pub(crate) declaration_indices: HashMap<DeclarationId, u32>,
    /// Use ranges per declaration-table index.
    pub(crate) uses_by_declaration: HashMap<u32, Vec<SimpleRange>>,
}

impl std::fmt::Debug for TopDUContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopDUContext")
            .field("identity", &self.identity)
            .field("state", &self.state)
            .field("contexts", &self.contexts.len())
            .field("declarations", &self.declarations.len())
            .finish()
    }
}

impl TopDUContext {
    pub(crate) fn new(
        handle: IndexedTopContext,
        identity: IdentifiedFile,
        range: SimpleRange,
    ) -> Self {
        let mut contexts = Arena::new();
        let root = contexts.next_handle();
        let root_context = DUContext::new(
            IndexedContext::new(handle, root),
            crate::context::ContextType::Global,
            range,
            None,
        );
        contexts.insert(root_context);

        Self {
            handle,
            identity,
            range,
            state: TopContextState::Building,
            builder_thread: thread::current().id(),
            contexts,
            declarations: Arena::new(),
            root,
            environment_file: None,
            declaration_table: Vec::new(),
            declaration_indices: HashMap::new(),
            uses_by_declaration: HashMap::new(),
        }
    }

    pub fn handle(&self) -> IndexedTopContext {
        self.handle
    }

    pub fn identity(&self) -> IdentifiedFile {
        self.identity
    }

    pub fn url(&self) -> String {
        self.identity.url().to_string()
    }

    pub fn range(&self) -> SimpleRange {
        self.range
    }

    pub fn state(&self) -> TopContextState {
        self.state
    }

    pub fn is_registered(&self) -> bool {
        self.state == TopContextState::Registered
    }

    /// Registered contexts are shared; others belong to their builder.
    pub fn is_accessible_from_current_thread(&self) -> bool {
        self.is_registered() || self.builder_thread == thread::current().id()
    }

    pub fn root_context(&self) -> IndexedContext {
        IndexedContext::new(self.handle, self.root)
    }

    pub fn environment_file(&self) -> Option<Arc<dyn ParsingEnvironmentFile>> {
        self.environment_file.clone()
    }

    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    pub fn declaration_count(&self) -> usize {
        self.declarations.len()
    }

    pub fn declaration_table(&self) -> &[DeclarationId] {
        &self.declaration_table
    }

    /// Ranges of all uses of `id` inside this document.
    pub fn uses_of(&self, id: &DeclarationId) -> &[SimpleRange] {
        self.declaration_indices
            .get(id)
            .and_then(|index| self.uses_by_declaration.get(index))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn context(&self, handle: Handle<DUContext>) -> Option<&DUContext> {
        self.contexts.get(handle)
    }

    pub(crate) fn declaration(&self, handle: Handle<Declaration>) -> Option<&Declaration> {
        self.declarations.get(handle)
    }

    /// Index of `id` in the declaration table, adding it when missing.
    pub(crate) fn declaration_index(&mut self, id: DeclarationId) -> u32 {
        if let Some(&index) = self.declaration_indices.get(&id) {
            return index;
        }
        let index = self.declaration_table.len() as u32;
        self.declaration_table.push(id);
        self.declaration_indices.insert(id, index);
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::QualifiedIdentifier;

    #[test]
    fn test_new_top_has_global_root() {
        let mut tops: Arena<TopDUContext> = Arena::new();
        let handle = tops.next_handle();
        let top =
            TopDUContext::new(handle, IdentifiedFile::from("a.cpp"), SimpleRange::invalid());
        tops.insert(top);

        let top = tops.get(handle).unwrap();
        let root = top.root_context();
        assert_eq!(root.top(), handle);
        let context = top.context(root.local()).unwrap();
        assert_eq!(context.context_type(), crate::context::ContextType::Global);
        assert_eq!(top.state(), TopContextState::Building);
        assert!(top.is_accessible_from_current_thread());
    }

    #[test]
    fn test_declaration_table_is_deduplicated() {
        let mut tops: Arena<TopDUContext> = Arena::new();
        let handle = tops.next_handle();
        let mut top =
            TopDUContext::new(handle, IdentifiedFile::from("b.cpp"), SimpleRange::invalid());

        let a = DeclarationId::indirect(&QualifiedIdentifier::parse("a"), 0);
        let b = DeclarationId::indirect(&QualifiedIdentifier::parse("b"), 0);
        assert_eq!(top.declaration_index(a), 0);
        assert_eq!(top.declaration_index(b), 1);
        assert_eq!(top.declaration_index(a), 0);
        assert_eq!(top.declaration_table(), &[a, b]);
    }
}
