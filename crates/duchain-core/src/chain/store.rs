//! Storage behind the chain's internal lock.

use crate::arena::Arena;
use crate::context::{ContextType, DUContext};
use crate::declaration::{Declaration, DeclarationKind};
use crate::declaration_id::DeclarationId;
use crate::environment::{
    EnvironmentType, IdentifiedFile, ParsingEnvironmentFile, ParsingEnvironmentManager,
};
use crate::error::DUChainError;
use crate::identifier::{Identifier, QualifiedIdentifier};
use crate::indexed::{IndexedContext, IndexedDeclaration, IndexedTopContext};
use crate::range::{SimpleCursor, SimpleRange};
use crate::set_repository::Set;
use crate::symbol_table::SymbolTable;
use crate::top_context::{TopContextState, TopDUContext};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

pub(crate) struct ChainStore {
    pub(crate) tops: Arena<TopDUContext>,
    pub(crate) chains: BTreeMap<IdentifiedFile, IndexedTopContext>,
    pub(crate) managers: BTreeMap<EnvironmentType, Box<dyn ParsingEnvironmentManager>>,
    pub(crate) symbols: SymbolTable,
    /// Definitions per declaration id they define.
    pub(crate) definitions: HashMap<DeclarationId, Vec<IndexedDeclaration>>,
    /// Top contexts (by arena index) containing uses of a declaration id.
    pub(crate) uses: HashMap<DeclarationId, Set>,
}

impl ChainStore {
    pub(crate) fn new() -> Self {
        Self {
            tops: Arena::new(),
            chains: BTreeMap::new(),
            managers: BTreeMap::new(),
            symbols: SymbolTable::new(),
            definitions: HashMap::new(),
            uses: HashMap::new(),
        }
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Top context usable by the current thread.
    pub(crate) fn accessible_top(&self, top: IndexedTopContext) -> Option<&TopDUContext> {
        self.tops
            .get(top)
            .filter(|context| context.is_accessible_from_current_thread())
    }

    pub(crate) fn root_of(&self, top: IndexedTopContext) -> Option<IndexedContext> {
        self.tops.get(top).map(TopDUContext::root_context)
    }

    pub(crate) fn context(&self, context: IndexedContext) -> Option<&DUContext> {
        self.tops.get(context.top())?.context(context.local())
    }

    pub(crate) fn context_mut(&mut self, context: IndexedContext) -> Option<&mut DUContext> {
        self.tops
            .get_mut(context.top())?
            .contexts
            .get_mut(context.local())
    }

    pub(crate) fn accessible_context(&self, context: IndexedContext) -> Option<&DUContext> {
        self.accessible_top(context.top())?.context(context.local())
    }

    pub(crate) fn declaration(&self, declaration: IndexedDeclaration) -> Option<&Declaration> {
        self.tops
            .get(declaration.top())?
            .declaration(declaration.local())
    }

    pub(crate) fn declaration_mut(
        &mut self,
        declaration: IndexedDeclaration,
    ) -> Option<&mut Declaration> {
        self.tops
            .get_mut(declaration.top())?
            .declarations
            .get_mut(declaration.local())
    }

    pub(crate) fn accessible_declaration(
        &self,
        declaration: IndexedDeclaration,
    ) -> Option<&Declaration> {
        self.accessible_top(declaration.top())?
            .declaration(declaration.local())
    }

    pub(crate) fn accessible_declaration_mut(
        &mut self,
        declaration: IndexedDeclaration,
    ) -> Option<&mut Declaration> {
        self.tops
            .get_mut(declaration.top())
            .filter(|top| top.is_accessible_from_current_thread())?
            .declarations
            .get_mut(declaration.local())
    }

    /// The declaration owning the context `declaration` lives in.
    pub(crate) fn enclosing_owner(
        &self,
        declaration: IndexedDeclaration,
    ) -> Option<IndexedDeclaration> {
        let context = self.declaration(declaration)?.context?;
        self.context(context)?.owner
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Create a context below `parent`. Anonymous contexts are owned by
    /// `parent`'s document but not listed among its children.
    pub(crate) fn create_context(
        &mut self,
        parent: IndexedContext,
        range: SimpleRange,
        context_type: ContextType,
        local_scope_identifier: QualifiedIdentifier,
        anonymous: bool,
    ) -> Option<IndexedContext> {
        let parent_context = self.context(parent)?;
        let parent_is_scope = parent_context.context_type.is_symbol_table_scope();
        let scope_identifier = &parent_context.scope_identifier + &local_scope_identifier;

        let top = self.tops.get_mut(parent.top())?;
        let handle = IndexedContext::new(parent.top(), top.contexts.next_handle());
        let mut context = DUContext::new(handle, context_type, range, Some(parent));
        context.local_scope_identifier = local_scope_identifier;
        context.scope_identifier = scope_identifier.clone();
        context.anonymous = anonymous;
        top.contexts.insert(context);

        if anonymous {
            return Some(handle);
        }

        let contexts = &top.contexts;
        let start_of = |child: &IndexedContext| {
            contexts
                .get(child.local())
                .map_or(SimpleCursor::invalid(), |context| context.range.start)
        };
        let position = contexts
            .get(parent.local())?
            .children
            .partition_point(|child| start_of(child) <= range.start);
        top.contexts
            .get_mut(parent.local())?
            .children
            .insert(position, handle);

        let named_scope = matches!(
            context_type,
            ContextType::Namespace | ContextType::Class | ContextType::Helper | ContextType::Enum
        );
        if parent_is_scope && named_scope && !scope_identifier.is_empty() {
            self.symbols.add_context(&scope_identifier, handle);
        }
        Some(handle)
    }

    /// Create a declaration in `context`. Anonymous declarations are owned
    /// by the context but not listed in its local declarations.
    pub(crate) fn create_declaration(
        &mut self,
        context: IndexedContext,
        identifier: Identifier,
        range: SimpleRange,
        kind: DeclarationKind,
        anonymous: bool,
    ) -> Option<IndexedDeclaration> {
        let owner_context = self.context(context)?;
        let qualified_identifier = &owner_context.scope_identifier
            + &QualifiedIdentifier::from_identifier(identifier.clone());
        let in_symbol_table = !anonymous
            && !owner_context.anonymous
            && owner_context.context_type.is_symbol_table_scope()
            && !identifier.is_empty();

        let top = self.tops.get_mut(context.top())?;
        let handle = IndexedDeclaration::new(context.top(), top.declarations.next_handle());
        let mut declaration = Declaration::new(handle, identifier, range, kind);
        declaration.context = Some(context);
        declaration.qualified_identifier = qualified_identifier.clone();
        declaration.anonymous = anonymous;
        declaration.in_symbol_table = in_symbol_table;
        top.declarations.insert(declaration);

        if !anonymous {
            top.contexts
                .get_mut(context.local())?
                .local_declarations
                .push(handle);
        }
        if in_symbol_table {
            self.symbols.add_declaration(&qualified_identifier, handle);
        }
        Some(handle)
    }

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    pub(crate) fn add_environment_file(
        &mut self,
        file: Arc<dyn ParsingEnvironmentFile>,
    ) -> Result<(), DUChainError> {
        match self.managers.get_mut(&file.environment_type()) {
            Some(manager) => manager.add_file(file),
            None => {
                debug!(
                    "No parsing environment manager for type {}, {} stays unmanaged",
                    file.environment_type(),
                    file.identity()
                );
                Ok(())
            }
        }
    }

    pub(crate) fn remove_environment_file(&mut self, file: &dyn ParsingEnvironmentFile) {
        if let Some(manager) = self.managers.get_mut(&file.environment_type()) {
            manager.remove_file(&file.identity());
        }
    }

    /// Drop `top` from the registry and its environment file from the
    /// managers.
    pub(crate) fn unregister(&mut self, top: IndexedTopContext) {
        let Some(context) = self.tops.get_mut(top) else {
            return;
        };
        let identity = context.identity;
        let was_registered = context.state == TopContextState::Registered;
        context.state = TopContextState::Unregistered;
        let file = context.environment_file.clone();

        if self.chains.get(&identity) == Some(&top) {
            self.chains.remove(&identity);
        }
        if let (true, Some(file)) = (was_registered, file) {
            self.remove_environment_file(file.as_ref());
        }
    }

    /// Put a previously unregistered top back in place.
    pub(crate) fn reregister(&mut self, top: IndexedTopContext) {
        let Some(context) = self.tops.get_mut(top) else {
            return;
        };
        context.state = TopContextState::Registered;
        let identity = context.identity;
        let file = context.environment_file.clone();
        self.chains.insert(identity, top);
        if let Some(file) = file {
            if let Err(error) = self.add_environment_file(file) {
                warn!("Re-registered {} without its environment file: {}", identity, error);
            }
        }
    }

    /// Forget every use recorded by `top` in the chain-wide use index.
    pub(crate) fn remove_top_uses(&mut self, top: IndexedTopContext) {
        let Some(context) = self.tops.get(top) else {
            return;
        };
        for id in &context.declaration_table {
            if let Some(set) = self.uses.get(id) {
                let remaining = set.without(top.index());
                if remaining.is_empty() {
                    self.uses.remove(id);
                } else {
                    self.uses.insert(*id, remaining);
                }
            }
        }
    }

    /// Live top context stored at arena slot `index`.
    pub(crate) fn top_at(&self, index: u32) -> Option<IndexedTopContext> {
        self.tops.handle_at(index)
    }
}
