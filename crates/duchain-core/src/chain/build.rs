//! Graph mutations
//!
//! Everything a builder does to populate a document: opening contexts,
//! declaring, recording uses, attaching facets, and deleting what a re-parse
//! replaces. All of it requires the write lock.

use super::store::ChainStore;
use super::DUChain;
use crate::context::{ContextType, Use};
use crate::declaration::{
    ClassMemberFacet, Declaration, DeclarationFlags, DeclarationKind, FunctionFacet,
    TemplateParameterFacet,
};
use crate::declaration_id::DeclarationId;
use crate::error::{usage_error, DUChainError, Result};
use crate::identifier::{Identifier, QualifiedIdentifier};
use crate::indexed::{IndexedContext, IndexedDeclaration};
use crate::observer::{ChangeEvent, ChangeSubject, Modification, Relationship};
use crate::range::SimpleRange;
use crate::types::AbstractType;
use tracing::trace;

impl DUChain {
    /// Open a child context of `parent`. `local_scope_identifier` names the
    /// scope for namespaces and classes.
    pub fn open_context(
        &self,
        parent: IndexedContext,
        range: SimpleRange,
        context_type: ContextType,
        local_scope_identifier: Option<QualifiedIdentifier>,
    ) -> Result<IndexedContext> {
        self.require_write("open_context")?;
        let mut store = self.store.write();
        if store.accessible_context(parent).is_none() {
            return usage_error(DUChainError::InvalidHandle { kind: "context" });
        }
        let Some(context) = store.create_context(
            parent,
            range,
            context_type,
            local_scope_identifier.unwrap_or_default(),
            false,
        ) else {
            return usage_error(DUChainError::InvalidHandle { kind: "context" });
        };
        drop(store);

        self.notify(vec![ChangeEvent::context_changed(
            parent,
            Modification::Addition,
            Relationship::ChildContexts,
            Some(ChangeSubject::Context(context)),
        )]);
        Ok(context)
    }

    /// Declare `identifier` in `context`.
    pub fn declare(
        &self,
        context: IndexedContext,
        identifier: Identifier,
        range: SimpleRange,
        kind: DeclarationKind,
        abstract_type: Option<AbstractType>,
    ) -> Result<IndexedDeclaration> {
        self.require_write("declare")?;
        let mut store = self.store.write();
        if store.accessible_context(context).is_none() {
            return usage_error(DUChainError::InvalidHandle { kind: "context" });
        }
        let Some(declaration) = store.create_declaration(context, identifier, range, kind, false)
        else {
            return usage_error(DUChainError::InvalidHandle { kind: "context" });
        };
        if let Some(target) = store.declaration_mut(declaration) {
            target.abstract_type = abstract_type;
        }
        drop(store);

        self.notify(vec![ChangeEvent::context_changed(
            context,
            Modification::Addition,
            Relationship::LocalDeclarations,
            Some(ChangeSubject::Declaration(declaration)),
        )]);
        Ok(declaration)
    }

    pub fn set_type(
        &self,
        declaration: IndexedDeclaration,
        abstract_type: Option<AbstractType>,
    ) -> Result<()> {
        self.update_declaration("set_type", declaration, Relationship::Type, |target| {
            target.abstract_type = abstract_type;
        })
    }

    pub fn set_flags(
        &self,
        declaration: IndexedDeclaration,
        flags: DeclarationFlags,
    ) -> Result<()> {
        self.update_declaration("set_flags", declaration, Relationship::Identity, |target| {
            target.flags = flags;
        })
    }

    pub fn set_comment(
        &self,
        declaration: IndexedDeclaration,
        comment: Option<String>,
    ) -> Result<()> {
        self.update_declaration("set_comment", declaration, Relationship::Identity, |target| {
            target.comment = comment;
        })
    }

    pub fn set_class_member(
        &self,
        declaration: IndexedDeclaration,
        facet: Option<ClassMemberFacet>,
    ) -> Result<()> {
        self.update_declaration(
            "set_class_member",
            declaration,
            Relationship::Identity,
            |target| {
                target.class_member = facet;
            },
        )
    }

    pub fn set_function(
        &self,
        declaration: IndexedDeclaration,
        facet: Option<FunctionFacet>,
    ) -> Result<()> {
        self.update_declaration("set_function", declaration, Relationship::Identity, |target| {
            target.function = facet;
        })
    }

    pub fn set_template_parameter(
        &self,
        declaration: IndexedDeclaration,
        facet: Option<TemplateParameterFacet>,
    ) -> Result<()> {
        self.update_declaration(
            "set_template_parameter",
            declaration,
            Relationship::Identity,
            |target| {
                target.template_parameter = facet;
            },
        )
    }

    fn update_declaration(
        &self,
        operation: &'static str,
        declaration: IndexedDeclaration,
        relationship: Relationship,
        update: impl FnOnce(&mut Declaration),
    ) -> Result<()> {
        self.require_write(operation)?;
        let mut store = self.store.write();
        let Some(target) = store.accessible_declaration_mut(declaration) else {
            return usage_error(DUChainError::InvalidHandle {
                kind: "declaration",
            });
        };
        update(target);
        drop(store);

        self.notify(vec![ChangeEvent::declaration_changed(
            declaration,
            Modification::Change,
            relationship,
            None,
        )]);
        Ok(())
    }

    /// Set (or clear) the context `declaration` opens. The context's owner
    /// is updated accordingly.
    pub fn set_internal_context(
        &self,
        declaration: IndexedDeclaration,
        context: Option<IndexedContext>,
    ) -> Result<()> {
        self.require_write("set_internal_context")?;
        let mut guard = self.store.write();
        let store = &mut *guard;
        let Some(current) = store.accessible_declaration(declaration) else {
            return usage_error(DUChainError::InvalidHandle {
                kind: "declaration",
            });
        };
        let previous = current.internal_context;
        if previous == context {
            return Ok(());
        }
        if let Some(context) = context {
            if store.accessible_context(context).is_none() {
                return usage_error(DUChainError::InvalidHandle { kind: "context" });
            }
        }

        if let Some(previous) = previous.and_then(|previous| store.context_mut(previous)) {
            if previous.owner == Some(declaration) {
                previous.owner = None;
            }
        }
        if let Some(opened) = context.and_then(|context| store.context_mut(context)) {
            opened.owner = Some(declaration);
        }
        if let Some(target) = store.declaration_mut(declaration) {
            target.internal_context = context;
        }
        drop(guard);

        self.notify(vec![ChangeEvent::declaration_changed(
            declaration,
            Modification::Change,
            Relationship::InternalContext,
            context.map(ChangeSubject::Context),
        )]);
        Ok(())
    }

    /// Link the definition `definition` to the declaration it defines.
    pub fn set_declaration_of_definition(
        &self,
        definition: IndexedDeclaration,
        declaration: Option<DeclarationId>,
    ) -> Result<()> {
        self.require_write("set_declaration_of_definition")?;
        let mut guard = self.store.write();
        let store = &mut *guard;
        let Some(current) = store.accessible_declaration(definition) else {
            return usage_error(DUChainError::InvalidHandle {
                kind: "declaration",
            });
        };
        let previous = current.definition_of;
        if previous == declaration {
            return Ok(());
        }

        let mut events = Vec::new();
        if let Some(previous) = previous {
            remove_definition(store, previous, definition);
            events.push(ChangeEvent::definition_changed(
                definition,
                Modification::Removal,
                Relationship::Definition,
                previous.direct_declaration().map(ChangeSubject::Declaration),
            ));
        }
        if let Some(declaration) = declaration {
            let definitions = store.definitions.entry(declaration).or_default();
            if !definitions.contains(&definition) {
                definitions.push(definition);
            }
            events.push(ChangeEvent::definition_changed(
                definition,
                Modification::Addition,
                Relationship::Definition,
                declaration.direct_declaration().map(ChangeSubject::Declaration),
            ));
        }
        if let Some(target) = store.declaration_mut(definition) {
            target.definition_of = declaration;
        }
        drop(guard);

        self.notify(events);
        Ok(())
    }

    /// Record a use at `range` inside `context`. `None` records a use whose
    /// declaration could not be resolved. Returns the use's index within the
    /// context.
    pub fn record_use(
        &self,
        context: IndexedContext,
        range: SimpleRange,
        declaration: Option<DeclarationId>,
    ) -> Result<usize> {
        self.require_write("record_use")?;
        let mut guard = self.store.write();
        let store = &mut *guard;
        if store.accessible_context(context).is_none() {
            return usage_error(DUChainError::InvalidHandle { kind: "context" });
        }
        let Some(top) = store.tops.get_mut(context.top()) else {
            return usage_error(DUChainError::InvalidHandle {
                kind: "top context",
            });
        };

        let declaration_index = declaration.map(|id| top.declaration_index(id));
        if let Some(index) = declaration_index {
            top.uses_by_declaration.entry(index).or_default().push(range);
        }
        let Some(current) = top.contexts.get_mut(context.local()) else {
            return usage_error(DUChainError::InvalidHandle { kind: "context" });
        };
        current.uses.push(Use {
            range,
            declaration_index,
        });
        let index = current.uses.len() - 1;

        if let Some(id) = declaration {
            let top_index = context.top().index();
            let users = match store.uses.get(&id) {
                Some(users) => users.with(top_index),
                None => self.sets.create_set([top_index]),
            };
            store.uses.insert(id, users);
        }
        drop(guard);

        self.notify(vec![ChangeEvent::use_changed(
            context,
            index,
            Modification::Addition,
            declaration
                .and_then(|id| id.direct_declaration())
                .map(ChangeSubject::Declaration),
        )]);
        Ok(index)
    }

    /// Remove every use recorded in `context` (not in its children).
    pub fn delete_uses(&self, context: IndexedContext) -> Result<()> {
        self.require_write("delete_uses")?;
        let mut guard = self.store.write();
        if guard.accessible_context(context).is_none() {
            return usage_error(DUChainError::InvalidHandle { kind: "context" });
        }
        let mut events = Vec::new();
        self.forget_uses(&mut guard, context, &mut events);
        drop(guard);

        self.notify(events);
        Ok(())
    }

    /// Destroy all owned child contexts of `context` with everything they
    /// own.
    pub fn delete_child_contexts_recursively(&self, context: IndexedContext) -> Result<()> {
        self.require_write("delete_child_contexts_recursively")?;
        let mut guard = self.store.write();
        let store = &mut *guard;
        let Some(current) = store.accessible_context(context) else {
            return usage_error(DUChainError::InvalidHandle { kind: "context" });
        };
        let children = current.children.clone();

        let mut events = Vec::new();
        for child in children {
            self.delete_context(store, child, &mut events);
        }
        drop(guard);

        self.notify(events);
        Ok(())
    }

    pub fn delete_local_declarations(&self, context: IndexedContext) -> Result<()> {
        self.require_write("delete_local_declarations")?;
        let mut guard = self.store.write();
        let store = &mut *guard;
        let Some(current) = store.accessible_context(context) else {
            return usage_error(DUChainError::InvalidHandle { kind: "context" });
        };
        let declarations = current.local_declarations.clone();

        let mut events = Vec::new();
        for declaration in declarations {
            self.delete_declaration_internal(store, declaration, &mut events);
        }
        drop(guard);

        self.notify(events);
        Ok(())
    }

    /// Destroy `declaration` and its instantiations. The context it opens is
    /// owned by its parent scope and stays.
    pub fn delete_declaration(&self, declaration: IndexedDeclaration) -> Result<()> {
        self.require_write("delete_declaration")?;
        let mut guard = self.store.write();
        if guard.accessible_declaration(declaration).is_none() {
            return usage_error(DUChainError::InvalidHandle {
                kind: "declaration",
            });
        }
        let mut events = Vec::new();
        self.delete_declaration_internal(&mut guard, declaration, &mut events);
        drop(guard);

        self.notify(events);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Destroy `context` itself after its contents.
    pub(crate) fn delete_context(
        &self,
        store: &mut ChainStore,
        context: IndexedContext,
        events: &mut Vec<ChangeEvent>,
    ) {
        self.delete_context_contents(store, context, events);
        let Some(current) = store.context(context) else {
            return;
        };
        let parent = current.parent;
        let owner = current.owner;
        let anonymous = current.anonymous;
        let scope_identifier = current.scope_identifier.clone();

        if let Some(parent) = parent.filter(|_| !anonymous) {
            if let Some(parent_context) = store.context_mut(parent) {
                parent_context.children.retain(|child| *child != context);
            }
            events.push(ChangeEvent::context_changed(
                parent,
                Modification::Removal,
                Relationship::ChildContexts,
                Some(ChangeSubject::Context(context)),
            ));
        }
        if !scope_identifier.is_empty() {
            store.symbols.remove_context(&scope_identifier, context);
        }
        if let Some(owner) = owner.and_then(|owner| store.declaration_mut(owner)) {
            if owner.internal_context == Some(context) {
                owner.internal_context = None;
            }
        }
        self.release_context_index(context);
        if let Some(top) = store.tops.get_mut(context.top()) {
            top.contexts.remove(context.local());
        }
        events.push(ChangeEvent::context_changed(
            context,
            Modification::Deletion,
            Relationship::Identity,
            None,
        ));
    }

    /// Destroy children, local declarations, uses and import edges of
    /// `context`, leaving the context itself in place.
    pub(crate) fn delete_context_contents(
        &self,
        store: &mut ChainStore,
        context: IndexedContext,
        events: &mut Vec<ChangeEvent>,
    ) {
        let Some(current) = store.context(context) else {
            return;
        };
        let children = current.children.clone();
        let declarations = current.local_declarations.clone();

        for child in children {
            self.delete_context(store, child, events);
        }
        for declaration in declarations {
            self.delete_declaration_internal(store, declaration, events);
        }
        self.forget_uses(store, context, events);
        self.remove_all_import_edges(store, context, events);
    }

    pub(crate) fn delete_declaration_internal(
        &self,
        store: &mut ChainStore,
        declaration: IndexedDeclaration,
        events: &mut Vec<ChangeEvent>,
    ) {
        let Some(current) = store.declaration(declaration) else {
            return;
        };
        let context = current.context;
        let internal = current.internal_context;
        let anonymous = current.anonymous;
        let in_symbol_table = current.in_symbol_table;
        let qualified_identifier = current.qualified_identifier.clone();
        let definition_of = current.definition_of;
        let facet = current.template.clone();

        if let Some(facet) = facet {
            let instances: Vec<IndexedDeclaration> = facet
                .instantiations
                .values()
                .copied()
                .filter(|instance| {
                    *instance != declaration
                        && store
                            .declaration(*instance)
                            .is_some_and(|instance| instance.instantiated_from().is_some())
                })
                .collect();
            for instance in instances {
                self.delete_instantiation(store, instance, events);
            }

            match (facet.instantiated_from, facet.specialized_from) {
                (Some(_), Some(primary)) => forget_instantiation(store, primary, declaration),
                (None, Some(generic)) => {
                    self.forget_specialization(store, generic, declaration, events)
                }
                _ => {}
            }
        }

        if in_symbol_table {
            store.symbols.remove_declaration(&qualified_identifier, declaration);
        }
        if let Some(target) = definition_of {
            remove_definition(store, target, declaration);
        }
        if let Some(context) = context {
            if !anonymous {
                if let Some(owner_context) = store.context_mut(context) {
                    owner_context
                        .local_declarations
                        .retain(|local| *local != declaration);
                }
                events.push(ChangeEvent::context_changed(
                    context,
                    Modification::Removal,
                    Relationship::LocalDeclarations,
                    Some(ChangeSubject::Declaration(declaration)),
                ));
            }
        }
        if let Some(opened) = internal.and_then(|internal| store.context_mut(internal)) {
            if opened.owner == Some(declaration) {
                opened.owner = None;
            }
        }
        if let Some(top) = store.tops.get_mut(declaration.top()) {
            top.declarations.remove(declaration.local());
        }
        trace!("Deleted declaration {}", qualified_identifier);
        events.push(ChangeEvent::declaration_changed(
            declaration,
            Modification::Deletion,
            Relationship::Identity,
            None,
        ));
    }

    /// Destroy an instantiation with the anonymous contexts created for it.
    fn delete_instantiation(
        &self,
        store: &mut ChainStore,
        instance: IndexedDeclaration,
        events: &mut Vec<ChangeEvent>,
    ) {
        let Some(current) = store.declaration(instance) else {
            return;
        };
        let created = |context: Option<IndexedContext>| {
            context.filter(|context| store.context(*context).is_some_and(|c| c.anonymous))
        };
        let internal = created(current.internal_context);
        let parameters = created(current.template().and_then(|facet| facet.parameters_context));

        self.delete_declaration_internal(store, instance, events);
        for context in [internal, parameters].into_iter().flatten() {
            self.delete_context(store, context, events);
        }
    }

    /// Unregister the explicit specialization `specialization` from
    /// `generic`, dropping instantiations that were built from it.
    fn forget_specialization(
        &self,
        store: &mut ChainStore,
        generic: IndexedDeclaration,
        specialization: IndexedDeclaration,
        events: &mut Vec<ChangeEvent>,
    ) {
        let Some(facet) = store
            .declaration_mut(generic)
            .and_then(|generic| generic.template.as_deref_mut())
        else {
            return;
        };
        facet.specializations.retain(|other| *other != specialization);
        facet
            .instantiations
            .retain(|_, instance| *instance != specialization);
        let derived: Vec<IndexedDeclaration> = facet.instantiations.values().copied().collect();

        for instance in derived {
            let built_from_specialization = store
                .declaration(instance)
                .is_some_and(|instance| instance.instantiated_from() == Some(specialization));
            if built_from_specialization {
                self.delete_instantiation(store, instance, events);
            }
        }
        events.push(ChangeEvent::declaration_changed(
            generic,
            Modification::Removal,
            Relationship::Specializations,
            Some(ChangeSubject::Declaration(specialization)),
        ));
    }

    /// Remove the uses recorded in `context` from the per-document and
    /// chain-wide use indices.
    fn forget_uses(
        &self,
        store: &mut ChainStore,
        context: IndexedContext,
        events: &mut Vec<ChangeEvent>,
    ) {
        let Some(top) = store.tops.get_mut(context.top()) else {
            return;
        };
        let Some(current) = top.contexts.get_mut(context.local()) else {
            return;
        };
        let uses = std::mem::take(&mut current.uses);

        let mut unused = Vec::new();
        for recorded in &uses {
            let Some(index) = recorded.declaration_index else {
                continue;
            };
            let Some(ranges) = top.uses_by_declaration.get_mut(&index) else {
                continue;
            };
            if let Some(position) = ranges.iter().position(|range| *range == recorded.range) {
                ranges.remove(position);
            }
            if ranges.is_empty() {
                top.uses_by_declaration.remove(&index);
                if let Some(id) = top.declaration_table.get(index as usize) {
                    unused.push(*id);
                }
            }
        }

        let top_index = context.top().index();
        for id in unused {
            if let Some(users) = store.uses.get(&id) {
                let remaining = users.without(top_index);
                if remaining.is_empty() {
                    store.uses.remove(&id);
                } else {
                    store.uses.insert(id, remaining);
                }
            }
        }
        for index in 0..uses.len() {
            events.push(ChangeEvent::use_changed(
                context,
                index,
                Modification::Removal,
                None,
            ));
        }
    }
}

fn remove_definition(
    store: &mut ChainStore,
    target: DeclarationId,
    definition: IndexedDeclaration,
) {
    if let Some(definitions) = store.definitions.get_mut(&target) {
        definitions.retain(|existing| *existing != definition);
        if definitions.is_empty() {
            store.definitions.remove(&target);
        }
    }
}

fn forget_instantiation(
    store: &mut ChainStore,
    primary: IndexedDeclaration,
    instance: IndexedDeclaration,
) {
    if let Some(facet) = store
        .declaration_mut(primary)
        .and_then(|primary| primary.template.as_deref_mut())
    {
        facet.instantiations.retain(|_, cached| *cached != instance);
    }
}
