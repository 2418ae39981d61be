//! Read-side queries
//!
//! Name lookup, identity resolution, use queries and consistency checking.
//! Everything here requires at least the read lock. Nothing holds the store
//! guard across a call that may instantiate a template, since instantiation
//! takes the store write guard itself.

use super::store::ChainStore;
use super::DUChain;
use crate::context::{ContextType, DUContext, Import};
use crate::declaration::{Declaration, DeclarationKind};
use crate::declaration_id::DeclarationId;
use crate::identifier::{Identifier, QualifiedIdentifier, TypeIdentifier};
use crate::indexed::{IndexedContext, IndexedDeclaration, IndexedTopContext};
use crate::interner::IndexedString;
use crate::range::{SimpleCursor, SimpleRange};
use crate::top_context::TopDUContext;
use crate::types::{AbstractType, IdentifiedType, TypeModifiers};
use std::collections::{BTreeMap, HashSet};

impl DUChain {
    // ========================================================================
    // Object access
    // ========================================================================

    /// Run `f` on a top context. `f` must not call back into the chain.
    pub fn with_top<R>(
        &self,
        top: IndexedTopContext,
        f: impl FnOnce(&TopDUContext) -> R,
    ) -> Option<R> {
        self.check_read("with_top");
        let store = self.store.read();
        store.accessible_top(top).map(f)
    }

    /// Run `f` on a context. `f` must not call back into the chain.
    pub fn with_context<R>(
        &self,
        context: IndexedContext,
        f: impl FnOnce(&DUContext) -> R,
    ) -> Option<R> {
        self.check_read("with_context");
        let store = self.store.read();
        store.accessible_context(context).map(f)
    }

    /// Run `f` on a declaration. `f` must not call back into the chain.
    pub fn with_declaration<R>(
        &self,
        declaration: IndexedDeclaration,
        f: impl FnOnce(&Declaration) -> R,
    ) -> Option<R> {
        self.check_read("with_declaration");
        let store = self.store.read();
        store.accessible_declaration(declaration).map(f)
    }

    pub fn root_context(&self, top: IndexedTopContext) -> Option<IndexedContext> {
        self.with_top(top, TopDUContext::root_context)
    }

    pub fn child_contexts(&self, context: IndexedContext) -> Vec<IndexedContext> {
        self.with_context(context, |context| context.children.clone())
            .unwrap_or_default()
    }

    pub fn local_declarations(&self, context: IndexedContext) -> Vec<IndexedDeclaration> {
        self.with_context(context, |context| context.local_declarations.clone())
            .unwrap_or_default()
    }

    pub fn imported_parent_contexts(&self, context: IndexedContext) -> Vec<Import> {
        self.with_context(context, |context| context.imported_parents.clone())
            .unwrap_or_default()
    }

    pub fn declaration_id(&self, declaration: IndexedDeclaration) -> Option<DeclarationId> {
        self.with_declaration(declaration, Declaration::id)
    }

    /// Innermost context below `context` whose range contains `position`.
    pub fn find_context_at(&self, context: IndexedContext, position: SimpleCursor) -> IndexedContext {
        self.check_read("find_context_at");
        let store = self.store.read();
        let mut current = context;
        while let Some(inner) = store.accessible_context(current).and_then(|outer| {
            outer.children.iter().copied().find(|child| {
                store
                    .context(*child)
                    .is_some_and(|child| child.range.contains(position))
            })
        }) {
            current = inner;
        }
        current
    }

    // ========================================================================
    // Name lookup
    // ========================================================================

    /// Declarations named `identifier` local to `context` and visible at
    /// `position`. Imports and parents are not searched.
    pub fn find_local_declarations(
        &self,
        context: IndexedContext,
        identifier: &Identifier,
        position: SimpleCursor,
    ) -> Vec<IndexedDeclaration> {
        self.check_read("find_local_declarations");
        let found = {
            let store = self.store.read();
            let mut found = Vec::new();
            self.local_matches(&store, context, identifier.name(), position, &mut found);
            found
        };
        self.apply_template_arguments(context, found, identifier, position)
    }

    /// Declarations visible at `position` in `context` under `identifier`.
    ///
    /// Unqualified names collect matches from every enclosing scope and the
    /// contexts they import, nearest first. Qualified names resolve their
    /// first segment in the nearest scope that knows it and the remaining
    /// segments inside the scopes found. Segments with template arguments
    /// are instantiated.
    pub fn find_declarations(
        &self,
        context: IndexedContext,
        identifier: &QualifiedIdentifier,
        position: SimpleCursor,
    ) -> Vec<IndexedDeclaration> {
        self.check_read("find_declarations");
        let segments = identifier.segments();
        let Some(first) = segments.first() else {
            return Vec::new();
        };

        let (found, mut scopes) = {
            let store = self.store.read();
            if store.accessible_context(context).is_none() {
                return Vec::new();
            }
            let levels: Vec<IndexedContext> = if identifier.explicitly_global() {
                store.root_of(context.top()).into_iter().collect()
            } else {
                scope_chain(&store, context)
            };

            let mut found = Vec::new();
            let mut scopes = Vec::new();
            for level in levels {
                let level_position = if identifier.explicitly_global() {
                    SimpleCursor::invalid()
                } else {
                    position
                };
                for (scope, scope_position) in self.visible_scopes(&store, level, level_position) {
                    self.local_matches(&store, scope, first.name(), scope_position, &mut found);
                    if segments.len() > 1 {
                        scope_contexts(&store, scope, first, &mut scopes);
                    }
                }
                if segments.len() > 1 && !(found.is_empty() && scopes.is_empty()) {
                    break;
                }
            }
            (found, scopes)
        };

        let mut found = self.apply_template_arguments(context, found, first, position);
        for (index, segment) in segments.iter().enumerate().skip(1) {
            let (matches, nested) = {
                let store = self.store.read();
                scopes.extend(
                    found
                        .iter()
                        .filter_map(|declaration| self.logical_internal_in(&store, *declaration, None)),
                );
                dedup_in_order(&mut scopes);

                let mut matches = Vec::new();
                let mut nested = Vec::new();
                for scope in &scopes {
                    for (visible, _) in self.visible_scopes(&store, *scope, SimpleCursor::invalid()) {
                        self.local_matches(
                            &store,
                            visible,
                            segment.name(),
                            SimpleCursor::invalid(),
                            &mut matches,
                        );
                        if index + 1 < segments.len() {
                            scope_contexts(&store, visible, segment, &mut nested);
                        }
                    }
                }
                (matches, nested)
            };
            found = self.apply_template_arguments(context, matches, segment, position);
            scopes = nested;
        }
        found
    }

    /// Contexts of `context_type` named `identifier` as seen from `context`.
    ///
    /// Scope contexts are found through the symbol table; the nearest
    /// enclosing scope that yields a match wins. Contexts in documents that
    /// are neither the current one nor imported by it are ignored.
    pub fn find_contexts(
        &self,
        context: IndexedContext,
        context_type: ContextType,
        identifier: &QualifiedIdentifier,
    ) -> Vec<IndexedContext> {
        self.check_read("find_contexts");
        if identifier.is_empty() {
            return Vec::new();
        }
        let store = self.store.read();
        if store.accessible_context(context).is_none() {
            return Vec::new();
        }
        let visible_documents = self.visible_documents(&store, context.top());

        let levels: Vec<IndexedContext> = if identifier.explicitly_global() {
            store.root_of(context.top()).into_iter().collect()
        } else {
            scope_chain(&store, context)
        };
        for level in levels {
            let Some(scope) = store.context(level) else {
                continue;
            };
            let full = &scope.scope_identifier + identifier;
            let mut found: Vec<IndexedContext> = store
                .symbols
                .contexts(&full)
                .iter()
                .copied()
                .filter(|candidate| visible_documents.contains(&candidate.top()))
                .filter(|candidate| {
                    store
                        .accessible_context(*candidate)
                        .is_some_and(|candidate| candidate.context_type == context_type)
                })
                .collect();
            if identifier.count() == 1 {
                if let Some(last) = identifier.last() {
                    let mut local = Vec::new();
                    scope_contexts(&store, level, last, &mut local);
                    found.extend(local.into_iter().filter(|candidate| {
                        store
                            .context(*candidate)
                            .is_some_and(|candidate| candidate.context_type == context_type)
                    }));
                }
            }
            dedup_in_order(&mut found);
            if !found.is_empty() {
                return found;
            }
        }
        Vec::new()
    }

    /// Resolve a spelled type at `position` in `context`.
    ///
    /// Builtin names map to integral types, names of type declarations to
    /// their type; anything else stays [`AbstractType::Delayed`].
    pub fn resolve_type_identifier(
        &self,
        context: IndexedContext,
        identifier: &TypeIdentifier,
        position: SimpleCursor,
    ) -> AbstractType {
        let qualified = identifier.qualified_identifier();
        let plain = qualified.count() == 1
            && !qualified.explicitly_global()
            && qualified
                .first()
                .is_some_and(|segment| !segment.has_template_arguments_list());
        if plain {
            if let Some(builtin) = AbstractType::builtin(&qualified.to_string()) {
                return builtin.decorated_like(identifier);
            }
        }

        let found = self.find_declarations(context, qualified, position);
        let store = self.store.read();
        let resolved = found
            .iter()
            .filter_map(|declaration| store.declaration(*declaration))
            .find(|declaration| declaration.kind == DeclarationKind::Type);
        match resolved {
            Some(declaration) => {
                let abstract_type = declaration.abstract_type.clone().unwrap_or_else(|| {
                    AbstractType::Identified(IdentifiedType {
                        qualified_identifier: declaration.qualified_identifier.clone(),
                        declaration: Some(declaration.id()),
                        modifiers: TypeModifiers::empty(),
                    })
                });
                abstract_type.decorated_like(identifier)
            }
            None => AbstractType::Delayed {
                identifier: identifier.clone(),
            },
        }
    }

    /// Declarations registered in the symbol table under `identifier`.
    pub fn symbol_table_declarations(
        &self,
        identifier: &QualifiedIdentifier,
    ) -> Vec<IndexedDeclaration> {
        self.check_read("symbol_table_declarations");
        let store = self.store.read();
        store
            .symbols
            .declarations(identifier)
            .iter()
            .copied()
            .filter(|declaration| store.accessible_declaration(*declaration).is_some())
            .collect()
    }

    // ========================================================================
    // Identity
    // ========================================================================

    /// The declaration `id` currently stands for.
    ///
    /// Indirect ids prefer real declarations over forward declarations and
    /// over definitions linked to another declaration, then declarations
    /// from `top`, then from documents imported by `top`.
    /// Specialized ids are re-instantiated.
    pub fn resolve_declaration_id(
        &self,
        id: &DeclarationId,
        top: Option<IndexedTopContext>,
    ) -> Option<IndexedDeclaration> {
        self.check_read("resolve_declaration_id");
        let base = {
            let store = self.store.read();
            match id.direct_declaration() {
                Some(direct) => store.accessible_declaration(direct).map(|_| direct),
                None => {
                    let visible = top
                        .map(|top| self.visible_documents(&store, top))
                        .unwrap_or_default();
                    self.indirect_candidates(&store, id)
                        .into_iter()
                        .min_by_key(|candidate| {
                            let current = store.declaration(*candidate);
                            let forward = current.is_some_and(Declaration::is_forward_declaration);
                            let linked_definition =
                                current.is_some_and(|current| current.definition_of.is_some());
                            let local = Some(candidate.top()) == top;
                            let imported = visible.contains(&candidate.top());
                            (forward, linked_definition, !local, !imported, *candidate)
                        })
                }
            }
        }?;

        if id.specialization().is_empty() {
            Some(base)
        } else {
            self.specialize(base, id.specialization())
        }
    }

    /// Every declaration `id` may stand for.
    pub fn declarations_for_id(&self, id: &DeclarationId) -> Vec<IndexedDeclaration> {
        self.check_read("declarations_for_id");
        let candidates = {
            let store = self.store.read();
            match id.direct_declaration() {
                Some(direct) => store
                    .accessible_declaration(direct)
                    .map(|_| vec![direct])
                    .unwrap_or_default(),
                None => self.indirect_candidates(&store, id),
            }
        };
        if id.specialization().is_empty() {
            return candidates;
        }
        candidates
            .into_iter()
            .filter_map(|candidate| self.specialize(candidate, id.specialization()))
            .collect()
    }

    /// The full declaration a forward declaration stands for, preferring
    /// `top` (default: the forward declaration's document) and documents it
    /// imports. `None` for anything that is not a forward declaration.
    pub fn resolve_forward_declaration(
        &self,
        declaration: IndexedDeclaration,
        top: Option<IndexedTopContext>,
    ) -> Option<IndexedDeclaration> {
        self.check_read("resolve_forward_declaration");
        let store = self.store.read();
        self.resolve_forward_in(&store, declaration, top)
    }

    /// The context `declaration` opens; for forward declarations the one
    /// opened by the resolved declaration.
    pub fn logical_internal_context(
        &self,
        declaration: IndexedDeclaration,
        top: Option<IndexedTopContext>,
    ) -> Option<IndexedContext> {
        self.check_read("logical_internal_context");
        let store = self.store.read();
        self.logical_internal_in(&store, declaration, top)
    }

    // ========================================================================
    // Definitions
    // ========================================================================

    /// Definitions linked to `id`.
    pub fn definitions(&self, id: &DeclarationId) -> Vec<IndexedDeclaration> {
        self.check_read("definitions");
        let store = self.store.read();
        store
            .definitions
            .get(id)
            .map(|definitions| {
                definitions
                    .iter()
                    .copied()
                    .filter(|definition| store.accessible_declaration(*definition).is_some())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// First definition of `declaration`.
    pub fn definition(&self, declaration: IndexedDeclaration) -> Option<IndexedDeclaration> {
        let id = self.declaration_id(declaration)?;
        self.definitions(&id).into_iter().next()
    }

    /// The declaration the definition `definition` defines.
    pub fn declaration_of_definition(
        &self,
        definition: IndexedDeclaration,
        top: Option<IndexedTopContext>,
    ) -> Option<IndexedDeclaration> {
        let id = self.with_declaration(definition, |definition| definition.definition_of)??;
        self.resolve_declaration_id(&id, top.or(Some(definition.top())))
    }

    // ========================================================================
    // Uses
    // ========================================================================

    /// Ranges of the uses of `id`, per using document.
    pub fn uses_of(&self, id: &DeclarationId) -> BTreeMap<IndexedTopContext, Vec<SimpleRange>> {
        self.check_read("uses_of");
        let store = self.store.read();
        let mut uses = BTreeMap::new();
        let Some(users) = store.uses.get(id) else {
            return uses;
        };
        for index in users.iter() {
            let Some(top) = store.top_at(index) else {
                continue;
            };
            let Some(document) = store.accessible_top(top) else {
                continue;
            };
            let ranges = document.uses_of(id);
            if !ranges.is_empty() {
                uses.insert(top, ranges.to_vec());
            }
        }
        uses
    }

    pub fn declaration_uses(
        &self,
        declaration: IndexedDeclaration,
    ) -> BTreeMap<IndexedTopContext, Vec<SimpleRange>> {
        match self.declaration_id(declaration) {
            Some(id) => self.uses_of(&id),
            None => BTreeMap::new(),
        }
    }

    /// Total number of uses of `id` over all documents.
    pub fn use_count(&self, id: &DeclarationId) -> usize {
        self.uses_of(id).values().map(Vec::len).sum()
    }

    /// Documents (by top context) that use `id`.
    pub fn using_documents(&self, id: &DeclarationId) -> Vec<IndexedTopContext> {
        self.uses_of(id).into_keys().collect()
    }

    // ========================================================================
    // Consistency
    // ========================================================================

    /// Check the internal indices against the graph. Returns one message per
    /// inconsistency; empty means consistent.
    pub fn self_analysis(&self) -> Vec<String> {
        self.check_read("self_analysis");
        let store = self.store.read();
        let mut problems = Vec::new();

        for (key, declarations) in store.symbols.iter_declarations() {
            for handle in declarations {
                match store.declaration(*handle) {
                    None => problems.push(format!("symbol table entry {} is stale", key)),
                    Some(declaration) => {
                        if !declaration.in_symbol_table {
                            problems.push(format!(
                                "{} listed under {} but not marked as in the symbol table",
                                declaration.qualified_identifier, key
                            ));
                        }
                        if declaration.qualified_identifier.relative().index() != key {
                            problems.push(format!(
                                "{} listed under {}",
                                declaration.qualified_identifier, key
                            ));
                        }
                    }
                }
            }
        }

        for (_, document) in store.tops.iter() {
            for (_, context) in document.contexts.iter() {
                self.check_context(&store, document, context, &mut problems);
            }
            for (_, declaration) in document.declarations.iter() {
                if declaration.in_symbol_table
                    && !store
                        .symbols
                        .declarations(&declaration.qualified_identifier)
                        .contains(&declaration.handle)
                {
                    problems.push(format!(
                        "{} missing from the symbol table",
                        declaration.qualified_identifier
                    ));
                }
                let listed = declaration
                    .context
                    .and_then(|context| store.context(context))
                    .map(|context| {
                        context
                            .local_declarations
                            .iter()
                            .filter(|local| **local == declaration.handle)
                            .count()
                    });
                match listed {
                    None => problems.push(format!(
                        "{} has no owning context",
                        declaration.qualified_identifier
                    )),
                    Some(count) if !declaration.anonymous && count != 1 => problems.push(format!(
                        "{} listed {} times in its context",
                        declaration.qualified_identifier, count
                    )),
                    _ => {}
                }
            }
        }
        problems
    }

    fn check_context(
        &self,
        store: &ChainStore,
        document: &TopDUContext,
        context: &DUContext,
        problems: &mut Vec<String>,
    ) {
        let name = format!("{}:{:?}", document.identity, context.handle);
        if let Some(parent) = context.parent {
            let listed = store
                .context(parent)
                .is_some_and(|parent| parent.children.contains(&context.handle));
            if listed == context.anonymous {
                problems.push(format!("{} has an inconsistent parent link", name));
            }
        }
        for child in &context.children {
            if store.context(*child).and_then(|child| child.parent) != Some(context.handle) {
                problems.push(format!("{} lists a child it does not own", name));
            }
        }
        for declaration in &context.local_declarations {
            if store.declaration(*declaration).and_then(|d| d.context) != Some(context.handle) {
                problems.push(format!("{} lists a foreign declaration", name));
            }
        }
        for import in &context.imported_parents {
            let mirrored = store
                .context(import.context)
                .is_some_and(|imported| imported.importers.contains(&context.handle));
            if !mirrored {
                problems.push(format!("{} has an unmirrored import", name));
            }
        }
        for importer in &context.importers {
            let mirrored = store
                .context(*importer)
                .is_some_and(|importer| importer.imports_directly(context.handle));
            if !mirrored {
                problems.push(format!("{} has a stale importer", name));
            }
        }
        for recorded in &context.uses {
            if let Some(index) = recorded.declaration_index {
                if index as usize >= document.declaration_table.len() {
                    problems.push(format!("{} has a use outside the declaration table", name));
                }
            }
        }
    }

    // ========================================================================
    // Lookup internals
    // ========================================================================

    /// `level` followed by every context it imports, depth first without
    /// repetition. Direct imports are filtered by `position`; the position
    /// does not apply beyond them.
    fn visible_scopes(
        &self,
        store: &ChainStore,
        level: IndexedContext,
        position: SimpleCursor,
    ) -> Vec<(IndexedContext, SimpleCursor)> {
        let mut visible = vec![(level, position)];
        let mut seen = HashSet::from([level]);
        let Some(context) = store.accessible_context(level) else {
            return visible;
        };
        for import in &context.imported_parents {
            if import.is_visible_at(position) {
                collect_imports(store, import.context, &mut seen, &mut visible);
            }
        }
        visible
    }

    /// Append the declarations local to `scope` named `name` and visible at
    /// `position`. Explicit specializations are never found by name.
    fn local_matches(
        &self,
        store: &ChainStore,
        scope: IndexedContext,
        name: IndexedString,
        position: SimpleCursor,
        found: &mut Vec<IndexedDeclaration>,
    ) {
        let Some(context) = store.accessible_context(scope) else {
            return;
        };
        for handle in &context.local_declarations {
            let Some(declaration) = store.declaration(*handle) else {
                continue;
            };
            if declaration.identifier.name() == name
                && !declaration.is_explicit_specialization()
                && self.visibility.is_visible(declaration, context, position)
                && !found.contains(handle)
            {
                found.push(*handle);
            }
        }
    }

    /// Instantiate the templates among `candidates` when `segment` carries
    /// a template argument list; otherwise return them unchanged.
    fn apply_template_arguments(
        &self,
        context: IndexedContext,
        candidates: Vec<IndexedDeclaration>,
        segment: &Identifier,
        position: SimpleCursor,
    ) -> Vec<IndexedDeclaration> {
        if !segment.has_template_arguments_list() || candidates.is_empty() {
            return candidates;
        }
        let arguments: Vec<AbstractType> = segment
            .template_identifiers()
            .iter()
            .map(|argument| self.resolve_type_identifier(context, argument, position))
            .collect();

        let templates: Vec<IndexedDeclaration> = {
            let store = self.store.read();
            candidates
                .into_iter()
                .filter(|candidate| {
                    store
                        .declaration(*candidate)
                        .is_some_and(Declaration::is_template)
                })
                .collect()
        };
        let mut instances: Vec<IndexedDeclaration> = templates
            .into_iter()
            .filter_map(|template| self.instantiate(template, arguments.clone()))
            .collect();
        dedup_in_order(&mut instances);
        instances
    }

    fn indirect_candidates(&self, store: &ChainStore, id: &DeclarationId) -> Vec<IndexedDeclaration> {
        let Some(identifier) = id.qualified_identifier() else {
            return Vec::new();
        };
        store
            .symbols
            .declarations(&identifier)
            .iter()
            .copied()
            .filter(|candidate| {
                store
                    .accessible_declaration(*candidate)
                    .is_some_and(|candidate| {
                        candidate.additional_identity() == id.additional_identity()
                    })
            })
            .collect()
    }

    /// `top` and every document whose root its root imports.
    fn visible_documents(
        &self,
        store: &ChainStore,
        top: IndexedTopContext,
    ) -> HashSet<IndexedTopContext> {
        let mut documents = HashSet::from([top]);
        if let Some(root) = store.root_of(top) {
            documents.extend(
                self.closure_set(store, root)
                    .iter()
                    .filter_map(|index| self.context_at(index))
                    .map(|context| context.top()),
            );
        }
        documents
    }

    pub(crate) fn resolve_forward_in(
        &self,
        store: &ChainStore,
        declaration: IndexedDeclaration,
        top: Option<IndexedTopContext>,
    ) -> Option<IndexedDeclaration> {
        let forward = store.accessible_declaration(declaration)?;
        if !forward.is_forward_declaration() {
            return None;
        }
        let top = top.unwrap_or(declaration.top());
        let visible = self.visible_documents(store, top);
        let additional_identity = forward.additional_identity();

        store
            .symbols
            .declarations(&forward.qualified_identifier)
            .iter()
            .copied()
            .filter(|candidate| *candidate != declaration)
            .filter(|candidate| {
                store.accessible_declaration(*candidate).is_some_and(|candidate| {
                    !candidate.is_forward_declaration()
                        && candidate.kind == forward.kind
                        && candidate.additional_identity() == additional_identity
                })
            })
            .min_by_key(|candidate| {
                let local = candidate.top() == top;
                let imported = visible.contains(&candidate.top());
                (!local, !imported, *candidate)
            })
    }

    pub(crate) fn logical_internal_in(
        &self,
        store: &ChainStore,
        declaration: IndexedDeclaration,
        top: Option<IndexedTopContext>,
    ) -> Option<IndexedContext> {
        let current = store.accessible_declaration(declaration)?;
        if current.is_forward_declaration() {
            let resolved = self.resolve_forward_in(store, declaration, top)?;
            return store.declaration(resolved)?.internal_context;
        }
        current.internal_context
    }
}

/// `context` and its parents up to the document root.
fn scope_chain(store: &ChainStore, context: IndexedContext) -> Vec<IndexedContext> {
    let mut chain = Vec::new();
    let mut current = Some(context);
    while let Some(level) = current {
        chain.push(level);
        current = store.context(level).and_then(|context| context.parent);
    }
    chain
}

fn collect_imports(
    store: &ChainStore,
    context: IndexedContext,
    seen: &mut HashSet<IndexedContext>,
    visible: &mut Vec<(IndexedContext, SimpleCursor)>,
) {
    if !seen.insert(context) {
        return;
    }
    let Some(imported) = store.accessible_context(context) else {
        return;
    };
    visible.push((context, SimpleCursor::invalid()));
    for import in &imported.imported_parents {
        collect_imports(store, import.context, seen, visible);
    }
}

/// Child scopes of `scope` that qualified lookup can step into under
/// `segment`.
fn scope_contexts(
    store: &ChainStore,
    scope: IndexedContext,
    segment: &Identifier,
    found: &mut Vec<IndexedContext>,
) {
    // Instantiated scopes are reached through the instance's internal context.
    if segment.has_template_arguments_list() {
        return;
    }
    let Some(context) = store.accessible_context(scope) else {
        return;
    };
    let name = QualifiedIdentifier::from_identifier(segment.clone());
    for child in &context.children {
        let Some(child_context) = store.context(*child) else {
            continue;
        };
        let steppable = matches!(
            child_context.context_type,
            ContextType::Namespace | ContextType::Class | ContextType::Helper
        );
        if steppable && child_context.local_scope_identifier == name && !found.contains(child) {
            found.push(*child);
        }
    }
}

fn dedup_in_order<T: Copy + Eq + std::hash::Hash>(items: &mut Vec<T>) {
    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(*item));
}
