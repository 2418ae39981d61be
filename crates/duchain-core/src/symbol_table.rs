//! Chain-wide symbol table
//!
//! Maps qualified identifiers (without a leading `::`) to the declarations
//! and scope contexts reachable under them, across all documents. Entries are
//! added when a declaration is created in a symbol-table scope and removed
//! when it is destroyed.

use crate::identifier::{IndexedQualifiedIdentifier, QualifiedIdentifier};
use crate::indexed::{IndexedContext, IndexedDeclaration};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct SymbolTable {
    declarations: HashMap<IndexedQualifiedIdentifier, Vec<IndexedDeclaration>>,
    contexts: HashMap<IndexedQualifiedIdentifier, Vec<IndexedContext>>,
}

fn key(identifier: &QualifiedIdentifier) -> IndexedQualifiedIdentifier {
    identifier.relative().index()
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_declaration(
        &mut self,
        identifier: &QualifiedIdentifier,
        declaration: IndexedDeclaration,
    ) {
        let entries = self.declarations.entry(key(identifier)).or_default();
        if !entries.contains(&declaration) {
            entries.push(declaration);
        }
    }

    pub fn remove_declaration(
        &mut self,
        identifier: &QualifiedIdentifier,
        declaration: IndexedDeclaration,
    ) {
        let key = key(identifier);
        if let Some(entries) = self.declarations.get_mut(&key) {
            entries.retain(|existing| *existing != declaration);
            if entries.is_empty() {
                self.declarations.remove(&key);
            }
        }
    }

    pub fn declarations(&self, identifier: &QualifiedIdentifier) -> &[IndexedDeclaration] {
        self.declarations_by_key(key(identifier))
    }

    pub fn declarations_by_key(&self, key: IndexedQualifiedIdentifier) -> &[IndexedDeclaration] {
        self.declarations
            .get(&key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn add_context(&mut self, identifier: &QualifiedIdentifier, context: IndexedContext) {
        let entries = self.contexts.entry(key(identifier)).or_default();
        if !entries.contains(&context) {
            entries.push(context);
        }
    }

    pub fn remove_context(&mut self, identifier: &QualifiedIdentifier, context: IndexedContext) {
        let key = key(identifier);
        if let Some(entries) = self.contexts.get_mut(&key) {
            entries.retain(|existing| *existing != context);
            if entries.is_empty() {
                self.contexts.remove(&key);
            }
        }
    }

    pub fn contexts(&self, identifier: &QualifiedIdentifier) -> &[IndexedContext] {
        self.contexts
            .get(&key(identifier))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn iter_declarations(
        &self,
    ) -> impl Iterator<Item = (IndexedQualifiedIdentifier, &[IndexedDeclaration])> {
        self.declarations
            .iter()
            .map(|(key, entries)| (*key, entries.as_slice()))
    }

    pub fn iter_contexts(
        &self,
    ) -> impl Iterator<Item = (IndexedQualifiedIdentifier, &[IndexedContext])> {
        self.contexts
            .iter()
            .map(|(key, entries)| (*key, entries.as_slice()))
    }

    /// Number of distinct identifiers with declarations.
    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty() && self.contexts.is_empty()
    }

    pub fn clear(&mut self) {
        self.declarations.clear();
        self.contexts.clear();
    }
}
