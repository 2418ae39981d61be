//! Contexts (scopes)
//!
//! A [`DUContext`] is a lexical scope inside one document. Contexts form an
//! ownership tree through `parent`/`children` and a visibility DAG through
//! imported parent contexts. Both directions of the import relation are
//! stored so invalidation can reach every importer.

use crate::identifier::QualifiedIdentifier;
use crate::indexed::{IndexedContext, IndexedDeclaration};
use crate::range::{SimpleCursor, SimpleRange};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextType {
    /// The root scope of a document.
    Global,
    Namespace,
    Class,
    Function,
    /// Template parameter list.
    Template,
    Enum,
    /// Scope that does not open a language scope but groups declarations
    /// (e.g. `extern "C"` blocks); looked through by qualified lookup.
    Helper,
    #[default]
    Other,
}

impl ContextType {
    /// Whether declarations directly inside such a context can be found by
    /// qualified identifier from anywhere.
    pub fn is_symbol_table_scope(&self) -> bool {
        matches!(
            self,
            ContextType::Global | ContextType::Namespace | ContextType::Class | ContextType::Helper
        )
    }
}

/// An imported parent context, visible from `position` onwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Import {
    pub context: IndexedContext,
    /// Invalid means visible throughout the importing context.
    pub position: SimpleCursor,
}

impl Import {
    pub fn new(context: IndexedContext, position: SimpleCursor) -> Self {
        Self { context, position }
    }

    /// Whether the import is in effect at `position`.
    pub fn is_visible_at(&self, position: SimpleCursor) -> bool {
        !position.is_valid() || !self.position.is_valid() || self.position <= position
    }
}

/// A reference to a declaration at a source range.
///
/// `declaration_index` points into the owning top context's declaration
/// table; `None` marks a use whose declaration could not be resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Use {
    pub range: SimpleRange,
    pub declaration_index: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct DUContext {
    pub(crate) handle: IndexedContext,
    pub(crate) context_type: ContextType,
    pub(crate) range: SimpleRange,
    pub(crate) parent: Option<IndexedContext>,
    pub(crate) children: Vec<IndexedContext>,
    pub(crate) imported_parents: Vec<Import>,
    pub(crate) importers: Vec<IndexedContext>,
    pub(crate) local_declarations: Vec<IndexedDeclaration>,
    pub(crate) local_scope_identifier: QualifiedIdentifier,
    pub(crate) scope_identifier: QualifiedIdentifier,
    pub(crate) owner: Option<IndexedDeclaration>,
    pub(crate) uses: Vec<Use>,
    pub(crate) anonymous: bool,
}

impl DUContext {
    pub(crate) fn new(
        handle: IndexedContext,
        context_type: ContextType,
        range: SimpleRange,
        parent: Option<IndexedContext>,
    ) -> Self {
        Self {
            handle,
            context_type,
            range,
            parent,
            children: Vec::new(),
            imported_parents: Vec::new(),
            importers: Vec::new(),
            local_declarations: Vec::new(),
            local_scope_identifier: QualifiedIdentifier::new(),
            scope_identifier: QualifiedIdentifier::new(),
            owner: None,
            uses: Vec::new(),
            anonymous: false,
        }
    }

    pub fn handle(&self) -> IndexedContext {
        self.handle
    }

    pub fn context_type(&self) -> ContextType {
        self.context_type
    }

    pub fn range(&self) -> SimpleRange {
        self.range
    }

    pub fn parent_context(&self) -> Option<IndexedContext> {
        self.parent
    }

    /// Owned child contexts ordered by start position.
    pub fn child_contexts(&self) -> &[IndexedContext] {
        &self.children
    }

    pub fn imported_parent_contexts(&self) -> &[Import] {
        &self.imported_parents
    }

    /// Contexts that import this one directly.
    pub fn importers(&self) -> &[IndexedContext] {
        &self.importers
    }

    pub fn local_declarations(&self) -> &[IndexedDeclaration] {
        &self.local_declarations
    }

    /// Identifier this context adds to the scope (`A` for `namespace A`).
    pub fn local_scope_identifier(&self) -> &QualifiedIdentifier {
        &self.local_scope_identifier
    }

    /// Full scope identifier including all parents.
    pub fn scope_identifier(&self) -> &QualifiedIdentifier {
        &self.scope_identifier
    }

    pub fn owner(&self) -> Option<IndexedDeclaration> {
        self.owner
    }

    pub fn uses(&self) -> &[Use] {
        &self.uses
    }

    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    pub(crate) fn imports_directly(&self, context: IndexedContext) -> bool {
        self.imported_parents
            .iter()
            .any(|import| import.context == context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_visibility() {
        let import = |line| Import {
            context: dummy_context(),
            position: SimpleCursor::new(line, 0),
        };

        assert!(import(3).is_visible_at(SimpleCursor::new(3, 0)));
        assert!(import(3).is_visible_at(SimpleCursor::new(7, 2)));
        assert!(!import(3).is_visible_at(SimpleCursor::new(2, 9)));
        assert!(import(3).is_visible_at(SimpleCursor::invalid()));
    }

    #[test]
    fn test_symbol_table_scopes() {
        assert!(ContextType::Namespace.is_symbol_table_scope());
        assert!(ContextType::Class.is_symbol_table_scope());
        assert!(!ContextType::Function.is_symbol_table_scope());
        assert!(!ContextType::Template.is_symbol_table_scope());
    }

    fn dummy_context() -> IndexedContext {
        use crate::arena::Handle;
        IndexedContext::new(Handle::new(0, 0), Handle::new(0, 0))
    }
}
