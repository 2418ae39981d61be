//! Builder support
//!
//! A language front-end walks its syntax tree and drives the chain through a
//! [`ChainBuilder`], which keeps the stack of open contexts and the state a
//! tree walk needs between calls (the last declaration, a pending template
//! parameter list). Event streams recorded from a front-end can be replayed
//! with [`replay`].
//!
//! ## Usage
//!
//! ```ignore
//! use duchain_core::{ChainBuilder, DUChain, DUChainWriteLocker, IdentifiedFile};
//!
//! let chain = DUChain::new();
//! let _write = DUChainWriteLocker::new(chain.lock());
//! let mut builder = ChainBuilder::begin(&chain, IdentifiedFile::from("a.cpp"), range)?;
//! builder.declare(Identifier::new("i"), decl_range, DeclarationKind::Instance, Some(int))?;
//! let top = builder.finish()?;
//! ```

mod events;
mod replay;

pub use events::{load_events, parse_events, split_documents, BuildEvent, DocumentScript};
pub use replay::{replay, replay_document, ReplayOptions, ReplaySummary, ReplayedDocument};

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use crate::chain::DUChain;
use crate::context::ContextType;
use crate::declaration::{
    AccessPolicy, ClassMemberFacet, DeclarationFlags, DeclarationKind, TemplateParameterFacet,
};
use crate::declaration_id::DeclarationId;
use crate::environment::{IdentifiedFile, ParsingEnvironmentFile};
use crate::error::DUChainError;
use crate::identifier::{Identifier, QualifiedIdentifier, TypeIdentifier};
use crate::indexed::{IndexedContext, IndexedDeclaration, IndexedTopContext};
use crate::range::{SimpleCursor, SimpleRange};
use crate::types::AbstractType;

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur while building or replaying a document.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The chain refused an operation
    #[error("chain error: {0}")]
    Chain(#[from] DUChainError),

    /// Event stream could not be decoded
    #[error("invalid event stream: {0}")]
    Decode(#[from] serde_json::Error),

    /// Event file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Event received outside of a `begin_document`/`end_document` pair
    #[error("{0} event outside of a document")]
    OutsideDocument(&'static str),

    /// Document ended with contexts still open
    #[error("document {url} ended with {open} open context(s)")]
    UnclosedContexts { url: String, open: usize },

    /// `close_context` with only the root context open
    #[error("cannot close the root context")]
    CloseRoot,

    /// Event needs a preceding declaration
    #[error("{0} requires a preceding declaration")]
    NoDeclaration(&'static str),

    /// Import of a document that is neither registered nor replayed
    #[error("unknown document {0}")]
    UnknownDocument(String),

    /// Documents importing each other
    #[error("documents import each other: {}", .0.join(", "))]
    CyclicImports(Vec<String>),

    /// No parsing environment manager for an environment file
    #[error("no parsing environment manager for type {0}")]
    MissingEnvironmentManager(u32),

    /// The builder needs the write lock of the calling thread
    #[error("building requires the DUChain write lock")]
    WriteLockRequired,
}

/// Result type for building.
pub type Result<T> = std::result::Result<T, BuildError>;

// ============================================================================
// Chain Builder
// ============================================================================

/// Counts of what a builder created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub contexts: usize,
    pub declarations: usize,
    pub uses: usize,
    pub unresolved_uses: usize,
    pub imports: usize,
}

/// Populates one top context while the calling thread holds the write lock.
///
/// The top context stays unregistered, and so private to this thread, until
/// [`ChainBuilder::finish`].
pub struct ChainBuilder<'a> {
    chain: &'a DUChain,
    identity: IdentifiedFile,
    top: IndexedTopContext,
    stack: Vec<IndexedContext>,
    last_declaration: Option<IndexedDeclaration>,
    /// Template parameter context closed last, waiting for its template.
    pending_template: Option<IndexedContext>,
    stats: BuildStats,
}

impl<'a> ChainBuilder<'a> {
    /// Create the top context for `identity` and start building it.
    pub fn begin(chain: &'a DUChain, identity: IdentifiedFile, range: SimpleRange) -> Result<Self> {
        if !chain.lock().current_thread_has_write_lock() {
            return Err(BuildError::WriteLockRequired);
        }
        let top = chain.create_top_context(identity, range)?;
        let root = chain
            .root_context(top)
            .ok_or(DUChainError::InvalidHandle { kind: "top context" })?;
        debug!("Building {}", identity);
        Ok(Self {
            chain,
            identity,
            top,
            stack: vec![root],
            last_declaration: None,
            pending_template: None,
            stats: BuildStats::default(),
        })
    }

    pub fn chain(&self) -> &'a DUChain {
        self.chain
    }

    pub fn top(&self) -> IndexedTopContext {
        self.top
    }

    pub fn identity(&self) -> IdentifiedFile {
        self.identity
    }

    /// The innermost open context.
    pub fn current_context(&self) -> IndexedContext {
        // The root is never popped.
        self.stack[self.stack.len() - 1]
    }

    /// Number of open contexts, the root included.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn last_declaration(&self) -> Option<IndexedDeclaration> {
        self.last_declaration
    }

    pub fn stats(&self) -> BuildStats {
        self.stats
    }

    /// Open a child of the current context and make it current.
    pub fn open_context(
        &mut self,
        range: SimpleRange,
        context_type: ContextType,
        local_scope_identifier: Option<QualifiedIdentifier>,
    ) -> Result<IndexedContext> {
        let parent = self.current_context();
        let context =
            self.chain
                .open_context(parent, range, context_type, local_scope_identifier)?;
        self.stack.push(context);
        self.stats.contexts += 1;
        trace!("Opened {:?} context {:?}", context_type, context);
        Ok(context)
    }

    /// Open the context `declaration` opens (class body, function body).
    ///
    /// When `declaration` is a template, the new context imports its
    /// template parameters.
    pub fn open_internal_context(
        &mut self,
        declaration: IndexedDeclaration,
        range: SimpleRange,
        context_type: ContextType,
        local_scope_identifier: Option<QualifiedIdentifier>,
    ) -> Result<IndexedContext> {
        let context = self.open_context(range, context_type, local_scope_identifier)?;
        self.chain.set_internal_context(declaration, Some(context))?;
        let parameters = self
            .chain
            .with_declaration(declaration, |declaration| {
                declaration
                    .template()
                    .and_then(|facet| facet.parameters_context())
            })
            .flatten();
        if let Some(parameters) = parameters {
            self.chain
                .add_imported_parent_context(context, parameters, SimpleCursor::invalid())?;
        }
        Ok(context)
    }

    /// Close the current context. The root cannot be closed.
    pub fn close_context(&mut self) -> Result<IndexedContext> {
        if self.stack.len() <= 1 {
            return Err(BuildError::CloseRoot);
        }
        let closed = self.stack.pop().ok_or(BuildError::CloseRoot)?;
        let is_template = self
            .chain
            .with_context(closed, |context| context.context_type() == ContextType::Template)
            .unwrap_or(false);
        if is_template {
            self.pending_template = Some(closed);
        }
        Ok(closed)
    }

    /// Declare `identifier` in the current context.
    ///
    /// Declarations directly inside a template parameter list become
    /// template parameters; declarations in class bodies become members. A
    /// template parameter list closed right before is attached to the new
    /// declaration.
    pub fn declare(
        &mut self,
        identifier: Identifier,
        range: SimpleRange,
        kind: DeclarationKind,
        abstract_type: Option<AbstractType>,
    ) -> Result<IndexedDeclaration> {
        let context = self.current_context();
        let context_type = self
            .chain
            .with_context(context, |context| context.context_type())
            .unwrap_or_default();

        let abstract_type = match (context_type, abstract_type) {
            (ContextType::Template, None) => Some(AbstractType::template_parameter(
                &identifier.name().str(),
            )),
            (_, abstract_type) => abstract_type,
        };
        let declaration = self
            .chain
            .declare(context, identifier, range, kind, abstract_type)?;

        match context_type {
            ContextType::Template => {
                self.chain
                    .set_template_parameter(declaration, Some(TemplateParameterFacet::default()))?;
            }
            ContextType::Class => {
                self.chain
                    .set_class_member(declaration, Some(ClassMemberFacet::default()))?;
            }
            _ => {}
        }
        if let Some(parameters) = self.pending_template.take() {
            if context_type != ContextType::Template {
                self.chain
                    .set_template_parameters_context(declaration, Some(parameters))?;
            }
        }

        self.last_declaration = Some(declaration);
        self.stats.declarations += 1;
        Ok(declaration)
    }

    /// Default type of the template parameter `declaration`.
    pub fn set_template_parameter_default(
        &mut self,
        declaration: IndexedDeclaration,
        default_type: AbstractType,
    ) -> Result<()> {
        self.chain.set_template_parameter(
            declaration,
            Some(TemplateParameterFacet {
                default_type: Some(default_type),
            }),
        )?;
        Ok(())
    }

    pub fn set_access(
        &mut self,
        declaration: IndexedDeclaration,
        access: AccessPolicy,
    ) -> Result<()> {
        let mut facet = self
            .chain
            .with_declaration(declaration, |declaration| declaration.class_member().cloned())
            .flatten()
            .unwrap_or_default();
        facet.access = access;
        self.chain.set_class_member(declaration, Some(facet))?;
        Ok(())
    }

    pub fn set_flags(
        &mut self,
        declaration: IndexedDeclaration,
        flags: DeclarationFlags,
    ) -> Result<()> {
        self.chain.set_flags(declaration, flags)?;
        Ok(())
    }

    pub fn set_comment(&mut self, declaration: IndexedDeclaration, comment: String) -> Result<()> {
        self.chain.set_comment(declaration, Some(comment))?;
        Ok(())
    }

    /// Link the definition `definition` to the declaration named
    /// `declared`, looked up from the current context. Returns the linked
    /// declaration, if one was found.
    pub fn define(
        &mut self,
        definition: IndexedDeclaration,
        declared: &QualifiedIdentifier,
    ) -> Result<Option<IndexedDeclaration>> {
        let position = self
            .chain
            .with_declaration(definition, |definition| definition.range().start)
            .unwrap_or_else(SimpleCursor::invalid);
        let target = self
            .chain
            .find_declarations(self.current_context(), declared, position)
            .into_iter()
            .find(|candidate| *candidate != definition);
        let Some(target) = target else {
            return Ok(None);
        };
        let id = self.chain.declaration_id(target);
        self.chain.set_declaration_of_definition(definition, id)?;
        Ok(Some(target))
    }

    /// Resolve a spelled type from the current context.
    pub fn resolve_type(&self, spelled: &str, position: SimpleCursor) -> AbstractType {
        self.chain.resolve_type_identifier(
            self.current_context(),
            &TypeIdentifier::parse(spelled),
            position,
        )
    }

    /// Record a use in the current context.
    pub fn record_use(
        &mut self,
        range: SimpleRange,
        declaration: Option<DeclarationId>,
    ) -> Result<usize> {
        let index = self
            .chain
            .record_use(self.current_context(), range, declaration)?;
        self.stats.uses += 1;
        if declaration.is_none() {
            self.stats.unresolved_uses += 1;
        }
        Ok(index)
    }

    /// Look `name` up at the start of `range` and record the use. Unknown
    /// names are recorded as unresolved uses.
    pub fn use_name(&mut self, name: &QualifiedIdentifier, range: SimpleRange) -> Result<usize> {
        let found = self
            .chain
            .find_declarations(self.current_context(), name, range.start)
            .into_iter()
            .next();
        let id = found.and_then(|declaration| self.chain.declaration_id(declaration));
        if id.is_none() {
            trace!("Unresolved use of {} at {}", name, range);
        }
        self.record_use(range, id)
    }

    /// Import `context` into the current context from `position` on.
    pub fn import_context(&mut self, context: IndexedContext, position: SimpleCursor) -> Result<()> {
        self.chain
            .add_imported_parent_context(self.current_context(), context, position)?;
        self.stats.imports += 1;
        Ok(())
    }

    /// Import the root of the document registered for `url`.
    pub fn import_document(&mut self, url: &str, position: SimpleCursor) -> Result<()> {
        let root = self
            .chain
            .chain_for_document(url)
            .and_then(|top| self.chain.root_context(top))
            .ok_or_else(|| BuildError::UnknownDocument(url.to_string()))?;
        if self.chain.imports(self.current_context(), root, SimpleCursor::invalid()) {
            return Ok(());
        }
        self.import_context(root, position)
    }

    /// Import every namespace named `name` visible from the current
    /// context. Returns how many were imported.
    pub fn use_namespace(
        &mut self,
        name: &QualifiedIdentifier,
        position: SimpleCursor,
    ) -> Result<usize> {
        let current = self.current_context();
        let namespaces = self
            .chain
            .find_contexts(current, ContextType::Namespace, name);
        let mut imported = 0;
        for namespace in namespaces {
            if namespace == current
                || self.chain.imports(namespace, current, SimpleCursor::invalid())
            {
                continue;
            }
            self.import_context(namespace, position)?;
            imported += 1;
        }
        Ok(imported)
    }

    /// Attach the parsing environment file the document was parsed with.
    pub fn set_environment_file(&mut self, file: Arc<dyn ParsingEnvironmentFile>) -> Result<()> {
        let environment_type = file.environment_type();
        if !self.chain.has_parsing_environment_manager(environment_type) {
            return Err(BuildError::MissingEnvironmentManager(environment_type));
        }
        self.chain.update_context_environment(self.top, file)?;
        Ok(())
    }

    /// Register the document. Every context but the root must be closed.
    pub fn finish(self) -> Result<IndexedTopContext> {
        if self.stack.len() > 1 {
            return Err(BuildError::UnclosedContexts {
                url: self.identity.to_string(),
                open: self.stack.len() - 1,
            });
        }
        self.chain.add_document_chain(self.top)?;
        debug!(
            "Finished {}: {} contexts, {} declarations, {} uses",
            self.identity, self.stats.contexts, self.stats.declarations, self.stats.uses
        );
        Ok(self.top)
    }

    /// Stop building and leave the document unregistered.
    pub fn finish_unregistered(self) -> Result<IndexedTopContext> {
        if self.stack.len() > 1 {
            return Err(BuildError::UnclosedContexts {
                url: self.identity.to_string(),
                open: self.stack.len() - 1,
            });
        }
        Ok(self.top)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::DUChainWriteLocker;

    fn range(line: i32) -> SimpleRange {
        SimpleRange::from_coordinates(line, 0, line, 10)
    }

    #[test]
    fn test_builder_requires_write_lock() {
        let chain = DUChain::new();
        let result = ChainBuilder::begin(&chain, IdentifiedFile::from("a.cpp"), range(0));
        assert!(matches!(result, Err(BuildError::WriteLockRequired)));
    }

    #[test]
    fn test_context_stack() {
        let chain = DUChain::new();
        let _write = DUChainWriteLocker::new(chain.lock());
        let mut builder =
            ChainBuilder::begin(&chain, IdentifiedFile::from("a.cpp"), range(0)).unwrap();
        let root = builder.current_context();

        let namespace = builder
            .open_context(range(1), ContextType::Namespace, Some("ns".into()))
            .unwrap();
        assert_eq!(builder.current_context(), namespace);
        assert_eq!(builder.depth(), 2);
        assert_eq!(builder.close_context().unwrap(), namespace);
        assert_eq!(builder.current_context(), root);
        assert!(matches!(builder.close_context(), Err(BuildError::CloseRoot)));
    }

    #[test]
    fn test_unclosed_context_refuses_finish() {
        let chain = DUChain::new();
        let _write = DUChainWriteLocker::new(chain.lock());
        let mut builder =
            ChainBuilder::begin(&chain, IdentifiedFile::from("a.cpp"), range(0)).unwrap();
        builder
            .open_context(range(1), ContextType::Function, None)
            .unwrap();
        let result = builder.finish();
        assert!(matches!(
            result,
            Err(BuildError::UnclosedContexts { open: 1, .. })
        ));
    }

    #[test]
    fn test_use_name_resolves_and_counts() {
        let chain = DUChain::new();
        let _write = DUChainWriteLocker::new(chain.lock());
        let mut builder =
            ChainBuilder::begin(&chain, IdentifiedFile::from("a.cpp"), range(0)).unwrap();
        let int = AbstractType::builtin("int");
        let declaration = builder
            .declare(Identifier::new("i"), range(1), DeclarationKind::Instance, int)
            .unwrap();
        builder.use_name(&"i".into(), range(2)).unwrap();
        builder.use_name(&"missing".into(), range(3)).unwrap();

        let stats = builder.stats();
        assert_eq!(stats.declarations, 1);
        assert_eq!(stats.uses, 2);
        assert_eq!(stats.unresolved_uses, 1);

        let top = builder.finish().unwrap();
        let id = chain.declaration_id(declaration).unwrap();
        assert_eq!(chain.uses_of(&id).get(&top).map(Vec::len), Some(1));
    }

    #[test]
    fn test_template_parameters_attach_to_next_declaration() {
        let chain = DUChain::new();
        let _write = DUChainWriteLocker::new(chain.lock());
        let mut builder =
            ChainBuilder::begin(&chain, IdentifiedFile::from("a.cpp"), range(0)).unwrap();
        builder
            .open_context(range(1), ContextType::Template, None)
            .unwrap();
        let parameter = builder
            .declare(Identifier::new("T"), range(1), DeclarationKind::Type, None)
            .unwrap();
        builder.close_context().unwrap();
        let template = builder
            .declare(Identifier::new("A"), range(1), DeclarationKind::Type, None)
            .unwrap();

        assert!(chain
            .with_declaration(template, |declaration| declaration.is_template())
            .unwrap());
        assert!(chain
            .with_declaration(parameter, |declaration| declaration.template_parameter().is_some())
            .unwrap());
    }
}
