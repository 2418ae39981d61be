//! Handles into the chain
//!
//! Contexts and declarations live in per-document arenas owned by their
//! [`TopDUContext`]. A handle names the owning top context and the slot inside
//! it; both carry generations, so a handle to anything destroyed (or to
//! anything in a destroyed document) simply stops resolving.

use crate::arena::Handle;
use crate::context::DUContext;
use crate::declaration::Declaration;
use crate::top_context::TopDUContext;
use std::fmt;

/// Handle of a document's top context.
pub type IndexedTopContext = Handle<TopDUContext>;

/// Handle of a context inside some document.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexedContext {
    top: IndexedTopContext,
    local: Handle<DUContext>,
}

impl IndexedContext {
    pub(crate) fn new(top: IndexedTopContext, local: Handle<DUContext>) -> Self {
        Self { top, local }
    }

    pub fn top(&self) -> IndexedTopContext {
        self.top
    }

    pub(crate) fn local(&self) -> Handle<DUContext> {
        self.local
    }
}

impl fmt::Debug for IndexedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Context({:?}/{:?})", self.top, self.local)
    }
}

/// Handle of a declaration inside some document.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexedDeclaration {
    top: IndexedTopContext,
    local: Handle<Declaration>,
}

impl IndexedDeclaration {
    pub(crate) fn new(top: IndexedTopContext, local: Handle<Declaration>) -> Self {
        Self { top, local }
    }

    pub fn top(&self) -> IndexedTopContext {
        self.top
    }

    pub(crate) fn local(&self) -> Handle<Declaration> {
        self.local
    }
}

impl fmt::Debug for IndexedDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Declaration({:?}/{:?})", self.top, self.local)
    }
}
