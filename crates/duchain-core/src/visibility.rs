//! Declaration visibility policies
//!
//! Whether a declaration found in a scope may be used at a position is a
//! language rule. The chain consults a [`VisibilityPolicy`] for every local
//! candidate; positions are invalid once the lookup leaves the document it
//! started in, which makes every candidate visible.

use crate::context::{ContextType, DUContext};
use crate::declaration::Declaration;
use crate::range::SimpleCursor;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

pub trait VisibilityPolicy: Send + Sync + Debug {
    /// Whether `declaration`, local to `context`, is visible at `position`.
    fn is_visible(
        &self,
        declaration: &Declaration,
        context: &DUContext,
        position: SimpleCursor,
    ) -> bool;
}

/// Declarations are visible from their start position onwards.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeclaredBeforeUse;

impl VisibilityPolicy for DeclaredBeforeUse {
    fn is_visible(
        &self,
        declaration: &Declaration,
        _context: &DUContext,
        position: SimpleCursor,
    ) -> bool {
        !position.is_valid() || declaration.range().start <= position
    }
}

/// Like [`DeclaredBeforeUse`], except members are visible throughout their
/// class.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClassMembersVisible;

impl VisibilityPolicy for ClassMembersVisible {
    fn is_visible(
        &self,
        declaration: &Declaration,
        context: &DUContext,
        position: SimpleCursor,
    ) -> bool {
        context.context_type() == ContextType::Class
            || DeclaredBeforeUse.is_visible(declaration, context, position)
    }
}

/// Configurable choice between the built-in policies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityMode {
    DeclaredBeforeUse,
    #[default]
    ClassMembersVisible,
}

impl VisibilityMode {
    pub fn policy(&self) -> Arc<dyn VisibilityPolicy> {
        match self {
            VisibilityMode::DeclaredBeforeUse => Arc::new(DeclaredBeforeUse),
            VisibilityMode::ClassMembersVisible => Arc::new(ClassMembersVisible),
        }
    }
}

impl std::str::FromStr for VisibilityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "declared_before_use" => Ok(VisibilityMode::DeclaredBeforeUse),
            "class_members_visible" => Ok(VisibilityMode::ClassMembersVisible),
            other => Err(format!("unknown visibility mode: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Handle;
    use crate::declaration::DeclarationKind;
    use crate::identifier::Identifier;
    use crate::indexed::{IndexedContext, IndexedDeclaration};
    use crate::range::SimpleRange;

    fn declaration_at(line: i32) -> Declaration {
        Declaration::new(
            IndexedDeclaration::new(Handle::new(0, 0), Handle::new(0, 0)),
            Identifier::new("x"),
            SimpleRange::from_coordinates(line, 0, line, 1),
            DeclarationKind::Instance,
        )
    }

    fn context_of(context_type: ContextType) -> DUContext {
        DUContext::new(
            IndexedContext::new(Handle::new(0, 0), Handle::new(0, 0)),
            context_type,
            SimpleRange::invalid(),
            None,
        )
    }

    #[test]
    fn test_declared_before_use() {
        let declaration = declaration_at(5);
        let context = context_of(ContextType::Function);
        let policy = DeclaredBeforeUse;

        assert!(!policy.is_visible(&declaration, &context, SimpleCursor::new(4, 0)));
        assert!(policy.is_visible(&declaration, &context, SimpleCursor::new(5, 0)));
        assert!(policy.is_visible(&declaration, &context, SimpleCursor::invalid()));
    }

    #[test]
    fn test_class_members_visible_throughout_class() {
        let declaration = declaration_at(5);
        let class = context_of(ContextType::Class);
        let function = context_of(ContextType::Function);
        let policy = VisibilityMode::ClassMembersVisible.policy();

        assert!(policy.is_visible(&declaration, &class, SimpleCursor::new(1, 0)));
        assert!(!policy.is_visible(&declaration, &function, SimpleCursor::new(1, 0)));
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!(
            "declared_before_use".parse::<VisibilityMode>(),
            Ok(VisibilityMode::DeclaredBeforeUse)
        );
        assert!("sometimes".parse::<VisibilityMode>().is_err());
    }
}
