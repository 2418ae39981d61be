//! Declaration identities
//!
//! A [`DeclarationId`] names a declaration in one of two ways:
//!
//! - **direct**: a handle to the exact declaration object. Used for
//!   declarations that are not reachable by qualified name (function locals,
//!   anonymous declarations).
//! - **indirect**: qualified identifier plus an *additional identity* that
//!   disambiguates same-named declarations (overloads). Survives re-parsing
//!   and can be persisted as [`PersistentDeclarationId`].
//!
//! Either form may carry a specialization, the instantiation information of
//! a template instantiation; resolving such an id re-instantiates the
//! template and yields the cached instantiation.

use crate::identifier::{IndexedQualifiedIdentifier, QualifiedIdentifier};
use crate::indexed::IndexedDeclaration;
use crate::instantiation::IndexedInstantiationInformation;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Target {
    Direct(IndexedDeclaration),
    Indirect {
        identifier: IndexedQualifiedIdentifier,
        additional_identity: u32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeclarationId {
    target: Target,
    specialization: IndexedInstantiationInformation,
}

impl DeclarationId {
    pub fn direct(declaration: IndexedDeclaration) -> Self {
        Self {
            target: Target::Direct(declaration),
            specialization: IndexedInstantiationInformation::default(),
        }
    }

    pub fn indirect(identifier: &QualifiedIdentifier, additional_identity: u32) -> Self {
        Self {
            target: Target::Indirect {
                identifier: identifier.relative().index(),
                additional_identity,
            },
            specialization: IndexedInstantiationInformation::default(),
        }
    }

    pub fn with_specialization(mut self, specialization: IndexedInstantiationInformation) -> Self {
        self.specialization = specialization;
        self
    }

    /// The same id without specialization.
    pub fn unspecialized(mut self) -> Self {
        self.specialization = IndexedInstantiationInformation::default();
        self
    }

    pub fn is_direct(&self) -> bool {
        matches!(self.target, Target::Direct(_))
    }

    pub fn direct_declaration(&self) -> Option<IndexedDeclaration> {
        match self.target {
            Target::Direct(declaration) => Some(declaration),
            Target::Indirect { .. } => None,
        }
    }

    pub fn indexed_qualified_identifier(&self) -> Option<IndexedQualifiedIdentifier> {
        match self.target {
            Target::Indirect { identifier, .. } => Some(identifier),
            Target::Direct(_) => None,
        }
    }

    pub fn qualified_identifier(&self) -> Option<QualifiedIdentifier> {
        self.indexed_qualified_identifier()
            .map(|identifier| identifier.identifier())
    }

    pub fn additional_identity(&self) -> u32 {
        match self.target {
            Target::Indirect {
                additional_identity,
                ..
            } => additional_identity,
            Target::Direct(_) => 0,
        }
    }

    pub fn specialization(&self) -> IndexedInstantiationInformation {
        self.specialization
    }

    /// Persistent form of an indirect id. Direct ids and specializations are
    /// process-local and have none.
    pub fn to_persistent(&self) -> Option<PersistentDeclarationId> {
        if !self.specialization.is_empty() {
            return None;
        }
        match self.target {
            Target::Indirect {
                identifier,
                additional_identity,
            } => Some(PersistentDeclarationId {
                qualified_identifier: identifier.to_string(),
                additional_identity,
            }),
            Target::Direct(_) => None,
        }
    }
}

impl fmt::Display for DeclarationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target {
            Target::Direct(declaration) => write!(f, "{:?}", declaration)?,
            Target::Indirect {
                identifier,
                additional_identity,
            } => write!(f, "{}#{}", identifier, additional_identity)?,
        }
        if !self.specialization.is_empty() {
            write!(f, " {}", self.specialization)?;
        }
        Ok(())
    }
}

/// Serializable `(qualified identifier text, additional identity)` pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PersistentDeclarationId {
    pub qualified_identifier: String,
    pub additional_identity: u32,
}

impl PersistentDeclarationId {
    pub fn to_declaration_id(&self) -> DeclarationId {
        DeclarationId::indirect(
            &QualifiedIdentifier::parse(&self.qualified_identifier),
            self.additional_identity,
        )
    }
}

impl From<&PersistentDeclarationId> for DeclarationId {
    fn from(persistent: &PersistentDeclarationId) -> Self {
        persistent.to_declaration_id()
    }
}
