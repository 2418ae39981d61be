//! Declarations
//!
//! A [`Declaration`] is a named entity introduced at a source range inside an
//! owning context. Optional capabilities are modelled as facets: a template
//! facet, class-member and function properties, template-parameter defaults
//! and the definition link. [`Declaration::facets`] reports which are
//! present; accessors for absent facets return empty values.
//!
//! Declarations are created and mutated only through the chain under its
//! write lock; this type exposes read accessors.

use crate::declaration_id::DeclarationId;
use crate::identifier::{Identifier, QualifiedIdentifier};
use crate::indexed::{IndexedContext, IndexedDeclaration};
use crate::instantiation::IndexedInstantiationInformation;
use crate::range::SimpleRange;
use crate::types::AbstractType;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclarationKind {
    /// Classes, structs, enums, typedefs, template type parameters.
    Type,
    /// Variables, functions, enumerators.
    #[default]
    Instance,
    Namespace,
    NamespaceAlias,
    Alias,
    Import,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DeclarationFlags: u32 {
        const DEFINITION = 1;
        const FORWARD_DECLARATION = 1 << 1;
        const TYPE_ALIAS = 1 << 2;
    }
}

bitflags! {
    /// Which optional capabilities a declaration carries.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DeclarationFacets: u32 {
        const TEMPLATE = 1;
        const FORWARD_DECLARATION = 1 << 1;
        const CLASS_MEMBER = 1 << 2;
        const FUNCTION = 1 << 3;
        const TEMPLATE_PARAMETER = 1 << 4;
        const DEFINITION = 1 << 5;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessPolicy {
    Public,
    Protected,
    Private,
    #[default]
    Default,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassMemberFacet {
    pub access: AccessPolicy,
    pub is_static: bool,
    pub is_mutable: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FunctionFacet {
    pub is_virtual: bool,
    pub is_inline: bool,
    pub is_explicit: bool,
    pub default_parameters: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TemplateParameterFacet {
    pub default_type: Option<AbstractType>,
}

/// Template bookkeeping: parameters, provenance and the instantiation cache.
#[derive(Clone, Debug, Default)]
pub struct TemplateFacet {
    pub(crate) parameters_context: Option<IndexedContext>,
    pub(crate) instantiated_from: Option<IndexedDeclaration>,
    pub(crate) specialized_from: Option<IndexedDeclaration>,
    /// Arguments of an explicit specialization.
    pub(crate) specialized_with: Vec<AbstractType>,
    pub(crate) specializations: Vec<IndexedDeclaration>,
    pub(crate) instantiations: HashMap<IndexedInstantiationInformation, IndexedDeclaration>,
    pub(crate) instantiation_information: IndexedInstantiationInformation,
    /// Unspecialized id of the declaration this one instantiates.
    pub(crate) generic_id: Option<DeclarationId>,
    /// Template parameters bound by this and all enclosing instantiations.
    pub(crate) bindings: Vec<(Identifier, AbstractType)>,
}

impl TemplateFacet {
    pub fn parameters_context(&self) -> Option<IndexedContext> {
        self.parameters_context
    }

    pub fn instantiated_from(&self) -> Option<IndexedDeclaration> {
        self.instantiated_from
    }

    pub fn specialized_from(&self) -> Option<IndexedDeclaration> {
        self.specialized_from
    }

    pub fn specialized_with(&self) -> &[AbstractType] {
        &self.specialized_with
    }

    pub fn specializations(&self) -> &[IndexedDeclaration] {
        &self.specializations
    }

    pub fn instantiation_count(&self) -> usize {
        self.instantiations.len()
    }

    pub fn instantiation_information(&self) -> IndexedInstantiationInformation {
        self.instantiation_information
    }

    pub fn bindings(&self) -> &[(Identifier, AbstractType)] {
        &self.bindings
    }
}

#[derive(Clone, Debug)]
pub struct Declaration {
    pub(crate) handle: IndexedDeclaration,
    pub(crate) identifier: Identifier,
    pub(crate) range: SimpleRange,
    pub(crate) kind: DeclarationKind,
    pub(crate) abstract_type: Option<AbstractType>,
    pub(crate) context: Option<IndexedContext>,
    pub(crate) internal_context: Option<IndexedContext>,
    pub(crate) flags: DeclarationFlags,
    /// Owned by its context but not listed among its local declarations.
    pub(crate) anonymous: bool,
    pub(crate) in_symbol_table: bool,
    pub(crate) comment: Option<String>,
    pub(crate) template: Option<Box<TemplateFacet>>,
    pub(crate) class_member: Option<ClassMemberFacet>,
    pub(crate) function: Option<FunctionFacet>,
    pub(crate) template_parameter: Option<TemplateParameterFacet>,
    pub(crate) definition_of: Option<DeclarationId>,
    pub(crate) qualified_identifier: QualifiedIdentifier,
}

impl Declaration {
    pub(crate) fn new(
        handle: IndexedDeclaration,
        identifier: Identifier,
        range: SimpleRange,
        kind: DeclarationKind,
    ) -> Self {
        Self {
            handle,
            identifier,
            range,
            kind,
            abstract_type: None,
            context: None,
            internal_context: None,
            flags: DeclarationFlags::empty(),
            anonymous: false,
            in_symbol_table: false,
            comment: None,
            template: None,
            class_member: None,
            function: None,
            template_parameter: None,
            definition_of: None,
            qualified_identifier: QualifiedIdentifier::new(),
        }
    }

    pub fn handle(&self) -> IndexedDeclaration {
        self.handle
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// Scope identifier of the owning context plus this declaration's
    /// identifier.
    pub fn qualified_identifier(&self) -> &QualifiedIdentifier {
        &self.qualified_identifier
    }

    pub fn range(&self) -> SimpleRange {
        self.range
    }

    pub fn kind(&self) -> DeclarationKind {
        self.kind
    }

    pub fn abstract_type(&self) -> Option<&AbstractType> {
        self.abstract_type.as_ref()
    }

    pub fn context(&self) -> Option<IndexedContext> {
        self.context
    }

    pub fn internal_context(&self) -> Option<IndexedContext> {
        self.internal_context
    }

    pub fn flags(&self) -> DeclarationFlags {
        self.flags
    }

    pub fn is_definition(&self) -> bool {
        self.flags.contains(DeclarationFlags::DEFINITION)
    }

    pub fn is_forward_declaration(&self) -> bool {
        self.flags.contains(DeclarationFlags::FORWARD_DECLARATION)
    }

    pub fn is_type_alias(&self) -> bool {
        self.flags.contains(DeclarationFlags::TYPE_ALIAS)
    }

    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    pub fn in_symbol_table(&self) -> bool {
        self.in_symbol_table
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn facets(&self) -> DeclarationFacets {
        let mut facets = DeclarationFacets::empty();
        facets.set(DeclarationFacets::TEMPLATE, self.template.is_some());
        facets.set(
            DeclarationFacets::FORWARD_DECLARATION,
            self.is_forward_declaration(),
        );
        facets.set(DeclarationFacets::CLASS_MEMBER, self.class_member.is_some());
        facets.set(DeclarationFacets::FUNCTION, self.function.is_some());
        facets.set(
            DeclarationFacets::TEMPLATE_PARAMETER,
            self.template_parameter.is_some(),
        );
        facets.set(DeclarationFacets::DEFINITION, self.definition_of.is_some());
        facets
    }

    pub fn template(&self) -> Option<&TemplateFacet> {
        self.template.as_deref()
    }

    pub fn class_member(&self) -> Option<&ClassMemberFacet> {
        self.class_member.as_ref()
    }

    pub fn function(&self) -> Option<&FunctionFacet> {
        self.function.as_ref()
    }

    pub fn template_parameter(&self) -> Option<&TemplateParameterFacet> {
        self.template_parameter.as_ref()
    }

    pub fn access_policy(&self) -> AccessPolicy {
        self.class_member
            .as_ref()
            .map(|member| member.access)
            .unwrap_or_default()
    }

    pub fn is_template(&self) -> bool {
        self.template
            .as_ref()
            .is_some_and(|facet| facet.parameters_context.is_some())
    }

    pub fn instantiated_from(&self) -> Option<IndexedDeclaration> {
        self.template.as_ref().and_then(|facet| facet.instantiated_from)
    }

    pub fn specialized_from(&self) -> Option<IndexedDeclaration> {
        self.template.as_ref().and_then(|facet| facet.specialized_from)
    }

    pub fn instantiation_information(&self) -> IndexedInstantiationInformation {
        self.template
            .as_ref()
            .map(|facet| facet.instantiation_information)
            .unwrap_or_default()
    }

    /// Explicit specializations (not instantiations) are excluded from name
    /// lookup; they are reached through their template.
    pub fn is_explicit_specialization(&self) -> bool {
        self.template.as_ref().is_some_and(|facet| {
            facet.specialized_from.is_some() && facet.instantiated_from.is_none()
        })
    }

    pub fn declaration_of_definition(&self) -> Option<DeclarationId> {
        self.definition_of
    }

    /// Disambiguator for same-named declarations: derived from the function
    /// signature for functions, zero otherwise.
    pub fn additional_identity(&self) -> u32 {
        compute_additional_identity(self.kind, self.abstract_type.as_ref())
    }

    /// Identity of this declaration.
    ///
    /// Indirect when it is reachable through the symbol table (or is an
    /// instantiation of something that is), direct otherwise. Instantiations
    /// carry their instantiation information as specialization.
    pub fn id(&self) -> DeclarationId {
        if let Some(facet) = self.template.as_deref() {
            if let Some(generic) = facet.generic_id {
                return generic.with_specialization(facet.instantiation_information);
            }
        }
        if self.in_symbol_table {
            return DeclarationId::indirect(&self.qualified_identifier, self.additional_identity());
        }
        DeclarationId::direct(self.handle)
    }

    pub(crate) fn template_mut(&mut self) -> &mut TemplateFacet {
        self.template.get_or_insert_with(Default::default)
    }
}

/// Stable across processes: hashes the spelled signature with SHA-256.
pub fn compute_additional_identity(kind: DeclarationKind, ty: Option<&AbstractType>) -> u32 {
    match (kind, ty) {
        (DeclarationKind::Instance, Some(AbstractType::Function { arguments, .. })) => {
            let mut hasher = Sha256::new();
            for argument in arguments {
                hasher.update(argument.to_string().as_bytes());
                hasher.update(b",");
            }
            let digest = hasher.finalize();
            u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
        }
        _ => 0,
    }
}
