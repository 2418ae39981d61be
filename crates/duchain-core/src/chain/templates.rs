//! Template instantiation and specialization
//!
//! An instantiation is an anonymous declaration next to the template it was
//! created from. It gets its own template-parameter context holding one type
//! alias per bound parameter, and (for class templates) an anonymous internal
//! context that imports the parameter context and contains copies of the
//! template's members with substituted types.
//!
//! Instantiations are cached on the primary template keyed by the interned
//! [`InstantiationInformation`], so equal argument types always yield the
//! same declaration. Creation re-checks the cache under the store write
//! guard; the first writer wins.

use super::store::ChainStore;
use super::DUChain;
use crate::context::{ContextType, Import};
use crate::declaration::{Declaration, DeclarationFlags, DeclarationKind, TemplateFacet};
use crate::error::{usage_error, DUChainError, Result};
use crate::identifier::{Identifier, QualifiedIdentifier};
use crate::indexed::{IndexedContext, IndexedDeclaration};
use crate::instantiation::{IndexedInstantiationInformation, InstantiationInformation};
use crate::observer::{ChangeEvent, ChangeSubject, Modification, Relationship};
use crate::range::{SimpleCursor, SimpleRange};
use crate::types::{AbstractType, IdentifiedType};
use tracing::trace;

/// Template parameters bound to argument types.
pub(crate) type Bindings = Vec<(Identifier, AbstractType)>;

impl DUChain {
    /// Attach the template-parameter context of `declaration`, making it a
    /// template.
    pub fn set_template_parameters_context(
        &self,
        declaration: IndexedDeclaration,
        context: Option<IndexedContext>,
    ) -> Result<()> {
        self.require_write("set_template_parameters_context")?;
        let mut store = self.store.write();
        if let Some(context) = context {
            if store.accessible_context(context).is_none() {
                return usage_error(DUChainError::InvalidHandle { kind: "context" });
            }
        }
        let Some(target) = store.accessible_declaration_mut(declaration) else {
            return usage_error(DUChainError::InvalidHandle {
                kind: "declaration",
            });
        };
        target.template_mut().parameters_context = context;
        Ok(())
    }

    /// Register `specialization` as an explicit specialization of `generic`
    /// for the argument pattern `arguments`. Patterns may contain template
    /// parameters (`C<T*>`).
    pub fn add_specialization(
        &self,
        generic: IndexedDeclaration,
        specialization: IndexedDeclaration,
        arguments: Vec<AbstractType>,
    ) -> Result<()> {
        self.require_write("add_specialization")?;
        let mut guard = self.store.write();
        let store = &mut *guard;
        if generic == specialization
            || store.accessible_declaration(generic).is_none()
            || store.accessible_declaration(specialization).is_none()
        {
            return usage_error(DUChainError::InvalidHandle {
                kind: "declaration",
            });
        }

        if let Some(target) = store.declaration_mut(specialization) {
            let facet = target.template_mut();
            facet.specialized_from = Some(generic);
            facet.instantiated_from = None;
            facet.specialized_with = arguments;
        }
        if let Some(target) = store.declaration_mut(generic) {
            let facet = target.template_mut();
            if !facet.specializations.contains(&specialization) {
                facet.specializations.push(specialization);
            }
        }
        drop(guard);

        self.notify(vec![ChangeEvent::declaration_changed(
            generic,
            Modification::Addition,
            Relationship::Specializations,
            Some(ChangeSubject::Declaration(specialization)),
        )]);
        Ok(())
    }

    pub fn specializations(&self, declaration: IndexedDeclaration) -> Vec<IndexedDeclaration> {
        self.check_read("specializations");
        let store = self.store.read();
        store
            .accessible_declaration(declaration)
            .and_then(Declaration::template)
            .map(|facet| facet.specializations.clone())
            .unwrap_or_default()
    }

    /// Cached instantiations of `declaration`, in handle order.
    pub fn instantiations(&self, declaration: IndexedDeclaration) -> Vec<IndexedDeclaration> {
        self.check_read("instantiations");
        let store = self.store.read();
        let Some(facet) = store
            .accessible_declaration(declaration)
            .and_then(Declaration::template)
        else {
            return Vec::new();
        };
        let mut instantiations: Vec<IndexedDeclaration> = facet
            .instantiations
            .values()
            .copied()
            .filter(|instance| store.declaration(*instance).is_some())
            .collect();
        instantiations.sort();
        instantiations.dedup();
        instantiations
    }

    /// Instantiate the template `declaration` with `arguments`.
    ///
    /// Missing trailing arguments are taken from parameter defaults. An
    /// empty argument list returns the template itself; a non-template with
    /// arguments yields `None`. Only requires the read lock.
    pub fn instantiate(
        &self,
        declaration: IndexedDeclaration,
        arguments: Vec<AbstractType>,
    ) -> Option<IndexedDeclaration> {
        self.check_read("instantiate");
        let (primary, information) = {
            let store = self.store.read();
            let (primary, information) = instantiation_key(&store, declaration, arguments)?;
            if information.arguments.is_empty() {
                return Some(primary);
            }
            if let Some(found) = cached_instantiation(&store, primary, information.indexed()) {
                return Some(found);
            }
            (primary, information)
        };

        let mut guard = self.store.write();
        let store = &mut *guard;
        if let Some(found) = cached_instantiation(store, primary, information.indexed()) {
            return Some(found);
        }
        let mut events = Vec::new();
        let created = create_instantiation(store, primary, &information, &mut events);
        drop(guard);

        self.notify(events);
        created
    }

    /// Re-create the declaration described by `information` starting from
    /// the unspecialized `declaration`. Enclosing instantiations are
    /// specialized first, so `C<int>::C2<float>` yields the cached object.
    pub fn specialize(
        &self,
        declaration: IndexedDeclaration,
        information: IndexedInstantiationInformation,
    ) -> Option<IndexedDeclaration> {
        self.check_read("specialize");
        if information.is_empty() {
            let store = self.store.read();
            return store.accessible_declaration(declaration).map(|_| declaration);
        }

        let information = information.information();
        let mut target = declaration;
        if !information.previous.is_empty() {
            let owner = self.store.read().enclosing_owner(declaration)?;
            let outer = self.specialize(owner, information.previous)?;
            if outer != owner {
                let store = self.store.read();
                target = member_copy(&store, outer, declaration)?;
            }
        }
        self.instantiate(target, information.arguments)
    }
}

/// Primary template and full instantiation information for instantiating
/// `declaration` with `arguments`.
fn instantiation_key(
    store: &ChainStore,
    declaration: IndexedDeclaration,
    mut arguments: Vec<AbstractType>,
) -> Option<(IndexedDeclaration, InstantiationInformation)> {
    let current = store.accessible_declaration(declaration)?;
    let derived = current.is_explicit_specialization()
        || !current
            .instantiation_information()
            .information()
            .arguments
            .is_empty();
    let primary = match current.specialized_from() {
        Some(generic) if derived => generic,
        _ => declaration,
    };
    let primary_declaration = store.declaration(primary)?;

    let parameters = template_parameters(store, primary_declaration);
    if arguments.len() < parameters.len() {
        let mut bindings: Bindings = parameters
            .iter()
            .zip(&arguments)
            .map(|((name, _), argument)| (name.clone(), argument.clone()))
            .collect();
        for (name, default) in parameters.iter().skip(arguments.len()) {
            let Some(default) = default else {
                break;
            };
            let argument = default.substitute(&bindings);
            bindings.push((name.clone(), argument.clone()));
            arguments.push(argument);
        }
    }

    if !arguments.is_empty() && !primary_declaration.is_template() {
        return None;
    }
    let previous = primary_declaration
        .instantiation_information()
        .information()
        .previous;
    Some((primary, InstantiationInformation::new(previous, arguments)))
}

fn cached_instantiation(
    store: &ChainStore,
    primary: IndexedDeclaration,
    information: IndexedInstantiationInformation,
) -> Option<IndexedDeclaration> {
    let found = *store
        .declaration(primary)?
        .template()?
        .instantiations
        .get(&information)?;
    store.declaration(found).map(|_| found)
}

/// Parameter names of a template with their default types, in order.
pub(crate) fn template_parameters(
    store: &ChainStore,
    declaration: &Declaration,
) -> Vec<(Identifier, Option<AbstractType>)> {
    let Some(context) = declaration
        .template()
        .and_then(|facet| facet.parameters_context)
        .and_then(|context| store.context(context))
    else {
        return Vec::new();
    };
    context
        .local_declarations
        .iter()
        .filter_map(|parameter| store.declaration(*parameter))
        .map(|parameter| {
            let default = parameter
                .template_parameter
                .as_ref()
                .and_then(|facet| facet.default_type.clone());
            (parameter.identifier.clone(), default)
        })
        .collect()
}

/// Match an argument against a specialization pattern, binding the
/// pattern's template parameters.
pub(crate) fn match_pattern(
    pattern: &AbstractType,
    argument: &AbstractType,
    bindings: &mut Bindings,
) -> bool {
    match (pattern, argument) {
        (AbstractType::TemplateParameter { identifier, .. }, _) => {
            if let Some((_, bound)) = bindings.iter().find(|(name, _)| name == identifier) {
                return bound == argument;
            }
            bindings.push((identifier.clone(), argument.clone()));
            true
        }
        (
            AbstractType::Pointer {
                base: pattern_base,
                modifiers: pattern_modifiers,
            },
            AbstractType::Pointer { base, modifiers },
        )
        | (
            AbstractType::Reference {
                base: pattern_base,
                modifiers: pattern_modifiers,
            },
            AbstractType::Reference { base, modifiers },
        ) => pattern_modifiers == modifiers && match_pattern(pattern_base, base, bindings),
        _ => pattern == argument,
    }
}

/// The declaration to instantiate from: the most specific matching explicit
/// specialization, or the primary itself. The flag is set when a
/// specialization matches every argument exactly.
fn select_base(
    store: &ChainStore,
    primary: IndexedDeclaration,
    arguments: &[AbstractType],
) -> Option<(IndexedDeclaration, Bindings, bool)> {
    let primary_declaration = store.declaration(primary)?;
    let facet = primary_declaration.template()?;

    let mut best: Option<(usize, IndexedDeclaration, Bindings)> = None;
    for specialization in &facet.specializations {
        let Some(pattern) = store
            .declaration(*specialization)
            .and_then(Declaration::template)
            .map(|facet| &facet.specialized_with)
        else {
            continue;
        };
        if pattern.len() != arguments.len() {
            continue;
        }
        let mut bindings = Vec::new();
        let matches = pattern
            .iter()
            .zip(arguments)
            .all(|(pattern, argument)| match_pattern(pattern, argument, &mut bindings));
        if !matches {
            continue;
        }
        let score = pattern
            .iter()
            .filter(|pattern| !pattern.has_template_parameters())
            .count();
        if best.as_ref().map_or(true, |(best_score, ..)| score > *best_score) {
            best = Some((score, *specialization, bindings));
        }
    }

    match best {
        Some((score, specialization, bindings)) => {
            Some((specialization, bindings, score == arguments.len()))
        }
        None => {
            let bindings = template_parameters(store, primary_declaration)
                .into_iter()
                .map(|(name, _)| name)
                .zip(arguments.iter().cloned())
                .collect();
            Some((primary, bindings, false))
        }
    }
}

fn create_instantiation(
    store: &mut ChainStore,
    primary: IndexedDeclaration,
    information: &InstantiationInformation,
    events: &mut Vec<ChangeEvent>,
) -> Option<IndexedDeclaration> {
    let arguments = &information.arguments;
    let indexed = information.indexed();
    let (base, own_bindings, exact) = select_base(store, primary, arguments)?;
    if exact {
        store
            .declaration_mut(primary)?
            .template_mut()
            .instantiations
            .insert(indexed, base);
        return Some(base);
    }

    let primary_declaration = store.declaration(primary)?;
    let generic_id = primary_declaration.id().unspecialized();
    let mut bindings = primary_declaration
        .template()
        .map(|facet| facet.bindings.clone())
        .unwrap_or_default();
    bindings.extend(own_bindings.iter().cloned());

    let base_declaration = store.declaration(base)?.clone();
    let context = base_declaration.context?;
    let mut identifier = base_declaration.identifier.clone();
    identifier.set_template_identifiers(
        arguments
            .iter()
            .map(AbstractType::to_type_identifier)
            .collect(),
    );

    let instance = store.create_declaration(
        context,
        identifier.clone(),
        base_declaration.range,
        base_declaration.kind,
        true,
    )?;
    let id = generic_id.with_specialization(indexed);
    let parameters = instantiate_parameters(store, context, base_declaration.range, &own_bindings)?;
    let internal = match base_declaration.internal_context {
        Some(base_internal) => instantiate_internal_context(
            store,
            instance,
            base_internal,
            parameters,
            &identifier,
            &bindings,
            indexed,
        ),
        None => None,
    };

    let target = store.declaration_mut(instance)?;
    let abstract_type = match (base_declaration.kind, &base_declaration.abstract_type) {
        (DeclarationKind::Type, Some(AbstractType::Identified(identified))) => {
            Some(AbstractType::Identified(IdentifiedType {
                qualified_identifier: target.qualified_identifier.clone(),
                declaration: Some(id),
                modifiers: identified.modifiers,
            }))
        }
        (_, abstract_type) => abstract_type
            .as_ref()
            .map(|abstract_type| abstract_type.substitute(&bindings)),
    };
    target.abstract_type = abstract_type;
    target.flags = base_declaration.flags;
    target.comment = base_declaration.comment.clone();
    target.class_member = base_declaration.class_member.clone();
    target.function = base_declaration.function.clone();
    target.template_parameter = base_declaration.template_parameter.clone();
    target.internal_context = internal;
    target.template = Some(Box::new(TemplateFacet {
        parameters_context: Some(parameters),
        instantiated_from: Some(base),
        specialized_from: Some(primary),
        instantiation_information: indexed,
        generic_id: Some(generic_id),
        bindings,
        ..Default::default()
    }));
    trace!("Instantiated {} from {:?}", target.qualified_identifier, base);

    store
        .declaration_mut(primary)?
        .template_mut()
        .instantiations
        .insert(indexed, instance);
    events.push(ChangeEvent::declaration_changed(
        primary,
        Modification::Addition,
        Relationship::Instantiations,
        Some(ChangeSubject::Declaration(instance)),
    ));
    Some(instance)
}

/// Anonymous template context with one type alias per bound parameter.
fn instantiate_parameters(
    store: &mut ChainStore,
    parent: IndexedContext,
    range: SimpleRange,
    bindings: &[(Identifier, AbstractType)],
) -> Option<IndexedContext> {
    let parameters = store.create_context(
        parent,
        range,
        ContextType::Template,
        QualifiedIdentifier::new(),
        true,
    )?;
    for (name, argument) in bindings {
        let alias =
            store.create_declaration(parameters, name.clone(), range, DeclarationKind::Type, false)?;
        if let Some(alias) = store.declaration_mut(alias) {
            alias.abstract_type = Some(argument.clone());
            alias.flags = DeclarationFlags::TYPE_ALIAS;
        }
    }
    Some(parameters)
}

/// Anonymous copy of `base_internal` owned by `instance`, importing the
/// instantiation's parameters and holding substituted member copies.
fn instantiate_internal_context(
    store: &mut ChainStore,
    instance: IndexedDeclaration,
    base_internal: IndexedContext,
    parameters: IndexedContext,
    identifier: &Identifier,
    bindings: &[(Identifier, AbstractType)],
    information: IndexedInstantiationInformation,
) -> Option<IndexedContext> {
    let base_context = store.context(base_internal)?.clone();
    let parent = store.declaration(instance)?.context?;
    let internal = store.create_context(
        parent,
        base_context.range,
        base_context.context_type,
        QualifiedIdentifier::from_identifier(identifier.clone()),
        true,
    )?;

    let mut imports = vec![Import::new(parameters, SimpleCursor::invalid())];
    imports.extend(base_context.imported_parents.iter().copied());
    for import in &imports {
        if let Some(target) = store.context_mut(import.context) {
            target.importers.push(internal);
        }
    }
    if let Some(context) = store.context_mut(internal) {
        context.owner = Some(instance);
        context.imported_parents = imports;
    }

    let member_information = InstantiationInformation::new(information, Vec::new()).indexed();
    for member in &base_context.local_declarations {
        let Some(original) = store.declaration(*member).cloned() else {
            continue;
        };
        let Some(copy) = store.create_declaration(
            internal,
            original.identifier.clone(),
            original.range,
            original.kind,
            false,
        ) else {
            continue;
        };
        let Some(copy) = store.declaration_mut(copy) else {
            continue;
        };
        copy.abstract_type = original
            .abstract_type
            .as_ref()
            .map(|abstract_type| abstract_type.substitute(bindings));
        copy.flags = original.flags;
        copy.comment = original.comment.clone();
        copy.class_member = original.class_member.clone();
        copy.function = original.function.clone();
        copy.template_parameter = original.template_parameter.clone();
        // Shared with the original, which keeps owning it.
        copy.internal_context = original.internal_context;
        copy.template = Some(Box::new(TemplateFacet {
            parameters_context: original
                .template()
                .and_then(|facet| facet.parameters_context),
            instantiated_from: Some(*member),
            instantiation_information: member_information,
            generic_id: Some(original.id().unspecialized()),
            bindings: bindings.to_vec(),
            ..Default::default()
        }));
    }
    Some(internal)
}

/// The copy of `member` inside the instantiation `outer`.
fn member_copy(
    store: &ChainStore,
    outer: IndexedDeclaration,
    member: IndexedDeclaration,
) -> Option<IndexedDeclaration> {
    let internal = store.declaration(outer)?.internal_context?;
    let candidates = &store.context(internal)?.local_declarations;
    let name = store.declaration(member)?.identifier.clone();

    let copied = candidates.iter().copied().find(|candidate| {
        store
            .declaration(*candidate)
            .is_some_and(|candidate| candidate.instantiated_from() == Some(member))
    });
    copied.or_else(|| {
        candidates.iter().copied().find(|candidate| {
            store
                .declaration(*candidate)
                .is_some_and(|candidate| candidate.identifier == name)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IntegralKind;

    #[test]
    fn test_match_pattern_binds_parameters() {
        let int = AbstractType::integral(IntegralKind::Int);
        let pattern = AbstractType::pointer_to(AbstractType::template_parameter("T"));
        let mut bindings = Vec::new();

        assert!(match_pattern(
            &pattern,
            &AbstractType::pointer_to(int.clone()),
            &mut bindings
        ));
        assert_eq!(bindings, vec![(Identifier::new("T"), int.clone())]);

        let mut bindings = Vec::new();
        assert!(!match_pattern(&pattern, &int, &mut bindings));
    }

    #[test]
    fn test_match_pattern_requires_consistent_bindings() {
        let t = AbstractType::template_parameter("T");
        let int = AbstractType::integral(IntegralKind::Int);
        let float = AbstractType::integral(IntegralKind::Float);
        let mut bindings = Vec::new();

        assert!(match_pattern(&t, &int, &mut bindings));
        assert!(match_pattern(&t, &int, &mut bindings));
        assert!(!match_pattern(&t, &float, &mut bindings));
    }
}
