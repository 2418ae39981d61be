//! Structural type model
//!
//! Types attached to declarations and used as template arguments. Equality is
//! structural; an identified (class/enum/typedef) type compares by qualified
//! identifier and modifiers only, so the type of a forward declaration equals
//! the type of its definition.

use crate::declaration_id::DeclarationId;
use crate::identifier::{Identifier, QualifiedIdentifier, TypeIdentifier};
use crate::interner::Interner;
use bitflags::bitflags;
use once_cell::sync::Lazy;
use std::fmt;
use std::hash::{Hash, Hasher};

bitflags! {
    /// cv-qualifiers and integral size/sign modifiers.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct TypeModifiers: u32 {
        const CONST = 1;
        const VOLATILE = 1 << 1;
        const UNSIGNED = 1 << 2;
        const SIGNED = 1 << 3;
        const SHORT = 1 << 4;
        const LONG = 1 << 5;
        const LONG_LONG = 1 << 6;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IntegralKind {
    Void,
    Bool,
    Char,
    WChar,
    Int,
    Float,
    Double,
}

impl IntegralKind {
    fn name(&self) -> &'static str {
        match self {
            IntegralKind::Void => "void",
            IntegralKind::Bool => "bool",
            IntegralKind::Char => "char",
            IntegralKind::WChar => "wchar_t",
            IntegralKind::Int => "int",
            IntegralKind::Float => "float",
            IntegralKind::Double => "double",
        }
    }
}

/// A class, struct, enum or typedef type named by its qualified identifier.
#[derive(Clone, Debug)]
pub struct IdentifiedType {
    pub qualified_identifier: QualifiedIdentifier,
    /// Declaration the type was taken from, if known. Not part of equality.
    pub declaration: Option<DeclarationId>,
    pub modifiers: TypeModifiers,
}

impl PartialEq for IdentifiedType {
    fn eq(&self, other: &Self) -> bool {
        self.modifiers == other.modifiers
            && self
                .qualified_identifier
                .same_identifiers(&other.qualified_identifier)
    }
}

impl Eq for IdentifiedType {}

impl Hash for IdentifiedType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.qualified_identifier.segments().hash(state);
        self.modifiers.hash(state);
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AbstractType {
    Integral {
        kind: IntegralKind,
        modifiers: TypeModifiers,
    },
    Pointer {
        base: Box<AbstractType>,
        modifiers: TypeModifiers,
    },
    Reference {
        base: Box<AbstractType>,
        modifiers: TypeModifiers,
    },
    Identified(IdentifiedType),
    /// An unbound template parameter such as `T`.
    TemplateParameter {
        identifier: Identifier,
        modifiers: TypeModifiers,
    },
    Function {
        return_type: Box<AbstractType>,
        arguments: Vec<AbstractType>,
        modifiers: TypeModifiers,
    },
    /// A type name that could not be resolved yet.
    Delayed { identifier: TypeIdentifier },
}

impl AbstractType {
    pub fn integral(kind: IntegralKind) -> Self {
        AbstractType::Integral {
            kind,
            modifiers: TypeModifiers::empty(),
        }
    }

    pub fn identified(qualified_identifier: QualifiedIdentifier) -> Self {
        AbstractType::Identified(IdentifiedType {
            qualified_identifier,
            declaration: None,
            modifiers: TypeModifiers::empty(),
        })
    }

    pub fn template_parameter(name: &str) -> Self {
        AbstractType::TemplateParameter {
            identifier: Identifier::new(name),
            modifiers: TypeModifiers::empty(),
        }
    }

    pub fn pointer_to(base: AbstractType) -> Self {
        AbstractType::Pointer {
            base: Box::new(base),
            modifiers: TypeModifiers::empty(),
        }
    }

    pub fn reference_to(base: AbstractType) -> Self {
        AbstractType::Reference {
            base: Box::new(base),
            modifiers: TypeModifiers::empty(),
        }
    }

    pub fn function(return_type: AbstractType, arguments: Vec<AbstractType>) -> Self {
        AbstractType::Function {
            return_type: Box::new(return_type),
            arguments,
            modifiers: TypeModifiers::empty(),
        }
    }

    /// Builtin type for a spelled name (`int`, `unsigned long`, `double`).
    pub fn builtin(name: &str) -> Option<Self> {
        let mut modifiers = TypeModifiers::empty();
        let mut kind = None;
        for word in name.split_whitespace() {
            match word {
                "unsigned" => modifiers |= TypeModifiers::UNSIGNED,
                "signed" => modifiers |= TypeModifiers::SIGNED,
                "short" => modifiers |= TypeModifiers::SHORT,
                "long" if modifiers.contains(TypeModifiers::LONG) => {
                    modifiers.remove(TypeModifiers::LONG);
                    modifiers |= TypeModifiers::LONG_LONG;
                }
                "long" => modifiers |= TypeModifiers::LONG,
                "void" => kind = Some(IntegralKind::Void),
                "bool" => kind = Some(IntegralKind::Bool),
                "char" => kind = Some(IntegralKind::Char),
                "wchar_t" => kind = Some(IntegralKind::WChar),
                "int" => kind = Some(IntegralKind::Int),
                "float" => kind = Some(IntegralKind::Float),
                "double" => kind = Some(IntegralKind::Double),
                _ => return None,
            }
        }

        let kind = match kind {
            Some(kind) => kind,
            None if !modifiers.is_empty() => IntegralKind::Int,
            None => return None,
        };
        Some(AbstractType::Integral { kind, modifiers })
    }

    pub fn modifiers(&self) -> TypeModifiers {
        match self {
            AbstractType::Integral { modifiers, .. }
            | AbstractType::Pointer { modifiers, .. }
            | AbstractType::Reference { modifiers, .. }
            | AbstractType::TemplateParameter { modifiers, .. }
            | AbstractType::Function { modifiers, .. } => *modifiers,
            AbstractType::Identified(identified) => identified.modifiers,
            AbstractType::Delayed { identifier } => {
                if identifier.is_const() {
                    TypeModifiers::CONST
                } else {
                    TypeModifiers::empty()
                }
            }
        }
    }

    /// Copy with `extra` modifiers added.
    pub fn with_modifiers(&self, extra: TypeModifiers) -> Self {
        let mut result = self.clone();
        match &mut result {
            AbstractType::Integral { modifiers, .. }
            | AbstractType::Pointer { modifiers, .. }
            | AbstractType::Reference { modifiers, .. }
            | AbstractType::TemplateParameter { modifiers, .. }
            | AbstractType::Function { modifiers, .. } => *modifiers |= extra,
            AbstractType::Identified(identified) => identified.modifiers |= extra,
            AbstractType::Delayed { identifier } => {
                if extra.contains(TypeModifiers::CONST) {
                    identifier.set_const(true);
                }
            }
        }
        result
    }

    /// Apply the const/pointer/reference decoration of a type identifier.
    pub fn decorated_like(&self, spelled: &TypeIdentifier) -> Self {
        let mut result = if spelled.is_const() {
            self.with_modifiers(TypeModifiers::CONST)
        } else {
            self.clone()
        };
        if spelled.is_volatile() {
            result = result.with_modifiers(TypeModifiers::VOLATILE);
        }
        for depth in 0..spelled.pointer_depth() {
            let modifiers = if spelled.is_const_pointer(depth) {
                TypeModifiers::CONST
            } else {
                TypeModifiers::empty()
            };
            result = AbstractType::Pointer {
                base: Box::new(result),
                modifiers,
            };
        }
        if spelled.is_reference() {
            result = AbstractType::reference_to(result);
        }
        result
    }

    /// Whether the type still mentions an unbound template parameter.
    pub fn has_template_parameters(&self) -> bool {
        match self {
            AbstractType::TemplateParameter { .. } => true,
            AbstractType::Pointer { base, .. } | AbstractType::Reference { base, .. } => {
                base.has_template_parameters()
            }
            AbstractType::Function {
                return_type,
                arguments,
                ..
            } => {
                return_type.has_template_parameters()
                    || arguments.iter().any(AbstractType::has_template_parameters)
            }
            AbstractType::Integral { .. }
            | AbstractType::Identified(_)
            | AbstractType::Delayed { .. } => false,
        }
    }

    /// Replace template parameters by their bound types.
    pub fn substitute(&self, bindings: &[(Identifier, AbstractType)]) -> AbstractType {
        match self {
            AbstractType::TemplateParameter {
                identifier,
                modifiers,
            } => bindings
                .iter()
                .find(|(name, _)| name == identifier)
                .map(|(_, bound)| bound.with_modifiers(*modifiers))
                .unwrap_or_else(|| self.clone()),
            AbstractType::Pointer { base, modifiers } => AbstractType::Pointer {
                base: Box::new(base.substitute(bindings)),
                modifiers: *modifiers,
            },
            AbstractType::Reference { base, modifiers } => AbstractType::Reference {
                base: Box::new(base.substitute(bindings)),
                modifiers: *modifiers,
            },
            AbstractType::Function {
                return_type,
                arguments,
                modifiers,
            } => AbstractType::Function {
                return_type: Box::new(return_type.substitute(bindings)),
                arguments: arguments.iter().map(|a| a.substitute(bindings)).collect(),
                modifiers: *modifiers,
            },
            AbstractType::Integral { .. }
            | AbstractType::Identified(_)
            | AbstractType::Delayed { .. } => self.clone(),
        }
    }

    /// Spelling of this type as a template argument.
    pub fn to_type_identifier(&self) -> TypeIdentifier {
        match self {
            AbstractType::Delayed { identifier } => identifier.clone(),
            other => TypeIdentifier::parse(&other.to_string()),
        }
    }

    pub fn indexed(&self) -> IndexedType {
        IndexedType(TYPES.intern(self.clone()))
    }
}

fn write_modifiers(f: &mut fmt::Formatter<'_>, modifiers: TypeModifiers) -> fmt::Result {
    if modifiers.contains(TypeModifiers::CONST) {
        f.write_str("const ")?;
    }
    if modifiers.contains(TypeModifiers::VOLATILE) {
        f.write_str("volatile ")?;
    }
    Ok(())
}

impl fmt::Display for AbstractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbstractType::Integral { kind, modifiers } => {
                write_modifiers(f, *modifiers)?;
                if modifiers.contains(TypeModifiers::UNSIGNED) {
                    f.write_str("unsigned ")?;
                }
                if modifiers.contains(TypeModifiers::SIGNED) {
                    f.write_str("signed ")?;
                }
                if modifiers.contains(TypeModifiers::SHORT) {
                    f.write_str("short ")?;
                }
                if modifiers.contains(TypeModifiers::LONG) {
                    f.write_str("long ")?;
                }
                if modifiers.contains(TypeModifiers::LONG_LONG) {
                    f.write_str("long long ")?;
                }
                f.write_str(kind.name())
            }
            AbstractType::Pointer { base, modifiers } => {
                write!(f, "{}*", base)?;
                if modifiers.contains(TypeModifiers::CONST) {
                    f.write_str(" const")?;
                }
                Ok(())
            }
            AbstractType::Reference { base, .. } => write!(f, "{}&", base),
            AbstractType::Identified(identified) => {
                write_modifiers(f, identified.modifiers)?;
                write!(f, "{}", identified.qualified_identifier)
            }
            AbstractType::TemplateParameter {
                identifier,
                modifiers,
            } => {
                write_modifiers(f, *modifiers)?;
                write!(f, "{}", identifier)
            }
            AbstractType::Function {
                return_type,
                arguments,
                ..
            } => {
                write!(f, "{} (", return_type)?;
                for (i, argument) in arguments.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", argument)?;
                }
                f.write_str(")")
            }
            AbstractType::Delayed { identifier } => write!(f, "{}", identifier),
        }
    }
}

static TYPES: Lazy<Interner<AbstractType>> = Lazy::new(Interner::new);

/// Interned [`AbstractType`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IndexedType(u32);

impl IndexedType {
    pub fn index(&self) -> u32 {
        self.0
    }

    pub fn abstract_type(&self) -> Option<AbstractType> {
        TYPES.get(self.0).map(|t| (*t).clone())
    }
}
