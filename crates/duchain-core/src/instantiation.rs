//! Template instantiation information
//!
//! Identifies one instantiation of a template: the argument types at this
//! nesting level plus a link to the information of the enclosing
//! instantiation, so `C<int>::C2<float>` is `{ previous: {[int]}, [float] }`.

use crate::interner::Interner;
use crate::types::AbstractType;
use once_cell::sync::Lazy;
use std::fmt;

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct InstantiationInformation {
    pub previous: IndexedInstantiationInformation,
    pub arguments: Vec<AbstractType>,
}

impl InstantiationInformation {
    pub fn new(previous: IndexedInstantiationInformation, arguments: Vec<AbstractType>) -> Self {
        Self {
            previous,
            arguments,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.previous.is_empty() && self.arguments.is_empty()
    }

    pub fn indexed(&self) -> IndexedInstantiationInformation {
        if self.is_empty() {
            return IndexedInstantiationInformation::default();
        }
        IndexedInstantiationInformation(INFORMATION.intern(self.clone()))
    }
}

impl fmt::Display for InstantiationInformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.previous.is_empty() {
            write!(f, "{}::", self.previous)?;
        }
        f.write_str("<")?;
        for (i, argument) in self.arguments.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", argument)?;
        }
        f.write_str(">")
    }
}

static INFORMATION: Lazy<Interner<InstantiationInformation>> =
    Lazy::new(|| Interner::with_empty(InstantiationInformation::default()));

/// Interned [`InstantiationInformation`]; index 0 means "not an instantiation".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexedInstantiationInformation(u32);

impl IndexedInstantiationInformation {
    pub fn index(&self) -> u32 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn information(&self) -> InstantiationInformation {
        INFORMATION
            .get(self.0)
            .map(|info| (*info).clone())
            .unwrap_or_default()
    }
}

impl fmt::Display for IndexedInstantiationInformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.information())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IntegralKind;

    #[test]
    fn test_empty_is_index_zero() {
        assert!(InstantiationInformation::default().indexed().is_empty());
    }

    #[test]
    fn test_nested_information() {
        let outer = InstantiationInformation::new(
            IndexedInstantiationInformation::default(),
            vec![AbstractType::integral(IntegralKind::Int)],
        )
        .indexed();
        let inner = InstantiationInformation::new(
            outer,
            vec![AbstractType::integral(IntegralKind::Float)],
        );

        assert_eq!(inner.indexed(), inner.clone().indexed());
        assert_ne!(inner.indexed(), outer);
        assert_eq!(inner.to_string(), "<int>::<float>");
    }
}
