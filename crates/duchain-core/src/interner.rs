//! Value interning
//!
//! `Interner<T>` hands out stable `u32` indices for values so that equal
//! values always share one index. The table is append-only for the lifetime
//! of the interner.
//!
//! Thread-safe: lookups and insertions take `&self`. Insertion goes through
//! the `DashMap` entry API, so two threads interning the same value race on
//! one shard lock and both observe the index of whichever got there first.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// Append-only interning table.
pub struct Interner<T: Hash + Eq + Clone> {
    indices: DashMap<T, u32>,
    values: RwLock<Vec<Arc<T>>>,
}

impl<T: Hash + Eq + Clone> Default for Interner<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Hash + Eq + Clone> Interner<T> {
    pub fn new() -> Self {
        Self {
            indices: DashMap::new(),
            values: RwLock::new(Vec::new()),
        }
    }

    /// Create an interner whose index 0 is `empty`.
    pub fn with_empty(empty: T) -> Self {
        let interner = Self::new();
        interner.intern(empty);
        interner
    }

    /// Intern `value`, returning its index.
    pub fn intern(&self, value: T) -> u32 {
        if let Some(index) = self.indices.get(&value) {
            return *index;
        }

        match self.indices.entry(value) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                let mut values = self.values.write();
                let index = values.len() as u32;
                values.push(Arc::new(entry.key().clone()));
                entry.insert(index);
                index
            }
        }
    }

    /// Index of `value` if it was interned before.
    pub fn find(&self, value: &T) -> Option<u32> {
        self.indices.get(value).map(|index| *index)
    }

    /// Value stored at `index`.
    pub fn get(&self, index: u32) -> Option<Arc<T>> {
        self.values.read().get(index as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Indexed strings
// ============================================================================

static STRINGS: Lazy<Interner<Arc<str>>> = Lazy::new(|| Interner::with_empty(Arc::from("")));

/// Process-wide interned string.
///
/// Index 0 is the empty string. Comparing two `IndexedString`s is a `u32`
/// comparison; [`Ord`] compares the text so sorted output does not depend on
/// interning order.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct IndexedString(u32);

impl IndexedString {
    pub fn new(text: &str) -> Self {
        if text.is_empty() {
            return Self(0);
        }
        Self(STRINGS.intern(Arc::from(text)))
    }

    pub fn index(&self) -> u32 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// The interned text.
    pub fn str(&self) -> Arc<str> {
        STRINGS
            .get(self.0)
            .map(|value| Arc::clone(&*value))
            .unwrap_or_else(|| Arc::from(""))
    }

    /// Number of strings interned so far in this process.
    pub fn repository_size() -> usize {
        STRINGS.len()
    }
}

impl From<&str> for IndexedString {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl PartialOrd for IndexedString {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexedString {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.0 == other.0 {
            return Ordering::Equal;
        }
        self.str().cmp(&other.str())
    }
}

impl fmt::Display for IndexedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.str())
    }
}

impl fmt::Debug for IndexedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.str())
    }
}

impl serde::Serialize for IndexedString {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.str())
    }
}

impl<'de> serde::Deserialize<'de> for IndexedString {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(Self::new(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interner_shares_indices() {
        let interner = Interner::new();
        let a = interner.intern("alpha".to_string());
        let b = interner.intern("beta".to_string());

        assert_ne!(a, b);
        assert_eq!(interner.intern("alpha".to_string()), a);
        assert_eq!(interner.find(&"beta".to_string()), Some(b));
        assert_eq!(interner.find(&"gamma".to_string()), None);
        assert_eq!(interner.get(a).as_deref(), Some(&"alpha".to_string()));
    }

    #[test]
    fn test_with_empty_reserves_zero() {
        let interner = Interner::with_empty(String::new());
        assert_eq!(interner.intern(String::new()), 0);
        assert_eq!(interner.intern("x".to_string()), 1);
    }

    #[test]
    fn test_indexed_string_roundtrip() {
        for text in ["", "a", "abc", "  spaced  ", "operator( )"] {
            let indexed = IndexedString::new(text);
            assert_eq!(&*indexed.str(), text);
            assert_eq!(IndexedString::new(text), indexed);
        }
        assert!(IndexedString::new("").is_empty());
    }

    #[test]
    fn test_indexed_string_orders_by_text() {
        let z = IndexedString::new("zzz-ordering");
        let a = IndexedString::new("aaa-ordering");
        assert!(a < z);
    }
}
