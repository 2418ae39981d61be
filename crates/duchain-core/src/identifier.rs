//! Identifiers and the identifier repository
//!
//! A [`QualifiedIdentifier`] is a sequence of [`Identifier`] segments, each a
//! name plus an optional template-argument list, optionally marked as
//! explicitly global (`::foo`). Parsing tolerates whitespace
//! (`" Area<A,B>::jump <F> ::tes<C>"`) and keeps operator names such as
//! `operator<` or `operator( )` in a single segment, printed verbatim.
//!
//! # Canonical text
//!
//! `to_string` prints segments joined by `::` and template arguments as
//! `Name<A, B>`. For canonical text `to_string(intern(s)) == s`; for any other
//! spelling `intern(to_string(intern(s))) == intern(s)`.
//!
//! # Interning
//!
//! Identifiers and qualified identifiers are interned process-wide. Equal
//! values (structurally, whitespace-insensitive) always receive the same
//! handle, from any thread.

use crate::interner::{IndexedString, Interner};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;
use std::sync::Arc;

// ============================================================================
// Type identifiers
// ============================================================================

/// A qualified type name with cv/pointer/reference modifiers, as used in
/// template argument lists (`const A*`, `B<int>&`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TypeIdentifier {
    qualified: QualifiedIdentifier,
    is_const: bool,
    is_volatile: bool,
    pointer_depth: u8,
    /// Bit `n` set: pointer level `n` is itself const (`A* const`).
    const_pointers: u32,
    is_reference: bool,
}

impl TypeIdentifier {
    pub fn new(qualified: QualifiedIdentifier) -> Self {
        Self {
            qualified,
            ..Default::default()
        }
    }

    pub fn parse(text: &str) -> Self {
        let mut rest = text.trim();
        let mut is_const = false;
        let mut is_volatile = false;

        loop {
            if let Some(stripped) = strip_keyword_prefix(rest, "const") {
                is_const = true;
                rest = stripped;
            } else if let Some(stripped) = strip_keyword_prefix(rest, "volatile") {
                is_volatile = true;
                rest = stripped;
            } else {
                break;
            }
        }

        // Trailing modifiers are collected back to front.
        let mut trailing = Vec::new();
        let mut is_reference = false;
        loop {
            rest = rest.trim_end();
            if let Some(stripped) = rest.strip_suffix('&') {
                is_reference = true;
                rest = stripped;
            } else if let Some(stripped) = rest.strip_suffix('*') {
                trailing.push(Trailing::Pointer);
                rest = stripped;
            } else if let Some(stripped) = strip_keyword_suffix(rest, "const") {
                trailing.push(Trailing::Const);
                rest = stripped;
            } else {
                break;
            }
        }

        let mut pointer_depth = 0u8;
        let mut const_pointers = 0u32;
        for token in trailing.iter().rev() {
            match token {
                Trailing::Pointer => pointer_depth = pointer_depth.saturating_add(1),
                Trailing::Const if pointer_depth == 0 => is_const = true,
                Trailing::Const => const_pointers |= 1 << (pointer_depth - 1).min(31),
            }
        }

        Self {
            qualified: QualifiedIdentifier::parse(rest),
            is_const,
            is_volatile,
            pointer_depth,
            const_pointers,
            is_reference,
        }
    }

    pub fn qualified_identifier(&self) -> &QualifiedIdentifier {
        &self.qualified
    }

    pub fn is_const(&self) -> bool {
        self.is_const
    }

    pub fn set_const(&mut self, is_const: bool) {
        self.is_const = is_const;
    }

    pub fn is_volatile(&self) -> bool {
        self.is_volatile
    }

    pub fn pointer_depth(&self) -> u8 {
        self.pointer_depth
    }

    /// Whether pointer level `depth` (0-based) is const.
    pub fn is_const_pointer(&self, depth: u8) -> bool {
        depth < 32 && self.const_pointers & (1 << depth) != 0
    }

    pub fn set_pointer_depth(&mut self, depth: u8) {
        self.pointer_depth = depth;
    }

    pub fn is_reference(&self) -> bool {
        self.is_reference
    }

    pub fn set_reference(&mut self, is_reference: bool) {
        self.is_reference = is_reference;
    }
}

enum Trailing {
    Pointer,
    Const,
}

impl fmt::Display for TypeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_const {
            f.write_str("const ")?;
        }
        if self.is_volatile {
            f.write_str("volatile ")?;
        }
        write!(f, "{}", self.qualified)?;
        for depth in 0..self.pointer_depth {
            f.write_str("*")?;
            if self.is_const_pointer(depth) {
                f.write_str(" const")?;
            }
        }
        if self.is_reference {
            f.write_str("&")?;
        }
        Ok(())
    }
}

// ============================================================================
// Identifier
// ============================================================================

/// One segment of a qualified identifier.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Identifier {
    name: IndexedString,
    template_identifiers: Vec<TypeIdentifier>,
    /// `Test<>` carries an explicit, empty argument list.
    explicit_template_list: bool,
}

impl Identifier {
    pub fn new(name: &str) -> Self {
        Self {
            name: IndexedString::new(name.trim()),
            ..Default::default()
        }
    }

    /// Parse a single segment such as `jump <F>` or `operator<=`.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if is_operator_segment(text) {
            return Self {
                name: IndexedString::new(text),
                ..Default::default()
            };
        }

        let chars: Vec<char> = text.chars().collect();
        let Some(open) = chars.iter().position(|&c| c == '<') else {
            return Self::new(text);
        };

        let name: String = chars[..open].iter().collect();
        let mut depth = 0i32;
        let mut close = chars.len();
        for (offset, &c) in chars[open..].iter().enumerate() {
            match c {
                '<' | '(' | '[' => depth += 1,
                '>' | ')' | ']' => {
                    depth -= 1;
                    if depth == 0 {
                        close = open + offset;
                        break;
                    }
                }
                _ => {}
            }
        }

        let inner: String = chars[open + 1..close.min(chars.len())].iter().collect();
        let template_identifiers = if inner.trim().is_empty() {
            Vec::new()
        } else {
            split_top_level(&inner, ',')
                .iter()
                .map(|argument| TypeIdentifier::parse(argument))
                .collect()
        };

        Self {
            name: IndexedString::new(name.trim()),
            template_identifiers,
            explicit_template_list: true,
        }
    }

    pub fn name(&self) -> IndexedString {
        self.name
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && !self.has_template_arguments_list()
    }

    pub fn template_identifiers(&self) -> &[TypeIdentifier] {
        &self.template_identifiers
    }

    pub fn template_identifiers_count(&self) -> usize {
        self.template_identifiers.len()
    }

    /// True for `Test<>` as well as `Test<A>`, false for plain `Test`.
    pub fn has_template_arguments_list(&self) -> bool {
        self.explicit_template_list || !self.template_identifiers.is_empty()
    }

    pub fn set_template_identifiers(&mut self, arguments: Vec<TypeIdentifier>) {
        self.template_identifiers = arguments;
        self.explicit_template_list = true;
    }

    pub fn append_template_identifier(&mut self, argument: TypeIdentifier) {
        self.template_identifiers.push(argument);
        self.explicit_template_list = true;
    }

    pub fn clear_template_identifiers(&mut self) {
        self.template_identifiers.clear();
        self.explicit_template_list = false;
    }

    /// The bare name without any template argument list.
    pub fn without_template_arguments(&self) -> Identifier {
        Identifier {
            name: self.name,
            ..Default::default()
        }
    }

    pub fn is_operator(&self) -> bool {
        is_operator_segment(&self.name.str())
    }

    pub fn index(&self) -> IndexedIdentifier {
        IndexedIdentifier(REPOSITORY.identifiers.intern(self.clone()))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if self.has_template_arguments_list() {
            f.write_str("<")?;
            for (i, argument) in self.template_identifiers.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}", argument)?;
            }
            f.write_str(">")?;
        }
        Ok(())
    }
}

// ============================================================================
// QualifiedIdentifier
// ============================================================================

/// A `::`-separated sequence of identifiers.
///
/// `==` includes the explicitly-global flag; use
/// [`QualifiedIdentifier::same_identifiers`] to compare segments only.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct QualifiedIdentifier {
    segments: Vec<Identifier>,
    explicitly_global: bool,
}

impl QualifiedIdentifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        let explicitly_global = trimmed.starts_with("::");
        let body = if explicitly_global {
            &trimmed[2..]
        } else {
            trimmed
        };

        let segments = split_top_level(body, ':')
            .iter()
            .map(|segment| segment.trim())
            .filter(|segment| !segment.is_empty())
            .map(Identifier::parse)
            .collect();

        Self {
            segments,
            explicitly_global,
        }
    }

    pub fn from_identifier(identifier: Identifier) -> Self {
        Self {
            segments: vec![identifier],
            explicitly_global: false,
        }
    }

    pub fn count(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn at(&self, index: usize) -> Option<&Identifier> {
        self.segments.get(index)
    }

    pub fn first(&self) -> Option<&Identifier> {
        self.segments.first()
    }

    pub fn last(&self) -> Option<&Identifier> {
        self.segments.last()
    }

    pub fn last_mut(&mut self) -> Option<&mut Identifier> {
        self.segments.last_mut()
    }

    pub fn segments(&self) -> &[Identifier] {
        &self.segments
    }

    pub fn explicitly_global(&self) -> bool {
        self.explicitly_global
    }

    pub fn set_explicitly_global(&mut self, explicitly_global: bool) {
        self.explicitly_global = explicitly_global;
    }

    pub fn push(&mut self, identifier: Identifier) {
        self.segments.push(identifier);
    }

    pub fn push_qualified(&mut self, other: &QualifiedIdentifier) {
        self.segments.extend(other.segments.iter().cloned());
    }

    pub fn pop(&mut self) -> Option<Identifier> {
        self.segments.pop()
    }

    /// Segments from `start` to the end.
    pub fn mid(&self, start: usize) -> QualifiedIdentifier {
        QualifiedIdentifier {
            segments: self.segments.iter().skip(start).cloned().collect(),
            explicitly_global: self.explicitly_global && start == 0,
        }
    }

    /// The first `count` segments.
    pub fn left(&self, count: usize) -> QualifiedIdentifier {
        QualifiedIdentifier {
            segments: self.segments.iter().take(count).cloned().collect(),
            explicitly_global: self.explicitly_global,
        }
    }

    /// Segment-wise equality, ignoring the explicitly-global flag.
    pub fn same_identifiers(&self, other: &QualifiedIdentifier) -> bool {
        self.segments == other.segments
    }

    pub fn begins_with(&self, prefix: &QualifiedIdentifier) -> bool {
        prefix.segments.len() <= self.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// Copy with the explicitly-global flag cleared.
    pub fn relative(&self) -> QualifiedIdentifier {
        QualifiedIdentifier {
            segments: self.segments.clone(),
            explicitly_global: false,
        }
    }

    pub fn index(&self) -> IndexedQualifiedIdentifier {
        IndexedQualifiedIdentifier(REPOSITORY.qualified.intern(self.clone()))
    }
}

impl Add<&QualifiedIdentifier> for &QualifiedIdentifier {
    type Output = QualifiedIdentifier;

    fn add(self, rhs: &QualifiedIdentifier) -> QualifiedIdentifier {
        let mut result = self.clone();
        result.push_qualified(rhs);
        result
    }
}

impl From<Identifier> for QualifiedIdentifier {
    fn from(identifier: Identifier) -> Self {
        Self::from_identifier(identifier)
    }
}

impl From<&str> for QualifiedIdentifier {
    fn from(text: &str) -> Self {
        Self::parse(text)
    }
}

impl fmt::Display for QualifiedIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.explicitly_global {
            f.write_str("::")?;
        }
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("::")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

impl Serialize for QualifiedIdentifier {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for QualifiedIdentifier {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(Self::parse(&text))
    }
}

// ============================================================================
// Interned handles
// ============================================================================

/// Interned [`Identifier`]. Index 0 is the empty identifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexedIdentifier(u32);

impl IndexedIdentifier {
    pub fn index(&self) -> u32 {
        self.0
    }

    pub fn identifier(&self) -> Identifier {
        REPOSITORY
            .identifiers
            .get(self.0)
            .map(|value| (*value).clone())
            .unwrap_or_default()
    }
}

/// Interned [`QualifiedIdentifier`]. Index 0 is the empty identifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexedQualifiedIdentifier(u32);

impl IndexedQualifiedIdentifier {
    pub fn index(&self) -> u32 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn identifier(&self) -> QualifiedIdentifier {
        self.shared().map(|value| (*value).clone()).unwrap_or_default()
    }

    fn shared(&self) -> Option<Arc<QualifiedIdentifier>> {
        REPOSITORY.qualified.get(self.0)
    }
}

impl fmt::Display for IndexedQualifiedIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shared() {
            Some(identifier) => write!(f, "{}", identifier),
            None => Ok(()),
        }
    }
}

/// Process-wide repository of interned identifiers.
pub struct IdentifierRepository {
    identifiers: Interner<Identifier>,
    qualified: Interner<QualifiedIdentifier>,
}

static REPOSITORY: Lazy<IdentifierRepository> = Lazy::new(|| IdentifierRepository {
    identifiers: Interner::with_empty(Identifier::default()),
    qualified: Interner::with_empty(QualifiedIdentifier::default()),
});

impl IdentifierRepository {
    pub fn global() -> &'static IdentifierRepository {
        &REPOSITORY
    }

    /// Parse and intern a qualified identifier.
    pub fn intern(&self, text: &str) -> IndexedQualifiedIdentifier {
        QualifiedIdentifier::parse(text).index()
    }

    /// Canonical text of an interned qualified identifier.
    pub fn to_string(&self, handle: IndexedQualifiedIdentifier) -> String {
        handle.to_string()
    }

    pub fn identifier_count(&self) -> usize {
        self.identifiers.len()
    }

    pub fn qualified_identifier_count(&self) -> usize {
        self.qualified.len()
    }
}

// ============================================================================
// Parsing helpers
// ============================================================================

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn strip_keyword_prefix<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(keyword)?;
    match rest.chars().next() {
        Some(c) if c.is_whitespace() => Some(rest.trim_start()),
        _ => None,
    }
}

fn strip_keyword_suffix<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = text.strip_suffix(keyword)?;
    match rest.chars().last() {
        Some(c) if is_identifier_char(c) => None,
        Some(_) => Some(rest),
        None => None,
    }
}

const OPERATOR_KEYWORD: &str = "operator";
const OPERATOR_SYMBOLS: &str = "+-*/%^&|~!=<>,";

fn is_operator_segment(text: &str) -> bool {
    let chars: Vec<char> = text.chars().collect();
    operator_end(&chars, 0).is_some()
}

/// If an operator name starts at `start`, return the index just past it.
fn operator_end(chars: &[char], start: usize) -> Option<usize> {
    let keyword: Vec<char> = OPERATOR_KEYWORD.chars().collect();
    if chars.len() < start + keyword.len() || chars[start..start + keyword.len()] != keyword[..] {
        return None;
    }
    if start > 0 && is_identifier_char(chars[start - 1]) {
        return None;
    }

    let mut i = start + keyword.len();
    if i < chars.len() && is_identifier_char(chars[i]) {
        return None;
    }
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }

    match chars.get(i) {
        Some('(') | Some('[') => {
            let close = if chars[i] == '(' { ')' } else { ']' };
            let offset = chars[i..].iter().position(|&c| c == close)?;
            Some(i + offset + 1)
        }
        Some(c) if OPERATOR_SYMBOLS.contains(*c) => {
            while i < chars.len() && OPERATOR_SYMBOLS.contains(chars[i]) {
                i += 1;
            }
            Some(i)
        }
        _ => None,
    }
}

/// Split `text` on `separator` at bracket depth zero.
///
/// A `':'` separator splits on `::`. Operator names are never split and
/// their symbols do not count as brackets.
fn split_top_level(text: &str, separator: char) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if depth == 0 {
            if let Some(end) = operator_end(&chars, i) {
                current.extend(&chars[i..end]);
                i = end;
                continue;
            }
            if separator == ':' {
                if c == ':' && chars.get(i + 1) == Some(&':') {
                    parts.push(std::mem::take(&mut current));
                    i += 2;
                    continue;
                }
            } else if c == separator {
                parts.push(std::mem::take(&mut current));
                i += 1;
                continue;
            }
        }

        match c {
            '<' | '(' | '[' => depth += 1,
            '>' | ')' | ']' => depth = (depth - 1).max(0),
            _ => {}
        }
        current.push(c);
        i += 1;
    }

    parts.push(current);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_whitespace_tolerant() {
        let id = QualifiedIdentifier::parse(" Area<A,B>::jump <F> ::tes<C>");
        assert_eq!(id.count(), 3);
        assert_eq!(id.at(0).map(|s| s.template_identifiers_count()), Some(2));
        assert_eq!(id.at(1).map(|s| s.template_identifiers_count()), Some(1));
        assert_eq!(id.at(2).map(|s| s.template_identifiers_count()), Some(1));
        assert_eq!(id.to_string(), "Area<A, B>::jump<F>::tes<C>");
        assert_eq!(id.index(), QualifiedIdentifier::parse("Area<A, B>::jump<F>::tes<C>").index());
    }

    #[test]
    fn test_explicitly_global() {
        let global = QualifiedIdentifier::parse("::Area::jump");
        let relative = QualifiedIdentifier::parse("Area::jump");

        assert!(global.explicitly_global());
        assert!(!relative.explicitly_global());
        assert!(global.same_identifiers(&relative));
        assert_ne!(global, relative);
        assert_eq!(global.to_string(), "::Area::jump");

        let bar = QualifiedIdentifier::parse("::bar");
        assert_eq!(bar.count(), 1);
        assert_ne!(bar.index(), QualifiedIdentifier::parse("bar").index());
    }

    #[test]
    fn test_operator_segments() {
        for text in [
            "operator<",
            "operator<=",
            "operator>",
            "operator>=",
            "operator()",
            "operator( )",
            "operator[]",
            "operator<<",
        ] {
            let id = QualifiedIdentifier::parse(text);
            assert_eq!(id.count(), 1, "{}", text);
            assert_eq!(id.to_string(), text);
            assert!(id.at(0).is_some_and(|s| s.is_operator()));
        }

        let member = QualifiedIdentifier::parse("Foo::operator<");
        assert_eq!(member.count(), 2);
        assert_eq!(member.to_string(), "Foo::operator<");

        let plain = QualifiedIdentifier::parse("operatorX");
        assert!(!plain.at(0).is_some_and(|s| s.is_operator()));
    }

    #[test]
    fn test_nested_template_arguments() {
        let id = QualifiedIdentifier::parse("A<B<C, D>, const E*>::f");
        assert_eq!(id.count(), 2);
        let args = id.at(0).map(|s| s.template_identifiers().to_vec()).unwrap_or_default();
        assert_eq!(args.len(), 2);
        assert_eq!(args[0].to_string(), "B<C, D>");
        assert!(args[1].is_const());
        assert_eq!(args[1].pointer_depth(), 1);
        assert_eq!(id.to_string(), "A<B<C, D>, const E*>::f");
    }

    #[test]
    fn test_type_identifier_modifiers() {
        let t = TypeIdentifier::parse("A* const&");
        assert_eq!(t.pointer_depth(), 1);
        assert!(t.is_const_pointer(0));
        assert!(!t.is_const());
        assert!(t.is_reference());
        assert_eq!(t.to_string(), "A* const&");

        let u = TypeIdentifier::parse("A const");
        assert!(u.is_const());
        assert_eq!(u.to_string(), "const A");
    }

    #[test]
    fn test_empty_template_list_is_distinct() {
        let explicit = Identifier::parse("Test<>");
        let plain = Identifier::parse("Test");
        assert!(explicit.has_template_arguments_list());
        assert!(!plain.has_template_arguments_list());
        assert_ne!(explicit, plain);
        assert_eq!(explicit.to_string(), "Test<>");
        assert_eq!(explicit.without_template_arguments(), plain);
    }

    #[test]
    fn test_repository_roundtrip() {
        let repository = IdentifierRepository::global();
        for text in ["a", "a::b", "::a::b<c>", "x::operator( )", "Foo<const Bar*, int>"] {
            let handle = repository.intern(text);
            assert_eq!(repository.to_string(handle), text);
            assert_eq!(repository.intern(text), handle);
        }
    }

    #[test]
    fn test_mid_left_and_add() {
        let id = QualifiedIdentifier::parse("::a::b::c");
        assert_eq!(id.mid(1).to_string(), "b::c");
        assert_eq!(id.left(2).to_string(), "::a::b");
        let joined = &QualifiedIdentifier::parse("a") + &QualifiedIdentifier::parse("b::c");
        assert_eq!(joined.to_string(), "a::b::c");
        assert!(joined.begins_with(&QualifiedIdentifier::parse("a::b")));
    }
}
