//! Parsing environments
//!
//! A document may be parsed several times under different build
//! configurations (macro sets, include paths). Each parse is described by a
//! [`ParsingEnvironmentFile`] attached to its top context, and the
//! [`ParsingEnvironmentManager`] registered for the file's environment type
//! answers "which parse of this document matches environment E".

use crate::error::DUChainError;
use crate::interner::IndexedString;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Opaque tag distinguishing environment kinds.
pub type EnvironmentType = u32;

/// Environment type of [`MacroEnvironment`].
pub const MACRO_ENVIRONMENT: EnvironmentType = 1;

// ============================================================================
// Document identity
// ============================================================================

/// A document URL plus an identity index distinguishing simultaneously
/// tracked parses of the same URL.
///
/// Ordered by URL text, then identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentifiedFile {
    url: IndexedString,
    identity: u32,
}

impl IdentifiedFile {
    pub fn new(url: impl Into<IndexedString>, identity: u32) -> Self {
        Self {
            url: url.into(),
            identity,
        }
    }

    pub fn url(&self) -> IndexedString {
        self.url
    }

    pub fn identity(&self) -> u32 {
        self.identity
    }
}

impl From<&str> for IdentifiedFile {
    fn from(url: &str) -> Self {
        Self::new(url, 0)
    }
}

impl PartialOrd for IdentifiedFile {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IdentifiedFile {
    fn cmp(&self, other: &Self) -> Ordering {
        self.url
            .cmp(&other.url)
            .then(self.identity.cmp(&other.identity))
    }
}

impl fmt::Display for IdentifiedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.identity == 0 {
            write!(f, "{}", self.url)
        } else {
            write!(f, "{}#{}", self.url, self.identity)
        }
    }
}

impl fmt::Debug for IdentifiedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentifiedFile({})", self)
    }
}

// ============================================================================
// Traits
// ============================================================================

/// The configuration a parse is requested under.
pub trait ParsingEnvironment: Send + Sync + fmt::Debug {
    fn environment_type(&self) -> EnvironmentType;

    fn as_any(&self) -> &dyn Any;
}

/// The configuration a finished parse is valid for.
pub trait ParsingEnvironmentFile: Send + Sync + fmt::Debug {
    fn environment_type(&self) -> EnvironmentType;

    /// Document identity of the parse this file describes.
    fn identity(&self) -> IdentifiedFile;

    /// Whether the parse can be reused under `environment`.
    fn matches(&self, environment: &dyn ParsingEnvironment) -> bool;

    /// Higher is a better match; only consulted when `matches` holds.
    fn match_score(&self, _environment: &dyn ParsingEnvironment) -> u32 {
        0
    }

    fn as_any(&self) -> &dyn Any;
}

/// Indexes the environment files of one environment type.
pub trait ParsingEnvironmentManager: Send + Sync + fmt::Debug {
    fn environment_type(&self) -> EnvironmentType;

    /// Register a file. Registering the same identity twice is refused.
    fn add_file(&mut self, file: Arc<dyn ParsingEnvironmentFile>) -> Result<(), DUChainError>;

    fn remove_file(
        &mut self,
        identity: &IdentifiedFile,
    ) -> Option<Arc<dyn ParsingEnvironmentFile>>;

    /// Identity of the best matching parse of `url`, if any.
    fn find(
        &self,
        url: IndexedString,
        environment: &dyn ParsingEnvironment,
    ) -> Option<IdentifiedFile>;

    fn file_count(&self) -> usize;

    fn clear(&mut self);
}

// ============================================================================
// Standard manager
// ============================================================================

/// A manager keyed by document identity, choosing the highest
/// [`ParsingEnvironmentFile::match_score`] among matching files.
///
/// Ties go to the lowest identity so the answer is deterministic.
#[derive(Debug)]
pub struct StandardEnvironmentManager {
    environment_type: EnvironmentType,
    files: BTreeMap<IdentifiedFile, Arc<dyn ParsingEnvironmentFile>>,
}

impl StandardEnvironmentManager {
    pub fn new(environment_type: EnvironmentType) -> Self {
        Self {
            environment_type,
            files: BTreeMap::new(),
        }
    }

    pub fn file(&self, identity: &IdentifiedFile) -> Option<Arc<dyn ParsingEnvironmentFile>> {
        self.files.get(identity).cloned()
    }
}

impl ParsingEnvironmentManager for StandardEnvironmentManager {
    fn environment_type(&self) -> EnvironmentType {
        self.environment_type
    }

    fn add_file(&mut self, file: Arc<dyn ParsingEnvironmentFile>) -> Result<(), DUChainError> {
        let identity = file.identity();
        if self.files.contains_key(&identity) {
            return Err(DUChainError::DuplicateEnvironmentFile(identity.to_string()));
        }
        self.files.insert(identity, file);
        Ok(())
    }

    fn remove_file(
        &mut self,
        identity: &IdentifiedFile,
    ) -> Option<Arc<dyn ParsingEnvironmentFile>> {
        self.files.remove(identity)
    }

    fn find(
        &self,
        url: IndexedString,
        environment: &dyn ParsingEnvironment,
    ) -> Option<IdentifiedFile> {
        let start = IdentifiedFile::new(url, 0);
        let mut best: Option<(u32, IdentifiedFile)> = None;
        for (identity, file) in self.files.range(start..) {
            if identity.url() != url {
                break;
            }
            if !file.matches(environment) {
                continue;
            }
            let score = file.match_score(environment);
            if best.map_or(true, |(best_score, _)| score > best_score) {
                best = Some((score, *identity));
            }
        }
        best.map(|(_, identity)| identity)
    }

    fn file_count(&self) -> usize {
        self.files.len()
    }

    fn clear(&mut self) {
        self.files.clear();
    }
}

// ============================================================================
// Macro environments
// ============================================================================

/// A preprocessor state: the set of defined macros and their values.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroEnvironment {
    pub macros: BTreeMap<String, String>,
}

impl MacroEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.macros.insert(name.into(), value.into());
        self
    }
}

impl ParsingEnvironment for MacroEnvironment {
    fn environment_type(&self) -> EnvironmentType {
        MACRO_ENVIRONMENT
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Records which macros a parse depended on.
///
/// `None` means the parse required the macro to be undefined.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroEnvironmentFile {
    url: String,
    identity: u32,
    pub used_macros: BTreeMap<String, Option<String>>,
}

impl MacroEnvironmentFile {
    pub fn new(identity: IdentifiedFile) -> Self {
        Self {
            url: identity.url().to_string(),
            identity: identity.identity(),
            used_macros: BTreeMap::new(),
        }
    }

    pub fn with_macro(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        self.used_macros.insert(name.into(), value);
        self
    }

    pub fn used_macro_names(&self) -> BTreeSet<&str> {
        self.used_macros.keys().map(String::as_str).collect()
    }
}

impl ParsingEnvironmentFile for MacroEnvironmentFile {
    fn environment_type(&self) -> EnvironmentType {
        MACRO_ENVIRONMENT
    }

    fn identity(&self) -> IdentifiedFile {
        IdentifiedFile::new(self.url.as_str(), self.identity)
    }

    fn matches(&self, environment: &dyn ParsingEnvironment) -> bool {
        let Some(environment) = environment.as_any().downcast_ref::<MacroEnvironment>() else {
            return false;
        };
        self.used_macros
            .iter()
            .all(|(name, value)| environment.macros.get(name) == value.as_ref())
    }

    fn match_score(&self, _environment: &dyn ParsingEnvironment) -> u32 {
        self.used_macros.len() as u32
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identified_file_ordering() {
        let a0 = IdentifiedFile::new("a.cpp", 0);
        let a1 = IdentifiedFile::new("a.cpp", 1);
        let b0 = IdentifiedFile::new("b.cpp", 0);

        // Intern in reverse order to show ordering follows the text.
        let _ = IndexedString::new("zz.cpp");
        let z = IdentifiedFile::new("zz.cpp", 0);

        let mut files = vec![z, b0, a1, a0];
        files.sort();
        assert_eq!(files, vec![a0, a1, b0, z]);
        assert_eq!(a1.to_string(), "a.cpp#1");
    }

    #[test]
    fn test_macro_file_matching() {
        let identity = IdentifiedFile::new("m.h", 0);
        let file = MacroEnvironmentFile::new(identity)
            .with_macro("DEBUG", Some("1".to_string()))
            .with_macro("NDEBUG", None);

        let debug = MacroEnvironment::new().define("DEBUG", "1");
        let release = MacroEnvironment::new().define("NDEBUG", "");

        assert!(file.matches(&debug));
        assert!(!file.matches(&release));
        assert_eq!(file.match_score(&debug), 2);
        assert_eq!(file.identity(), identity);
    }

    #[test]
    fn test_standard_manager_refuses_duplicates_and_scores() {
        let mut manager = StandardEnvironmentManager::new(MACRO_ENVIRONMENT);
        let loose = IdentifiedFile::new("x.h", 0);
        let strict = IdentifiedFile::new("x.h", 1);

        manager
            .add_file(Arc::new(MacroEnvironmentFile::new(loose)))
            .unwrap();
        manager
            .add_file(Arc::new(
                MacroEnvironmentFile::new(strict).with_macro("A", Some("1".into())),
            ))
            .unwrap();
        assert!(manager
            .add_file(Arc::new(MacroEnvironmentFile::new(loose)))
            .is_err());

        let with_a = MacroEnvironment::new().define("A", "1");
        let without_a = MacroEnvironment::new();
        assert_eq!(manager.find(loose.url(), &with_a), Some(strict));
        assert_eq!(manager.find(loose.url(), &without_a), Some(loose));
        assert_eq!(manager.find(IndexedString::new("y.h"), &with_a), None);

        assert!(manager.remove_file(&strict).is_some());
        assert_eq!(manager.find(loose.url(), &with_a), Some(loose));
        assert_eq!(manager.file_count(), 1);
    }
}
