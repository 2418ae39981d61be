//! DUChain configuration
//!
//! One TOML document configures both the engine (`[chain]`, `[observers]`,
//! `[sets]`) and the `duchain` front-end (`[replay]`, `[logging]`). Every key
//! is optional; unknown keys are rejected so a misspelt setting does not go
//! unnoticed.
//!
//! ```toml
//! [chain]
//! visibility = "declared-before-use"   # or "class-members-visible"
//! import_cache_capacity = 4096
//!
//! [observers]
//! capacity = 1024
//!
//! [sets]
//! prune_interval = 4096                # 0 = never prune
//!
//! [replay]
//! parallel = true
//! register = true
//!
//! [logging]
//! level = "info"
//! format = "text"                      # or "json"
//! # file = "/tmp/duchain.log"
//! ```
//!
//! See [`ConfigLoader`] for how the global, workspace and command-line
//! layers combine.

mod error;
mod loader;

pub use error::{ConfigError, FileOp};
pub use loader::{ConfigLoader, ConfigSource, CONFIG_DIR};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DuchainConfig {
    pub chain: ChainConfig,
    pub observers: ObserverConfig,
    pub sets: SetConfig,
    pub replay: ReplayConfig,
    pub logging: LoggingConfig,
}

/// Name lookup and import bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ChainConfig {
    pub visibility: Visibility,

    /// Import closures kept in the LRU cache
    pub import_cache_capacity: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            visibility: Visibility::default(),
            import_cache_capacity: 4096,
        }
    }
}

/// Which declarations a lookup at a source position may see.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    /// Only declarations that start before the position
    DeclaredBeforeUse,
    /// Like `DeclaredBeforeUse`, except that class members are visible
    /// anywhere inside their class
    #[default]
    ClassMembersVisible,
}

impl Visibility {
    pub const VALUES: [&'static str; 2] = ["declared-before-use", "class-members-visible"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeclaredBeforeUse => Self::VALUES[0],
            Self::ClassMembersVisible => Self::VALUES[1],
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "declared-before-use" => Ok(Self::DeclaredBeforeUse),
            "class-members-visible" => Ok(Self::ClassMembersVisible),
            _ => Err(ConfigError::invalid_value(
                "chain.visibility",
                format!("'{}' is not one of {}", s, Self::VALUES.join(", ")),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ObserverConfig {
    /// Events buffered per observer; further events are dropped until it
    /// catches up
    pub capacity: usize,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SetConfig {
    /// Node creations between sweeps of unreferenced set nodes (0 = never)
    pub prune_interval: u64,
}

impl Default for SetConfig {
    fn default() -> Self {
        Self {
            prune_interval: 4096,
        }
    }
}

/// How `duchain` replays event streams.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ReplayConfig {
    /// Replay the documents of one dependency wave on the rayon pool
    pub parallel: bool,

    /// Register replayed documents so other threads can find them
    pub register: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            register: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,

    /// Append logs to this file instead of stderr
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(ConfigError::invalid_value(
                "logging.level",
                format!("'{}' is not one of trace, debug, info, warn, error", s),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Values taken from the command line, applied over every file layer.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub workspace_root: Option<PathBuf>,
    pub visibility: Option<Visibility>,
    pub parallel: Option<bool>,
    pub observer_capacity: Option<usize>,
    pub log_level: Option<LogLevel>,
}

impl DuchainConfig {
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(visibility) = overrides.visibility {
            self.chain.visibility = visibility;
        }
        if let Some(parallel) = overrides.parallel {
            self.replay.parallel = parallel;
        }
        if let Some(capacity) = overrides.observer_capacity {
            self.observers.capacity = capacity;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
    }

    /// Reject values the engine cannot run with. Anything serde accepts
    /// besides these is valid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capacities = [
            ("chain.import_cache_capacity", self.chain.import_cache_capacity),
            ("observers.capacity", self.observers.capacity),
        ];
        for (key, capacity) in capacities {
            if capacity == 0 {
                return Err(ConfigError::invalid_value(key, "must be at least 1"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = DuchainConfig::default();
        assert_eq!(config.chain.visibility, Visibility::ClassMembersVisible);
        assert_eq!(config.chain.import_cache_capacity, 4096);
        assert_eq!(config.observers.capacity, 1024);
        assert_eq!(config.sets.prune_interval, 4096);
        assert!(config.replay.parallel && config.replay.register);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides_touch_only_given_values() {
        let mut config = DuchainConfig::default();
        config.apply_overrides(&ConfigOverrides {
            visibility: Some(Visibility::DeclaredBeforeUse),
            parallel: Some(false),
            log_level: Some(LogLevel::Debug),
            ..Default::default()
        });

        assert_eq!(config.chain.visibility, Visibility::DeclaredBeforeUse);
        assert!(!config.replay.parallel);
        assert!(config.replay.register);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.observers.capacity, 1024);
    }

    #[test]
    fn test_visibility_spellings() {
        for value in Visibility::VALUES {
            assert_eq!(value.parse::<Visibility>().unwrap().to_string(), value);
        }
        assert_eq!(
            "CLASS_MEMBERS_VISIBLE".parse::<Visibility>().unwrap(),
            Visibility::ClassMembersVisible
        );
        let err = "everything".parse::<Visibility>().unwrap_err();
        assert!(err.to_string().starts_with("chain.visibility:"));
    }

    #[test]
    fn test_log_level_spellings() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::Trace.to_string(), "trace");
        assert!("loud".parse::<LogLevel>().is_err());
        assert!(LogLevel::Debug < LogLevel::Error);
    }

    #[test]
    fn test_zero_capacities_are_invalid() {
        let mut config = DuchainConfig::default();
        config.observers.capacity = 0;
        assert!(config.validate().unwrap_err().to_string().contains("observers.capacity"));

        let mut config = DuchainConfig::default();
        config.chain.import_cache_capacity = 0;
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("chain.import_cache_capacity"));
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config: DuchainConfig = toml::from_str(
            r#"
            [chain]
            visibility = "declared-before-use"

            [replay]
            register = false

            [logging]
            level = "warn"
            "#,
        )
        .unwrap();

        assert_eq!(config.chain.visibility, Visibility::DeclaredBeforeUse);
        assert_eq!(config.chain.import_cache_capacity, 4096);
        assert!(config.replay.parallel);
        assert!(!config.replay.register);
        assert_eq!(config.logging.level, LogLevel::Warn);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(toml::from_str::<DuchainConfig>("[sets]\nprune = 1\n").is_err());
        assert!(toml::from_str::<DuchainConfig>("[cache]\nsize = 1\n").is_err());
        assert!(toml::from_str::<DuchainConfig>("[logging]\nlevel = \"loud\"\n").is_err());
    }
}
