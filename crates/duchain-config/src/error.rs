//! Configuration errors.

use std::path::PathBuf;
use thiserror::Error;

/// File operations that can fail while loading or writing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Read,
    Write,
    CreateDir,
}

impl std::fmt::Display for FileOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            FileOp::Read => "read",
            FileOp::Write => "write",
            FileOp::CreateDir => "create directory",
        })
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot {op} '{path}': {source}")]
    File {
        op: FileOp,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A config file is not valid TOML, or does not describe a `DuchainConfig`
    #[error("invalid config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The merged layers do not describe a `DuchainConfig`
    #[error("invalid merged configuration: {0}")]
    Layers(#[source] toml::de::Error),

    #[error("cannot render configuration as TOML: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("no home directory for the global config (use --config instead)")]
    NoHomeDir,

    #[error("{key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl ConfigError {
    pub fn file(op: FileOp, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::File {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, source: toml::de::Error) -> Self {
        Self::Parse {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_value(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Config file this error is about, if any.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::File { path, .. } | Self::Parse { path, .. } => Some(path),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_value_names_key() {
        let err = ConfigError::invalid_value("observers.capacity", "must be at least 1");
        assert_eq!(err.to_string(), "observers.capacity: must be at least 1");
        assert!(err.path().is_none());
    }

    #[test]
    fn test_file_error_names_operation_and_path() {
        let err = ConfigError::file(
            FileOp::CreateDir,
            "/tmp/ws/.duchain",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err
            .to_string()
            .starts_with("cannot create directory '/tmp/ws/.duchain'"));
        assert_eq!(err.path(), Some(std::path::Path::new("/tmp/ws/.duchain")));
    }
}
