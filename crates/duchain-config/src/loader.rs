//! Layered configuration loading
//!
//! Layers, lowest precedence first:
//! 1. built-in defaults
//! 2. `~/.duchain/config.toml`
//! 3. `<workspace>/.duchain/config.toml`
//! 4. CLI overrides
//!
//! Files are merged as TOML tables before they are deserialized: a key set by
//! a later file wins even when it spells out the default value, and keys a
//! file leaves out are inherited from the layers below.

use crate::error::{ConfigError, FileOp};
use crate::{ConfigOverrides, DuchainConfig};
use std::path::{Path, PathBuf};
use toml::{Table, Value};
use tracing::{debug, trace};

const CONFIG_FILE_NAME: &str = "config.toml";

/// Directory holding `config.toml`, under the home directory and in a
/// workspace alike.
pub const CONFIG_DIR: &str = ".duchain";

/// Where a configuration layer came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Global(PathBuf),
    Local(PathBuf),
    File(PathBuf),
}

impl ConfigSource {
    pub fn path(&self) -> &Path {
        match self {
            Self::Global(path) | Self::Local(path) | Self::File(path) => path,
        }
    }
}

/// Loads and writes configuration files. The global layer is read once per
/// loader.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    global_dir: Option<PathBuf>,
    global_layer: Option<Table>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Loader using `~/.duchain` for the global layer (none without a home
    /// directory).
    pub fn new() -> Self {
        Self {
            global_dir: dirs::home_dir().map(|home| home.join(CONFIG_DIR)),
            global_layer: None,
        }
    }

    pub fn with_global_dir(global_dir: impl Into<PathBuf>) -> Self {
        Self {
            global_dir: Some(global_dir.into()),
            global_layer: None,
        }
    }

    pub fn global_config_path(&self) -> Option<PathBuf> {
        self.global_dir
            .as_ref()
            .map(|dir| dir.join(CONFIG_FILE_NAME))
    }

    pub fn local_config_path(&self, workspace_root: &Path) -> PathBuf {
        workspace_root.join(CONFIG_DIR).join(CONFIG_FILE_NAME)
    }

    /// The files that would contribute to `load(workspace_root, ..)`, lowest
    /// precedence first.
    pub fn sources(&self, workspace_root: &Path) -> Vec<ConfigSource> {
        let mut sources = Vec::new();
        if let Some(global) = self.global_config_path().filter(|path| path.is_file()) {
            sources.push(ConfigSource::Global(global));
        }
        let local = self.local_config_path(workspace_root);
        if local.is_file() {
            sources.push(ConfigSource::Local(local));
        }
        sources
    }

    /// Merge global → local → overrides for a workspace and validate the
    /// result.
    pub fn load(
        &mut self,
        workspace_root: &Path,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<DuchainConfig, ConfigError> {
        let mut merged = self.global_layer()?.unwrap_or_default();
        let local_path = self.local_config_path(workspace_root);
        if local_path.is_file() {
            debug!("Loading workspace config from {}", local_path.display());
            merge_tables(&mut merged, read_layer(&local_path)?);
        } else {
            trace!("No workspace config at {}", local_path.display());
        }
        finish(merged, overrides)
    }

    /// Load `path` as the only file layer, skipping the global and workspace
    /// files.
    pub fn load_file(
        &self,
        path: &Path,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<DuchainConfig, ConfigError> {
        debug!("Loading config from {}", path.display());
        finish(read_layer(path)?, overrides)
    }

    /// The global configuration on its own, if the file exists.
    pub fn load_global(&mut self) -> Result<Option<DuchainConfig>, ConfigError> {
        match self.global_layer()? {
            Some(layer) => into_config(layer).map(Some),
            None => Ok(None),
        }
    }

    fn global_layer(&mut self) -> Result<Option<Table>, ConfigError> {
        if let Some(ref layer) = self.global_layer {
            return Ok(Some(layer.clone()));
        }
        let Some(path) = self.global_config_path() else {
            debug!("No home directory, skipping global config");
            return Ok(None);
        };
        if !path.is_file() {
            trace!("No global config at {}", path.display());
            return Ok(None);
        }

        debug!("Loading global config from {}", path.display());
        let layer = read_layer(&path)?;
        self.global_layer = Some(layer.clone());
        Ok(Some(layer))
    }

    /// Forget the cached global layer.
    pub fn clear_cache(&mut self) {
        self.global_layer = None;
    }

    pub fn save_global(&self, config: &DuchainConfig) -> Result<PathBuf, ConfigError> {
        let path = self.global_config_path().ok_or(ConfigError::NoHomeDir)?;
        write_config(&path, config)?;
        Ok(path)
    }

    pub fn save_local(
        &self,
        workspace_root: &Path,
        config: &DuchainConfig,
    ) -> Result<PathBuf, ConfigError> {
        let path = self.local_config_path(workspace_root);
        write_config(&path, config)?;
        Ok(path)
    }

    /// Write the default configuration to the global file unless it already
    /// exists.
    pub fn init_global(&self) -> Result<PathBuf, ConfigError> {
        let path = self.global_config_path().ok_or(ConfigError::NoHomeDir)?;
        init_file(path)
    }

    /// Write the default configuration to the workspace file unless it
    /// already exists.
    pub fn init_local(&self, workspace_root: &Path) -> Result<PathBuf, ConfigError> {
        init_file(self.local_config_path(workspace_root))
    }
}

/// Read one file layer. The layer must deserialize on its own so errors name
/// the file that caused them.
fn read_layer(path: &Path) -> Result<Table, ConfigError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| ConfigError::file(FileOp::Read, path, e))?;
    let layer: Table = content
        .parse()
        .map_err(|e| ConfigError::parse(path, e))?;
    Value::Table(layer.clone())
        .try_into::<DuchainConfig>()
        .map_err(|e| ConfigError::parse(path, e))?;
    Ok(layer)
}

/// Merge `overlay` into `base`. Tables merge key by key; any other value in
/// `overlay` replaces the one in `base`.
fn merge_tables(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        if let Value::Table(section) = value {
            if let Some(Value::Table(existing)) = base.get_mut(&key) {
                merge_tables(existing, section);
                continue;
            }
            base.insert(key, Value::Table(section));
        } else {
            base.insert(key, value);
        }
    }
}

fn into_config(layer: Table) -> Result<DuchainConfig, ConfigError> {
    Value::Table(layer)
        .try_into()
        .map_err(ConfigError::Layers)
}

fn finish(
    merged: Table,
    overrides: Option<&ConfigOverrides>,
) -> Result<DuchainConfig, ConfigError> {
    let mut config = into_config(merged)?;
    if let Some(overrides) = overrides {
        config.apply_overrides(overrides);
    }
    config.validate()?;
    Ok(config)
}

fn write_config(path: &Path, config: &DuchainConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::file(FileOp::CreateDir, dir, e))?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::file(FileOp::Write, path, e))
}

fn init_file(path: PathBuf) -> Result<PathBuf, ConfigError> {
    if path.exists() {
        debug!("Keeping existing config at {}", path.display());
    } else {
        write_config(&path, &DuchainConfig::default())?;
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LogFormat, LogLevel, Visibility};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write_local(workspace: &Path, content: &str) -> PathBuf {
        let dir = workspace.join(CONFIG_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(CONFIG_FILE_NAME);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn write_global(global_dir: &Path, content: &str) -> PathBuf {
        std::fs::create_dir_all(global_dir).unwrap();
        let path = global_dir.join(CONFIG_FILE_NAME);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_no_files_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let mut loader = ConfigLoader::with_global_dir(temp.path().join("global"));

        assert_eq!(loader.load(temp.path(), None).unwrap(), DuchainConfig::default());
        assert!(loader.sources(temp.path()).is_empty());
    }

    #[test]
    fn test_workspace_layer_over_global_layer() {
        let temp = TempDir::new().unwrap();
        let global_dir = temp.path().join("global");
        let global = write_global(
            &global_dir,
            r#"
            [logging]
            level = "debug"
            format = "json"

            [replay]
            parallel = false

            [sets]
            prune_interval = 100
            "#,
        );
        let local = write_local(
            temp.path(),
            r#"
            [sets]
            prune_interval = 10

            [logging]
            level = "warn"
            "#,
        );

        let mut loader = ConfigLoader::with_global_dir(&global_dir);
        let config = loader.load(temp.path(), None).unwrap();

        assert_eq!(config.sets.prune_interval, 10);
        assert_eq!(config.logging.level, LogLevel::Warn);
        // Keys the workspace file leaves out are inherited
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(!config.replay.parallel);

        assert_eq!(
            loader.sources(temp.path()),
            vec![ConfigSource::Global(global), ConfigSource::Local(local)]
        );
    }

    #[test]
    fn test_explicit_default_overrides_global() {
        let temp = TempDir::new().unwrap();
        let global_dir = temp.path().join("global");
        write_global(&global_dir, "[chain]\nvisibility = \"declared-before-use\"\n");
        write_local(temp.path(), "[chain]\nvisibility = \"class-members-visible\"\n");

        let mut loader = ConfigLoader::with_global_dir(&global_dir);
        let config = loader.load(temp.path(), None).unwrap();
        assert_eq!(config.chain.visibility, Visibility::ClassMembersVisible);
    }

    #[test]
    fn test_cli_overrides_win() {
        let temp = TempDir::new().unwrap();
        write_local(temp.path(), "[chain]\nvisibility = \"declared-before-use\"\n");

        let mut loader = ConfigLoader::with_global_dir(temp.path().join("global"));
        let overrides = ConfigOverrides {
            visibility: Some(Visibility::ClassMembersVisible),
            log_level: Some(LogLevel::Trace),
            ..Default::default()
        };

        let config = loader.load(temp.path(), Some(&overrides)).unwrap();
        assert_eq!(config.chain.visibility, Visibility::ClassMembersVisible);
        assert_eq!(config.logging.level, LogLevel::Trace);
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let temp = TempDir::new().unwrap();
        write_local(temp.path(), "[observers]\ncapacity = 0\n");

        let mut loader = ConfigLoader::with_global_dir(temp.path().join("global"));
        let err = loader.load(temp.path(), None).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "observers.capacity"));
    }

    #[test]
    fn test_bad_layer_names_its_file() {
        let temp = TempDir::new().unwrap();
        let global_dir = temp.path().join("global");
        write_global(&global_dir, "[observers]\ncapacity = 8\n");

        // Syntax error
        let path = write_local(temp.path(), "[chain\nvisibility =");
        let mut loader = ConfigLoader::with_global_dir(&global_dir);
        let err = loader.load(temp.path(), None).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(err.path(), Some(path.as_path()));

        // Wrong type
        write_local(temp.path(), "[observers]\ncapacity = \"many\"\n");
        let err = loader.load(temp.path(), None).unwrap_err();
        assert_eq!(err.path(), Some(path.as_path()));

        // Misspelt key
        write_local(temp.path(), "[chain]\nimport_cache_capcity = 1\n");
        let err = loader.load(temp.path(), None).unwrap_err();
        assert!(err.to_string().contains("import_cache_capcity"));
    }

    #[test]
    fn test_load_file_skips_global_and_local() {
        let temp = TempDir::new().unwrap();
        let global_dir = temp.path().join("global");
        write_global(&global_dir, "[logging]\nlevel = \"debug\"\n");
        write_local(temp.path(), "[observers]\ncapacity = 5\n");

        let path = temp.path().join("custom.toml");
        std::fs::write(&path, "[replay]\nregister = false\n").unwrap();

        let loader = ConfigLoader::with_global_dir(&global_dir);
        let config = loader.load_file(&path, None).unwrap();
        assert!(!config.replay.register);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.observers.capacity, 1024);
    }

    #[test]
    fn test_saved_config_loads_back() {
        let temp = TempDir::new().unwrap();
        let loader = ConfigLoader::with_global_dir(temp.path().join("global"));

        let mut config = DuchainConfig::default();
        config.replay.register = false;
        config.chain.visibility = Visibility::DeclaredBeforeUse;
        config.logging.file = Some(temp.path().join("duchain.log"));
        let path = loader.save_local(temp.path(), &config).unwrap();
        assert_eq!(path, loader.local_config_path(temp.path()));

        let mut loader = ConfigLoader::with_global_dir(temp.path().join("global"));
        assert_eq!(loader.load(temp.path(), None).unwrap(), config);
    }

    #[test]
    fn test_init_writes_defaults_once() {
        let temp = TempDir::new().unwrap();
        let loader = ConfigLoader::with_global_dir(temp.path().join("global"));

        let local = loader.init_local(temp.path()).unwrap();
        assert!(local.ends_with(".duchain/config.toml"));
        let parsed: DuchainConfig =
            toml::from_str(&std::fs::read_to_string(&local).unwrap()).unwrap();
        assert_eq!(parsed, DuchainConfig::default());

        std::fs::write(&local, "[observers]\ncapacity = 3\n").unwrap();
        assert_eq!(loader.init_local(temp.path()).unwrap(), local);
        assert_eq!(
            std::fs::read_to_string(&local).unwrap(),
            "[observers]\ncapacity = 3\n"
        );

        let global = loader.init_global().unwrap();
        assert_eq!(global, temp.path().join("global").join(CONFIG_FILE_NAME));
        assert!(global.exists());
    }

    #[test]
    fn test_global_layer_is_cached() {
        let temp = TempDir::new().unwrap();
        let global_dir = temp.path().join("global");
        let path = write_global(&global_dir, "[logging]\nlevel = \"debug\"\n");

        let mut loader = ConfigLoader::with_global_dir(&global_dir);
        assert_eq!(loader.load_global().unwrap().unwrap().logging.level, LogLevel::Debug);

        std::fs::write(&path, "[logging]\nlevel = \"error\"\n").unwrap();
        assert_eq!(loader.load_global().unwrap().unwrap().logging.level, LogLevel::Debug);

        loader.clear_cache();
        assert_eq!(loader.load_global().unwrap().unwrap().logging.level, LogLevel::Error);
    }

    #[test]
    fn test_merge_replaces_scalars_and_merges_tables() {
        let mut base: Table = "a = 1\n[s]\nx = 1\ny = 2\n".parse().unwrap();
        let overlay: Table = "a = 2\n[s]\ny = 3\n[t]\nz = 4\n".parse().unwrap();
        merge_tables(&mut base, overlay);

        let expected: Table = "a = 2\n[s]\nx = 1\ny = 3\n[t]\nz = 4\n".parse().unwrap();
        assert_eq!(base, expected);
    }
}
