//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::storage;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage folder configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Index passphrase. Prefer `PHOTOVAULT_KEY` over writing it to disk.
    pub key: Option<String>,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("photovault").to_string_lossy().to_string())
        .unwrap_or_else(|| "./photovault_data".to_string())
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            key: None,
        }
    }
}

/// Cache sizing
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_decoded_capacity")]
    pub decoded_capacity: usize,

    #[serde(default = "default_origin_capacity")]
    pub origin_capacity: usize,
}

fn default_decoded_capacity() -> usize {
    256
}

fn default_origin_capacity() -> usize {
    32
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            decoded_capacity: default_decoded_capacity(),
            origin_capacity: default_origin_capacity(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })
    }

    fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// First config file present in the default locations
    pub fn find_default_path() -> Option<PathBuf> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("photovault").join("config.toml")),
            Some(PathBuf::from("./photovault.toml")),
        ];

        first_existing(config_paths.into_iter().flatten())
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        if let Some(path) = Self::find_default_path() {
            match Self::load_with_env(&path) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    return config;
                }
                Err(e) => {
                    tracing::warn!("Failed to load config from {:?}: {}", path, e);
                }
            }
        }

        // Fall back to environment-only config
        tracing::debug!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Storage overrides
        if let Some(data_dir) = var("PHOTOVAULT_DATA_DIR") {
            self.storage.data_dir = data_dir;
        }
        if let Some(key) = var("PHOTOVAULT_KEY") {
            self.storage.key = Some(key);
        }

        // Cache overrides
        if let Some(capacity) = var("PHOTOVAULT_DECODED_CACHE") {
            match capacity.parse() {
                Ok(c) => self.cache.decoded_capacity = c,
                Err(_) => tracing::warn!("Ignoring PHOTOVAULT_DECODED_CACHE={:?}", capacity),
            }
        }
        if let Some(capacity) = var("PHOTOVAULT_ORIGIN_CACHE") {
            match capacity.parse() {
                Ok(c) => self.cache.origin_capacity = c,
                Err(_) => tracing::warn!("Ignoring PHOTOVAULT_ORIGIN_CACHE={:?}", capacity),
            }
        }

        // Logging overrides
        if let Some(level) = var("PHOTOVAULT_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("PHOTOVAULT_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Engine configuration for these settings
    ///
    /// A leading `~` in `data_dir` expands to the home directory.
    pub fn engine_config(&self) -> storage::StorageConfig {
        storage::StorageConfig::new(expand_home(&self.storage.data_dir))
            .decoded_cache_capacity(self.cache.decoded_capacity)
            .origin_cache_capacity(self.cache.origin_capacity)
    }
}

fn first_existing(candidates: impl IntoIterator<Item = PathBuf>) -> Option<PathBuf> {
    candidates.into_iter().find(|path| path.exists())
}

fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some("") => "",
        Some(rest) if rest.starts_with('/') || rest.starts_with('\\') => &rest[1..],
        _ => return PathBuf::from(path),
    };

    match dirs::home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => PathBuf::from(path),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Photovault Configuration
#
# Environment variables override these settings:
# - PHOTOVAULT_DATA_DIR
# - PHOTOVAULT_KEY
# - PHOTOVAULT_DECODED_CACHE
# - PHOTOVAULT_ORIGIN_CACHE
# - PHOTOVAULT_LOG_LEVEL
# - PHOTOVAULT_LOG_FORMAT

[storage]
# Folder holding data.db and the block segment files
# (default: the platform data directory, e.g. ~/.local/share/photovault)
# data_dir = "/path/to/photovault"

# Index passphrase (better supplied through PHOTOVAULT_KEY)
# key = ""

[cache]
# Rendered representations kept in memory
decoded_capacity = 256

# Raw payloads kept in memory
origin_capacity = 32

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = Config::parse(
            r#"
            [storage]
            data_dir = "/photos"

            [cache]
            origin_capacity = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.data_dir, "/photos");
        assert!(config.storage.key.is_none());
        assert_eq!(config.cache.decoded_capacity, 256);
        assert_eq!(config.cache.origin_capacity, 4);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_generated_config_parses() {
        let config = Config::parse(&generate_default_config()).unwrap();
        assert_eq!(config.storage.data_dir, default_data_dir());
        assert!(!config.engine_config().data_dir.starts_with("~"));
        assert_eq!(config.cache.decoded_capacity, 256);
        assert_eq!(config.cache.origin_capacity, 32);
    }

    #[test]
    fn test_engine_config_expands_home() {
        let mut config = Config::default();
        config.storage.data_dir = "~/.local/share/photovault".to_string();
        let data_dir = config.engine_config().data_dir;

        match dirs::home_dir() {
            Some(home) => assert_eq!(data_dir, home.join(".local/share/photovault")),
            None => assert_eq!(data_dir, PathBuf::from("~/.local/share/photovault")),
        }

        assert_eq!(expand_home("~other/x"), PathBuf::from("~other/x"));
        assert_eq!(expand_home("./rel"), PathBuf::from("./rel"));
    }

    #[test]
    fn test_load_errors() {
        let dir = tempdir().unwrap();

        let missing = Config::load(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));

        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[cache]\ndecoded_capacity = \"lots\"").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_discovered_broken_file_is_an_error() {
        let dir = tempdir().unwrap();
        let broken = dir.path().join("photovault.toml");
        std::fs::write(&broken, "[storage\n").unwrap();

        let found = first_existing([dir.path().join("missing.toml"), broken.clone()]);
        assert_eq!(found.as_deref(), Some(broken.as_path()));

        let result = Config::load_with_env(&broken);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
        assert!(first_existing([dir.path().join("missing.toml")]).is_none());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PHOTOVAULT_DATA_DIR", "/tmp/vault"),
            ("PHOTOVAULT_KEY", "hunter2"),
            ("PHOTOVAULT_DECODED_CACHE", "8"),
            ("PHOTOVAULT_ORIGIN_CACHE", "many"),
            ("PHOTOVAULT_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.storage.data_dir, "/tmp/vault");
        assert_eq!(config.storage.key.as_deref(), Some("hunter2"));
        assert_eq!(config.cache.decoded_capacity, 8);
        // unparseable values leave the default alone
        assert_eq!(config.cache.origin_capacity, 32);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_engine_config() {
        let mut config = Config::default();
        config.storage.data_dir = "/photos".to_string();
        config.cache.decoded_capacity = 10;
        config.cache.origin_capacity = 2;

        let engine = config.engine_config();
        assert_eq!(engine.data_dir, PathBuf::from("/photos"));
        assert_eq!(engine.decoded_cache_capacity, 10);
        assert_eq!(engine.origin_cache_capacity, 2);
    }
}
