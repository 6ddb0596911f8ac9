//! # vault-config
//!
//! Configuration management for the vault.
//!
//! Loads configuration from:
//! 1. `~/.vault/config.toml` (global)
//! 2. `.vault/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod testing;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard};
use tracing::debug;

pub use logging::{init_logging, Component, LogLevel};

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> =
    Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get global config (read-only)
pub fn config() -> RwLockReadGuard<'static, Config> {
    // A poisoned lock still holds a fully-formed Config
    CONFIG.read().unwrap_or_else(|e| e.into_inner())
}

/// Reload config from disk and environment
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    new_config.validate()?;
    *CONFIG.write().unwrap_or_else(|e| e.into_inner()) = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Environment variables consulted by [`Config::load`]
pub mod env {
    pub const CHUNK_ROOT: &str = "VAULT_CHUNK_ROOT";
    pub const MANIFEST_DIR: &str = "VAULT_MANIFEST_DIR";
    pub const CHUNK_SIZE: &str = "VAULT_CHUNK_SIZE";
    pub const THREADS: &str = "VAULT_THREADS";
    pub const SIGNING_KEY: &str = "VAULT_SIGNING_KEY";
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub chunking: ChunkingConfig,
    pub signing: SigningConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let global = Self::global_config_path();
        let mut config = Self::load_from(global.as_deref(), Path::new(".vault/config.toml"))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load and merge the given global and project files, skipping any that
    /// do not exist. Environment overrides are not applied.
    pub fn load_from(global: Option<&Path>, project: &Path) -> Result<Self, ConfigError> {
        let mut table = toml::Table::new();

        // 1. Global config
        if let Some(global_path) = global {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                let contents = std::fs::read_to_string(global_path)?;
                table = contents.parse::<toml::Table>()?;
            }
        }

        // 2. Project config, key by key over the global one
        if project.exists() {
            debug!("Loading project config from {:?}", project);
            let contents = std::fs::read_to_string(project)?;
            merge_tables(&mut table, contents.parse::<toml::Table>()?);
        }

        Ok(toml::Value::Table(table).try_into()?)
    }

    /// Global config path: ~/.vault/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".vault/config.toml"))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// Unparseable numeric values are ignored and logged.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(env::CHUNK_ROOT) {
            self.storage.chunk_root = PathBuf::from(path);
        }
        if let Some(path) = lookup(env::MANIFEST_DIR) {
            self.storage.manifest_dir = PathBuf::from(path);
        }
        if let Some(raw) = lookup(env::CHUNK_SIZE) {
            match raw.parse() {
                Ok(n) => self.chunking.chunk_size = n,
                Err(_) => debug!("Ignoring {}={:?}: not a number", env::CHUNK_SIZE, raw),
            }
        }
        if let Some(raw) = lookup(env::THREADS) {
            match raw.parse() {
                Ok(n) => self.chunking.threads = Some(n),
                Err(_) => debug!("Ignoring {}={:?}: not a number", env::THREADS, raw),
            }
        }
        if let Some(path) = lookup(env::SIGNING_KEY) {
            self.signing.key_file = Some(PathBuf::from(path));
            self.signing.enabled = true;
        }
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunking.chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "chunking.chunk_size must be greater than zero".into(),
            ));
        }
        if self.chunking.batch_chunks == 0 {
            return Err(ConfigError::Invalid(
                "chunking.batch_chunks must be greater than zero".into(),
            ));
        }
        if self.chunking.threads == Some(0) {
            return Err(ConfigError::Invalid(
                "chunking.threads must be greater than zero when set".into(),
            ));
        }
        if self.signing.enabled && self.signing.key_file.is_none() {
            return Err(ConfigError::Invalid(
                "signing.enabled requires signing.key_file".into(),
            ));
        }
        Ok(())
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        // Every field of Config is representable in TOML
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

/// Recursively overlay `overlay` onto `base`. Tables merge; everything else
/// is replaced.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Chunk store root directory
    pub chunk_root: PathBuf,
    /// LMDB manifest index directory
    pub manifest_dir: PathBuf,
}

impl StorageConfig {
    pub fn chunk_root(&self) -> PathBuf {
        expand_tilde(&self.chunk_root)
    }

    pub fn manifest_dir(&self) -> PathBuf {
        expand_tilde(&self.manifest_dir)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            chunk_root: PathBuf::from("~/.vault/chunks"),
            manifest_dir: PathBuf::from("~/.vault/manifests"),
        }
    }
}

/// Chunking and hashing configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Fixed chunk size in bytes
    pub chunk_size: usize,
    /// Chunks hashed and stored per parallel batch
    pub batch_chunks: usize,
    /// Number of hashing threads (None = auto)
    pub threads: Option<usize>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: vault_cas::DEFAULT_CHUNK_SIZE,
            batch_chunks: 16,
            threads: None,
        }
    }
}

/// Receipt signing configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Sign ingest receipts by default
    pub enabled: bool,
    /// File holding a hex-encoded Ed25519 seed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
}

impl SigningConfig {
    pub fn key_file(&self) -> Option<PathBuf> {
        self.key_file.as_deref().map(expand_tilde)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of error, warn, info, debug, trace
    pub level: String,
}

impl LoggingConfig {
    /// Parsed level, falling back to `Info` for unknown names
    pub fn level(&self) -> LogLevel {
        self.level.parse().unwrap_or(LogLevel::Info)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.chunking.chunk_size, 1024 * 1024);
        assert_eq!(config.chunking.batch_chunks, 16);
        assert!(!config.signing.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[storage]"));
        assert!(toml_str.contains("[chunking]"));
        assert!(toml_str.contains("chunk_size = 1048576"));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_merge_tables_is_key_by_key() {
        let mut base: toml::Table = toml::from_str(
            r#"
            [chunking]
            chunk_size = 4096
            threads = 2
            "#,
        )
        .unwrap();
        let overlay: toml::Table = toml::from_str("[chunking]\nthreads = 8\n").unwrap();
        merge_tables(&mut base, overlay);

        let merged: Config = toml::Value::Table(base).try_into().unwrap();
        assert_eq!(merged.chunking.chunk_size, 4096);
        assert_eq!(merged.chunking.threads, Some(8));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            (env::CHUNK_ROOT, "/tmp/chunks"),
            (env::CHUNK_SIZE, "65536"),
            (env::THREADS, "not-a-number"),
            (env::SIGNING_KEY, "/keys/vault.seed"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.storage.chunk_root, PathBuf::from("/tmp/chunks"));
        assert_eq!(config.chunking.chunk_size, 65536);
        assert_eq!(config.chunking.threads, None);
        assert!(config.signing.enabled);
        assert_eq!(config.signing.key_file, Some(PathBuf::from("/keys/vault.seed")));
    }

    #[test]
    fn test_validate_rejects_zero_chunk_size() {
        let mut config = Config::default();
        config.chunking.chunk_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_signing_needs_key() {
        let mut config = Config::default();
        config.signing.enabled = true;
        assert!(config.validate().is_err());
        config.signing.key_file = Some(PathBuf::from("seed.hex"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_global_config_reload() {
        let before = config().clone();
        if reload().is_ok() {
            assert_eq!(*config(), before);
        }
    }

    #[test]
    fn test_expand_tilde() {
        let plain = Path::new("/var/lib/vault");
        assert_eq!(expand_tilde(plain), plain);

        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/.vault/chunks")), home.join(".vault/chunks"));
        }
    }
}
