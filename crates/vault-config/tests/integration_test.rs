//! Integration tests for vault-config
//!
//! These tests verify the full config loading pipeline with real file system operations.

use std::path::PathBuf;
use tempfile::tempdir;
use vault_config::{Config, ConfigError};

/// Test config loading from a real global config file
#[test]
fn test_load_global_config_from_file() {
    let temp = tempdir().unwrap();
    let global = temp.path().join("global.toml");
    std::fs::write(
        &global,
        r#"
[storage]
chunk_root = "/custom/chunks"
manifest_dir = "/custom/manifests"

[chunking]
chunk_size = 262144
threads = 4

[logging]
level = "debug"
"#,
    )
    .unwrap();

    let config = Config::load_from(Some(&global), &temp.path().join("missing.toml")).unwrap();

    assert_eq!(config.storage.chunk_root, PathBuf::from("/custom/chunks"));
    assert_eq!(config.storage.manifest_dir, PathBuf::from("/custom/manifests"));
    assert_eq!(config.chunking.chunk_size, 262144);
    assert_eq!(config.chunking.threads, Some(4));
    assert_eq!(config.chunking.batch_chunks, 16);
    assert_eq!(config.logging.level(), vault_config::LogLevel::Debug);
}

/// Test config hierarchy: project config overrides global, key by key
#[test]
fn test_config_hierarchy_project_overrides_global() {
    let temp = tempdir().unwrap();

    let global = temp.path().join("global.toml");
    std::fs::write(
        &global,
        r#"
[storage]
chunk_root = "/global/chunks"

[chunking]
chunk_size = 65536
batch_chunks = 8
"#,
    )
    .unwrap();

    let project_dir = temp.path().join("project/.vault");
    std::fs::create_dir_all(&project_dir).unwrap();
    let project = project_dir.join("config.toml");
    std::fs::write(
        &project,
        r#"
[chunking]
batch_chunks = 32

[signing]
enabled = true
key_file = "/keys/project.seed"
"#,
    )
    .unwrap();

    let config = Config::load_from(Some(&global), &project).unwrap();

    assert_eq!(config.storage.chunk_root, PathBuf::from("/global/chunks"));
    assert_eq!(config.chunking.chunk_size, 65536);
    assert_eq!(config.chunking.batch_chunks, 32);
    assert!(config.signing.enabled);
    assert_eq!(
        config.signing.key_file(),
        Some(PathBuf::from("/keys/project.seed"))
    );
    assert!(config.validate().is_ok());
}

/// Test that no config files at all yields defaults
#[test]
fn test_missing_files_yield_defaults() {
    let temp = tempdir().unwrap();
    let config = Config::load_from(None, &temp.path().join("nope.toml")).unwrap();
    assert_eq!(config, Config::default());
}

/// Test that malformed TOML is reported, not silently ignored
#[test]
fn test_malformed_toml_is_an_error() {
    let temp = tempdir().unwrap();
    let project = temp.path().join("config.toml");
    std::fs::write(&project, "[chunking\nchunk_size = ").unwrap();

    let result = Config::load_from(None, &project);
    assert!(matches!(result, Err(ConfigError::Toml(_))));
}

/// Test that a wrongly-typed value is reported
#[test]
fn test_wrong_type_is_an_error() {
    let temp = tempdir().unwrap();
    let project = temp.path().join("config.toml");
    std::fs::write(&project, "[chunking]\nchunk_size = \"big\"\n").unwrap();

    assert!(Config::load_from(None, &project).is_err());
}

/// Test the default TOML template parses back into the defaults
#[test]
fn test_default_template_roundtrip() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, Config::default_toml()).unwrap();

    let config = Config::load_from(None, &path).unwrap();
    assert_eq!(config, Config::default());
}

/// Test the isolated environment produces a usable config
#[test]
fn test_environment_config_is_valid() {
    let env = vault_config::testing::TestEnvironment::new().unwrap();
    let config = env.config();
    assert!(config.validate().is_ok());
    assert_eq!(config.storage.chunk_root(), env.chunk_root);
}
