//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - Temporary chunk store roots
//! - Temporary manifest index directories
//! - Input files for streaming ingests
//!
//! # Usage
//!
//! ```ignore
//! use vault_config::testing::TestEnvironment;
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     let config = env.config();
//!     // config.storage points at env.chunk_root / env.manifest_dir
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::Config;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Isolated chunk store root
    pub chunk_root: PathBuf,
    /// Isolated manifest index directory
    pub manifest_dir: PathBuf,
    /// Scratch space for input files
    pub input_dir: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let chunk_root = root.join("chunks");
        let manifest_dir = root.join("manifests");
        let input_dir = root.join("input");

        std::fs::create_dir_all(&chunk_root)?;
        std::fs::create_dir_all(&manifest_dir)?;
        std::fs::create_dir_all(&input_dir)?;

        Ok(Self {
            _temp_dir: temp_dir,
            chunk_root,
            manifest_dir,
            input_dir,
            test_id,
        })
    }

    /// Default config with storage redirected into this environment
    pub fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.storage.chunk_root = self.chunk_root.clone();
        cfg.storage.manifest_dir = self.manifest_dir.clone();
        cfg
    }

    /// Same as [`config`](Self::config) with a custom chunk size
    pub fn config_with_chunk_size(&self, chunk_size: usize) -> Config {
        let mut cfg = self.config();
        cfg.chunking.chunk_size = chunk_size;
        cfg
    }

    /// Create an input file with content
    pub fn create_file(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.input_dir.join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Write a hex Ed25519 seed file and point signing at it
    pub fn create_key_file(&self, seed: &[u8; 32]) -> anyhow::Result<PathBuf> {
        self.create_file(&format!("signing-{}.key", self.test_id), hex::encode(seed).as_bytes())
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_creates_directories() {
        let env = TestEnvironment::new().unwrap();
        assert!(env.chunk_root.exists());
        assert!(env.manifest_dir.exists());
        assert!(env.input_dir.exists());
    }

    #[test]
    fn test_environments_are_isolated() {
        let env1 = TestEnvironment::new().unwrap();
        let env2 = TestEnvironment::new().unwrap();
        assert_ne!(env1.chunk_root, env2.chunk_root);
        assert_ne!(env1.test_id, env2.test_id);
    }

    #[test]
    fn test_config_points_into_environment() {
        let env = TestEnvironment::new().unwrap();
        let cfg = env.config_with_chunk_size(4096);
        assert_eq!(cfg.storage.chunk_root, env.chunk_root);
        assert_eq!(cfg.storage.manifest_dir, env.manifest_dir);
        assert_eq!(cfg.chunking.chunk_size, 4096);
    }

    #[test]
    fn test_create_key_file() {
        let env = TestEnvironment::new().unwrap();
        let path = env.create_key_file(&[0xab; 32]).unwrap();
        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(contents, "ab".repeat(32));

        let mut seed = [0u8; 32];
        seed[0] = 0x01;
        seed[31] = 0xfe;
        let path = env.create_key_file(&seed).unwrap();
        let decoded = hex::decode(std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(decoded, seed);
    }
}
