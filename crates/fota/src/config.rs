//! Service configuration
//!
//! Loaded from a JSON file. A missing file is replaced by the defaults,
//! which are written back so operators have a template to edit.

use crate::error::{FotaError, FotaResult};
use crate::store::{FileStorage, FirmwareStorage, MemoryStorage};
use ecowatt_fota_crypto::keys::{DEFAULT_ENC_KEY_VAR, DEFAULT_MAC_KEY_VAR};
use ecowatt_fota_crypto::{
    EnvKeyProvider, FileKeyProvider, FotaKeys, KeyProvider, StaticKeyProvider,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default chunk size in bytes
pub const DEFAULT_CHUNK_SIZE: u32 = 1024;

/// Largest accepted chunk size in bytes
pub const MAX_CHUNK_SIZE: u32 = 64 * 1024;

/// Complete FOTA configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FotaConfig {
    /// Plaintext bytes per chunk
    pub chunk_size: u32,
    /// Where uploaded images are kept
    pub storage: StorageConfig,
    /// Where the pre-shared keys come from
    pub keys: KeySource,
}

/// Storage backend selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Keep images in memory
    Memory,
    /// One file per upload inside `dir`
    Filesystem {
        /// Storage directory
        dir: PathBuf,
    },
}

/// Key source selection
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum KeySource {
    /// Hex keys in environment variables
    Env {
        /// Variable holding the 16-byte encryption key
        #[serde(default = "default_enc_var")]
        enc_key_var: String,
        /// Variable holding the 32-byte MAC key
        #[serde(default = "default_mac_var")]
        mac_key_var: String,
    },
    /// JSON key file with hex `enc_key` and `mac_key`
    File {
        /// Key file path
        path: PathBuf,
    },
    /// Hex keys written in the config itself (development only)
    Inline {
        /// Encryption key, 32 hex characters
        enc_key: String,
        /// MAC key, 64 hex characters
        mac_key: String,
    },
}

fn default_enc_var() -> String {
    DEFAULT_ENC_KEY_VAR.to_string()
}

fn default_mac_var() -> String {
    DEFAULT_MAC_KEY_VAR.to_string()
}

impl std::fmt::Debug for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Env {
                enc_key_var,
                mac_key_var,
            } => f
                .debug_struct("Env")
                .field("enc_key_var", enc_key_var)
                .field("mac_key_var", mac_key_var)
                .finish(),
            KeySource::File { path } => f.debug_struct("File").field("path", path).finish(),
            KeySource::Inline { .. } => f.write_str("Inline(<redacted>)"),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Filesystem {
            dir: PathBuf::from("./firmware"),
        }
    }
}

impl Default for KeySource {
    fn default() -> Self {
        KeySource::Env {
            enc_key_var: default_enc_var(),
            mac_key_var: default_mac_var(),
        }
    }
}

impl Default for FotaConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            storage: StorageConfig::default(),
            keys: KeySource::default(),
        }
    }
}

impl KeySource {
    /// Build the provider for this source
    pub fn provider(&self) -> FotaResult<Box<dyn KeyProvider>> {
        let provider: Box<dyn KeyProvider> = match self {
            KeySource::Env {
                enc_key_var,
                mac_key_var,
            } => Box::new(EnvKeyProvider::new(enc_key_var, mac_key_var)),
            KeySource::File { path } => Box::new(FileKeyProvider::new(path)),
            KeySource::Inline { enc_key, mac_key } => {
                let keys = FotaKeys::from_hex(enc_key, mac_key)
                    .map_err(|e| FotaError::Config(format!("inline keys: {}", e)))?;
                Box::new(StaticKeyProvider::new(keys))
            }
        };
        Ok(provider)
    }

    /// Load the keys, reporting failures as configuration errors
    pub fn load_keys(&self) -> FotaResult<FotaKeys> {
        self.provider()?
            .load_keys()
            .map_err(|e| FotaError::Config(format!("failed to load keys: {}", e)))
    }
}

impl StorageConfig {
    /// Build the configured backend
    pub async fn build(&self) -> FotaResult<Arc<dyn FirmwareStorage>> {
        let storage: Arc<dyn FirmwareStorage> = match self {
            StorageConfig::Memory => Arc::new(MemoryStorage::new()),
            StorageConfig::Filesystem { dir } => Arc::new(FileStorage::new(dir).await?),
        };
        Ok(storage)
    }
}

impl FotaConfig {
    /// Load configuration from a JSON file
    pub async fn load_from_path<P: AsRef<Path>>(path: P) -> FotaResult<Self> {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file not found at {:?}, creating default", path);
            let config = Self::default();
            config.save_to_path(path).await?;
            return Ok(config);
        }

        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            FotaError::Config(format!("failed to read config file {:?}: {}", path, e))
        })?;

        let config: Self = serde_json::from_str(&content).map_err(|e| {
            FotaError::Config(format!("failed to parse config file {:?}: {}", path, e))
        })?;

        config.validate()?;
        debug!(?config, "Loaded FOTA configuration");
        Ok(config)
    }

    /// Save configuration as pretty JSON
    pub async fn save_to_path<P: AsRef<Path>>(&self, path: P) -> FotaResult<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;

        info!("Saved FOTA configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> FotaResult<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(FotaError::Config(format!(
                "Invalid chunk size: {} bytes (must be 1..={})",
                self.chunk_size, MAX_CHUNK_SIZE
            )));
        }

        if !self.chunk_size.is_multiple_of(16) {
            return Err(FotaError::Config(format!(
                "Invalid chunk size: {} bytes (must be a multiple of 16)",
                self.chunk_size
            )));
        }

        match &self.storage {
            StorageConfig::Memory => {
                info!("Memory storage selected: staged firmware is lost on restart");
            }
            StorageConfig::Filesystem { dir } if dir.as_os_str().is_empty() => {
                return Err(FotaError::Config("Storage directory is empty".to_string()));
            }
            StorageConfig::Filesystem { .. } => {}
        }

        match &self.keys {
            KeySource::Env {
                enc_key_var,
                mac_key_var,
            } if enc_key_var.is_empty() || mac_key_var.is_empty() => {
                return Err(FotaError::Config(
                    "Key environment variable names must not be empty".to_string(),
                ));
            }
            KeySource::File { path } if path.as_os_str().is_empty() => {
                return Err(FotaError::Config("Key file path is empty".to_string()));
            }
            KeySource::Inline { .. } => {
                warn!("Inline keys configured: use only for development");
                self.keys.provider()?;
            }
            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    const ENC_HEX: &str = "000102030405060708090a0b0c0d0e0f";

    fn inline_config() -> FotaConfig {
        FotaConfig {
            chunk_size: 512,
            storage: StorageConfig::Memory,
            keys: KeySource::Inline {
                enc_key: ENC_HEX.to_string(),
                mac_key: "11".repeat(32),
            },
        }
    }

    #[test]
    fn test_default_config_is_valid() -> TestResult {
        let config = FotaConfig::default();
        config.validate()?;
        assert_eq!(config.chunk_size, 1024);
        Ok(())
    }

    #[test]
    fn test_chunk_size_rules() {
        for bad in [0, 1000, MAX_CHUNK_SIZE + 16] {
            let config = FotaConfig {
                chunk_size: bad,
                ..FotaConfig::default()
            };
            assert!(
                matches!(config.validate(), Err(FotaError::Config(_))),
                "chunk size {} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_tagged_json_shapes() -> TestResult {
        let json = r#"{
            "chunk_size": 2048,
            "storage": { "kind": "filesystem", "dir": "/var/lib/fota" },
            "keys": { "source": "env" }
        }"#;
        let config: FotaConfig = serde_json::from_str(json)?;
        assert_eq!(config.chunk_size, 2048);
        assert_eq!(
            config.storage,
            StorageConfig::Filesystem {
                dir: PathBuf::from("/var/lib/fota")
            }
        );
        assert_eq!(config.keys, KeySource::default());
        Ok(())
    }

    #[test]
    fn test_missing_fields_take_defaults() -> TestResult {
        let config: FotaConfig = serde_json::from_str(r#"{ "storage": { "kind": "memory" } }"#)?;
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.storage, StorageConfig::Memory);
        Ok(())
    }

    #[test]
    fn test_inline_keys_redacted_in_debug() {
        let rendered = format!("{:?}", inline_config());
        assert!(!rendered.contains(ENC_HEX));
        assert!(rendered.contains("redacted"));
    }

    #[test]
    fn test_invalid_inline_keys_rejected() {
        let config = FotaConfig {
            keys: KeySource::Inline {
                enc_key: "abcd".to_string(),
                mac_key: "11".repeat(32),
            },
            ..inline_config()
        };
        assert!(matches!(config.validate(), Err(FotaError::Config(_))));
    }

    #[test]
    fn test_inline_keys_load() -> TestResult {
        let keys = inline_config().keys.load_keys()?;
        assert_eq!(hex::encode(keys.enc_key.as_bytes()), ENC_HEX);
        Ok(())
    }

    #[tokio::test]
    async fn test_save_and_load() -> TestResult {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("nested").join("fota.json");

        let config = inline_config();
        config.save_to_path(&path).await?;
        let loaded = FotaConfig::load_from_path(&path).await?;
        assert_eq!(loaded, config);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_file_writes_defaults() -> TestResult {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("fota.json");

        let loaded = FotaConfig::load_from_path(&path).await?;
        assert_eq!(loaded, FotaConfig::default());
        assert!(path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_unparseable_file_is_config_error() -> TestResult {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("fota.json");
        tokio::fs::write(&path, "not json").await?;

        assert!(matches!(
            FotaConfig::load_from_path(&path).await,
            Err(FotaError::Config(_))
        ));
        Ok(())
    }
}
