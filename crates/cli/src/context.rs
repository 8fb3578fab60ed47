//! Key and configuration resolution shared by commands

use anyhow::{Context as _, Result};
use ecowatt_fota::{FotaConfig, FotaService, KeySource, StorageConfig};
use ecowatt_fota_crypto::{ChunkCipher, FotaKeys};
use std::path::PathBuf;
use tracing::debug;

use crate::error::CliError;

/// Global options every command sees
#[derive(Debug, Clone)]
pub struct Context {
    pub json: bool,
    pub config: Option<PathBuf>,
    pub keys: Option<PathBuf>,
}

impl Context {
    /// Effective configuration: the config file if given, defaults otherwise,
    /// with `--keys` overriding the key source
    pub async fn config(&self) -> Result<FotaConfig> {
        let mut config = match &self.config {
            Some(path) => FotaConfig::load_from_path(path)
                .await
                .map_err(CliError::from)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => FotaConfig::default(),
        };
        if let Some(path) = &self.keys {
            config.keys = KeySource::File { path: path.clone() };
        }
        debug!(?config, "Resolved configuration");
        Ok(config)
    }

    /// Pre-shared keys from the effective configuration
    pub async fn keys(&self) -> Result<FotaKeys> {
        let config = self.config().await?;
        Ok(config.keys.load_keys().map_err(CliError::from)?)
    }

    /// Chunk cipher keyed from the effective configuration
    pub async fn cipher(&self) -> Result<ChunkCipher> {
        let keys = self.keys().await?;
        Ok(ChunkCipher::new(&keys)
            .map_err(|e| CliError::InvalidConfiguration(e.to_string()))?)
    }

    /// In-memory service for offline staging
    ///
    /// Staging never touches the configured storage directory.
    pub async fn offline_service(&self, chunk_size: Option<u32>) -> Result<FotaService> {
        let mut config = self.config().await?;
        config.storage = StorageConfig::Memory;
        if let Some(chunk_size) = chunk_size {
            config.chunk_size = chunk_size;
        }
        Ok(FotaService::from_config(&config)
            .await
            .map_err(CliError::from)?)
    }
}
