//! Active-slot lifecycle and chunk serving
//!
//! The service holds at most one staged image. A staged image is an
//! immutable [`ActiveFirmware`] snapshot behind an `Arc`; uploads build a new
//! snapshot off to the side and publish it with a single assignment under the
//! write lock, and readers clone the `Arc` under the read lock and work on
//! the snapshot without holding any lock.
//!
//! State transitions:
//!
//! | From    | Operation | To      |
//! |---------|-----------|---------|
//! | any     | upload    | STAGED  |
//! | STAGED  | boot_ok   | EMPTY   |
//! | EMPTY   | boot_ok   | EMPTY   |
//! | any     | report    | same    |

use crate::config::FotaConfig;
use crate::error::{FotaError, FotaResult, NotFoundReason};
use crate::manifest::{
    ChunkLayout, Manifest, ManifestResponse, UploadResponse, UploadStatus, digest_stored,
};
use crate::store::{FirmwareStorage, StorageHandle};
use chrono::{DateTime, Utc};
use ecowatt_fota_crypto::{ChunkCipher, ChunkResponse, Iv, SealedChunk, block_offset};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Number of recently issued IVs a new upload is checked against
pub const RECENT_IV_HISTORY: usize = 64;

/// Lifecycle state of the active slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FotaState {
    /// Nothing to serve
    Empty,
    /// An image is staged and servable
    Staged,
}

impl std::fmt::Display for FotaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FotaState::Empty => write!(f, "EMPTY"),
            FotaState::Staged => write!(f, "STAGED"),
        }
    }
}

/// Immutable snapshot of the staged image
#[derive(Debug, Clone)]
pub struct ActiveFirmware {
    /// Version identifier
    pub version: String,
    /// Storage location of the plaintext
    pub handle: StorageHandle,
    /// IV generated for this upload
    pub iv: Iv,
    /// Chunk geometry
    pub layout: ChunkLayout,
    /// SHA-256 of the plaintext, lowercase hex
    pub sha256_hex: String,
    /// When the image was staged
    pub staged_at: DateTime<Utc>,
}

impl ActiveFirmware {
    /// Manifest announced for this image
    pub fn manifest(&self) -> Manifest {
        Manifest {
            version: self.version.clone(),
            size_bytes: self.layout.size_bytes(),
            sha256_hex: self.sha256_hex.clone(),
            chunk_size: self.layout.chunk_size(),
            iv_hex: self.iv.to_hex(),
            total_chunks: self.layout.total_chunks(),
        }
    }
}

/// `{"ok": true}` acknowledgment for report and boot_ok
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Always true
    pub ok: bool,
}

impl Ack {
    fn ok() -> Self {
        Self { ok: true }
    }
}

/// Operator view of the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FotaStatus {
    /// Current state
    pub state: FotaState,
    /// Staged version
    pub version: Option<String>,
    /// Chunks in the staged image
    pub total_chunks: Option<u32>,
    /// When the staged image was uploaded
    pub staged_at: Option<DateTime<Utc>>,
}

/// Firmware store, manifest builder and chunk encryptor behind one active slot
pub struct FotaService {
    storage: Arc<dyn FirmwareStorage>,
    cipher: ChunkCipher,
    chunk_size: u32,
    active: RwLock<Option<Arc<ActiveFirmware>>>,
    recent_ivs: Mutex<VecDeque<Iv>>,
}

impl std::fmt::Debug for FotaService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FotaService")
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

impl FotaService {
    /// Create a service over a storage backend
    pub fn new(
        storage: Arc<dyn FirmwareStorage>,
        cipher: ChunkCipher,
        chunk_size: u32,
    ) -> FotaResult<Self> {
        if chunk_size == 0 {
            return Err(FotaError::Config(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            storage,
            cipher,
            chunk_size,
            active: RwLock::new(None),
            recent_ivs: Mutex::new(VecDeque::with_capacity(RECENT_IV_HISTORY)),
        })
    }

    /// Build storage and keys from configuration
    pub async fn from_config(config: &FotaConfig) -> FotaResult<Self> {
        config.validate()?;
        let keys = config.keys.load_keys()?;
        let cipher = ChunkCipher::new(&keys)?;
        let storage = config.storage.build().await?;
        info!(chunk_size = config.chunk_size, storage = ?config.storage, "FOTA service ready");
        Self::new(storage, cipher, config.chunk_size)
    }

    /// Configured chunk size
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// The chunk cipher keyed for this service
    pub fn cipher(&self) -> &ChunkCipher {
        &self.cipher
    }

    /// Current snapshot, if any
    pub async fn active(&self) -> Option<Arc<ActiveFirmware>> {
        self.active.read().await.clone()
    }

    /// Current lifecycle state
    pub async fn state(&self) -> FotaState {
        if self.active().await.is_some() {
            FotaState::Staged
        } else {
            FotaState::Empty
        }
    }

    /// Stage a new image, replacing whatever was active
    pub async fn upload(&self, content: &[u8], version: &str) -> FotaResult<UploadResponse> {
        if version.is_empty() {
            return Err(FotaError::Validation("missing version".to_string()));
        }
        if content.is_empty() {
            return Err(FotaError::Validation("missing firmware file".to_string()));
        }

        let layout = ChunkLayout::new(content.len() as u64, self.chunk_size)?;

        let handle = self
            .storage
            .put(version, content)
            .await
            .inspect_err(|e| error!(version, error = %e, "Failed to store firmware"))?;
        let sha256_hex = digest_stored(self.storage.as_ref(), handle, layout.size_bytes())
            .await
            .inspect_err(|e| error!(version, %handle, error = %e, "Failed to hash stored firmware"))?;

        let snapshot = Arc::new(ActiveFirmware {
            version: version.to_string(),
            handle,
            iv: self.fresh_iv(),
            layout,
            sha256_hex,
            staged_at: Utc::now(),
        });
        let manifest = snapshot.manifest();

        let previous = {
            let mut slot = self.active.write().await;
            slot.replace(snapshot)
        };

        info!(
            version,
            size = manifest.size_bytes,
            total_chunks = manifest.total_chunks,
            replaced = previous.as_ref().map(|p| p.version.as_str()),
            "Firmware staged"
        );

        Ok(UploadResponse {
            status: UploadStatus::Success,
            manifest,
        })
    }

    /// Random IV distinct from the last [`RECENT_IV_HISTORY`] uploads
    ///
    /// Uniqueness beyond the window rests on the 128-bit `OsRng` draw.
    fn fresh_iv(&self) -> Iv {
        let mut recent = self.recent_ivs.lock();
        let iv = loop {
            let candidate = Iv::generate();
            if !recent.contains(&candidate) {
                break candidate;
            }
        };
        if recent.len() >= RECENT_IV_HISTORY {
            recent.pop_front();
        }
        recent.push_back(iv);
        iv
    }

    /// Manifest of the active image
    pub async fn manifest(&self) -> ManifestResponse {
        match self.active().await {
            Some(active) => ManifestResponse::Active(active.manifest()),
            None => {
                debug!("Manifest requested with no active firmware");
                ManifestResponse::empty()
            }
        }
    }

    /// Encrypt and tag one chunk of the active image
    pub async fn get_chunk(&self, version: &str, index: u32) -> FotaResult<SealedChunk> {
        let Some(active) = self.active().await else {
            debug!(version, index, "Chunk requested with no active firmware");
            return Err(FotaError::NotFound(NotFoundReason::NoActiveFirmware));
        };

        if active.version != version {
            debug!(version, active = %active.version, index, "Chunk requested for inactive version");
            return Err(FotaError::NotFound(NotFoundReason::VersionMismatch));
        }

        let Some((offset, len)) = active.layout.chunk_range(index) else {
            debug!(version, index, total = active.layout.total_chunks(), "Chunk index out of range");
            return Err(FotaError::NotFound(NotFoundReason::IndexOutOfRange));
        };

        let plaintext = self
            .storage
            .read_at(active.handle, offset, len)
            .await
            .inspect_err(|e| error!(version, index, error = %e, "Failed to read firmware chunk"))?;

        let chunk_size = active.layout.chunk_size();
        let sealed = self.cipher.seal(&active.iv, index, chunk_size, &plaintext);
        debug!(
            version,
            index,
            len,
            block_offset = block_offset(index, chunk_size),
            "Serving chunk"
        );
        Ok(sealed)
    }

    /// Serve a chunk from raw request parameters
    ///
    /// An empty slot wins over every parameter problem. A missing version,
    /// or a missing or non-numeric index, is a validation error; a negative
    /// or out-of-range index is not found.
    pub async fn chunk(&self, version: Option<&str>, n: Option<&str>) -> FotaResult<ChunkResponse> {
        if self.active().await.is_none() {
            debug!("Chunk requested with no active firmware");
            return Err(FotaError::NotFound(NotFoundReason::NoActiveFirmware));
        }

        let version = version
            .filter(|v| !v.is_empty())
            .ok_or_else(|| FotaError::Validation("missing version".to_string()))?;
        let raw = n
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| FotaError::Validation("missing chunk index".to_string()))?;
        let requested: i64 = raw
            .parse()
            .map_err(|e| FotaError::Validation(format!("invalid chunk index {:?}: {}", raw, e)))?;

        let Ok(index) = u32::try_from(requested) else {
            debug!(version, requested, "Chunk index not representable");
            return Err(FotaError::NotFound(NotFoundReason::IndexOutOfRange));
        };

        let sealed = self.get_chunk(version, index).await?;
        Ok(ChunkResponse::from(&sealed))
    }

    /// Record a device progress report; never changes state
    pub async fn report(&self, payload: &serde_json::Value) -> Ack {
        let field = |name: &str| payload.get(name).cloned().unwrap_or(serde_json::Value::Null);
        info!(
            device_id = %field("device_id"),
            status = %field("status"),
            chunk = %field("chunk"),
            version = %field("version"),
            "Device FOTA report"
        );
        Ack::ok()
    }

    /// Consume the staged image after a device booted it
    ///
    /// Consumption is system-wide. A version in the payload that differs
    /// from the active one is logged, and the slot is cleared regardless.
    pub async fn boot_ok(&self, payload: &serde_json::Value) -> Ack {
        let reported = payload.get("version").and_then(serde_json::Value::as_str);
        let consumed = self.active.write().await.take();

        match consumed {
            Some(active) => {
                if let Some(reported) = reported.filter(|r| *r != active.version) {
                    warn!(
                        reported,
                        active = %active.version,
                        "boot_ok version differs from active firmware"
                    );
                }
                info!(version = %active.version, "Firmware consumed, slot cleared");
            }
            None => debug!(?reported, "boot_ok with no active firmware"),
        }
        Ack::ok()
    }

    /// Operator status view
    pub async fn status(&self) -> FotaStatus {
        match self.active().await {
            Some(active) => FotaStatus {
                state: FotaState::Staged,
                version: Some(active.version.clone()),
                total_chunks: Some(active.layout.total_chunks()),
                staged_at: Some(active.staged_at),
            },
            None => FotaStatus {
                state: FotaState::Empty,
                version: None,
                total_chunks: None,
                staged_at: None,
            },
        }
    }
}
