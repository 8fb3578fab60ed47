//! Manifest construction and chunk geometry

use crate::error::{FotaError, FotaResult};
use crate::store::{FirmwareStorage, StorageHandle};
use ecowatt_fota_crypto::Iv;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::trace;

/// Block size used when streaming an image back from storage for hashing
pub const HASH_READ_BLOCK: usize = 8192;

/// How an image of a given size divides into chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    size_bytes: u64,
    chunk_size: u32,
    total_chunks: u32,
}

impl ChunkLayout {
    /// Compute the layout, rejecting a zero chunk size or a chunk count
    /// that does not fit in a `u32` index
    pub fn new(size_bytes: u64, chunk_size: u32) -> FotaResult<Self> {
        if chunk_size == 0 {
            return Err(FotaError::Validation(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        let total = size_bytes.div_ceil(u64::from(chunk_size));
        let total_chunks = u32::try_from(total).map_err(|e| {
            FotaError::Validation(format!(
                "image of {} bytes needs {} chunks: {}",
                size_bytes, total, e
            ))
        })?;
        Ok(Self {
            size_bytes,
            chunk_size,
            total_chunks,
        })
    }

    /// Image size in bytes
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Chunk size in bytes
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// `ceil(size_bytes / chunk_size)`
    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    /// Byte offset and plaintext length of a chunk, or `None` when the index
    /// is outside `[0, total_chunks)`
    pub fn chunk_range(&self, index: u32) -> Option<(u64, usize)> {
        if index >= self.total_chunks {
            return None;
        }
        let offset = u64::from(index).checked_mul(u64::from(self.chunk_size))?;
        let remaining = self.size_bytes.checked_sub(offset)?;
        let len = remaining.min(u64::from(self.chunk_size));
        Some((offset, usize::try_from(len).ok()?))
    }

    /// Plaintext length of a chunk
    pub fn chunk_len(&self, index: u32) -> Option<usize> {
        self.chunk_range(index).map(|(_, len)| len)
    }
}

/// Metadata of the active image, as announced to devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Version identifier
    pub version: String,
    /// Image size in bytes
    #[serde(rename = "size")]
    pub size_bytes: u64,
    /// SHA-256 of the plaintext image, lowercase hex
    #[serde(rename = "hash")]
    pub sha256_hex: String,
    /// Chunk size in bytes
    pub chunk_size: u32,
    /// Image IV, lowercase hex
    #[serde(rename = "iv")]
    pub iv_hex: String,
    /// Number of chunks
    pub total_chunks: u32,
}

impl Manifest {
    /// Chunk layout described by this manifest
    pub fn layout(&self) -> FotaResult<ChunkLayout> {
        ChunkLayout::new(self.size_bytes, self.chunk_size)
    }

    /// Decoded IV
    pub fn iv(&self) -> FotaResult<Iv> {
        Ok(Iv::from_hex(&self.iv_hex)?)
    }

    /// Whether a device running `current_version` needs this image
    ///
    /// Versions are opaque: only an exact match counts as up to date.
    pub fn is_update_for(&self, current_version: &str) -> bool {
        self.version != current_version
    }

    /// Check internal consistency of a received manifest
    pub fn validate(&self) -> FotaResult<()> {
        if self.version.is_empty() {
            return Err(FotaError::Validation("manifest has no version".to_string()));
        }
        if self.size_bytes == 0 {
            return Err(FotaError::Validation("manifest size is zero".to_string()));
        }
        let layout = self.layout()?;
        if layout.total_chunks() != self.total_chunks {
            return Err(FotaError::Validation(format!(
                "manifest declares {} chunks, size {} with chunk size {} needs {}",
                self.total_chunks,
                self.size_bytes,
                self.chunk_size,
                layout.total_chunks()
            )));
        }
        if self.sha256_hex.len() != 64 || hex::decode(&self.sha256_hex).is_err() {
            return Err(FotaError::Validation(
                "manifest hash must be 64 hex characters".to_string(),
            ));
        }
        self.iv()?;
        Ok(())
    }
}

/// Marker for the empty-slot manifest response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyStatus {
    /// Nothing is staged
    NoActiveFirmware,
}

/// Result of a manifest request
///
/// Serializes either as the manifest object or as
/// `{"status": "no_active_firmware"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ManifestResponse {
    /// An image is staged
    Active(Manifest),
    /// Nothing is staged
    Empty {
        /// Always `no_active_firmware`
        status: EmptyStatus,
    },
}

impl ManifestResponse {
    /// The empty-slot response
    pub fn empty() -> Self {
        ManifestResponse::Empty {
            status: EmptyStatus::NoActiveFirmware,
        }
    }

    /// The manifest, if an image is staged
    pub fn active(&self) -> Option<&Manifest> {
        match self {
            ManifestResponse::Active(manifest) => Some(manifest),
            ManifestResponse::Empty { .. } => None,
        }
    }

    /// Whether nothing is staged
    pub fn is_empty(&self) -> bool {
        self.active().is_none()
    }
}

/// Upload acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    /// Image staged
    Success,
}

/// Result of a successful upload: `{"status": "success", ...manifest}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Always `success`
    pub status: UploadStatus,
    /// Manifest of the newly staged image
    #[serde(flatten)]
    pub manifest: Manifest,
}

/// SHA-256 of a stored image, streamed in [`HASH_READ_BLOCK`] reads
pub async fn digest_stored(
    storage: &dyn FirmwareStorage,
    handle: StorageHandle,
    size_bytes: u64,
) -> FotaResult<String> {
    let mut hasher = Sha256::new();
    let mut offset = 0u64;

    while offset < size_bytes {
        let remaining = size_bytes.saturating_sub(offset);
        let len = usize::try_from(remaining.min(HASH_READ_BLOCK as u64)).unwrap_or(HASH_READ_BLOCK);
        let block = storage.read_at(handle, offset, len).await?;
        hasher.update(&block);
        offset = offset.saturating_add(block.len() as u64);
    }

    let digest = hex::encode(hasher.finalize());
    trace!(%handle, size_bytes, digest = %digest, "Hashed stored firmware");
    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStorage;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn sample_manifest() -> Manifest {
        Manifest {
            version: "1.0.0".to_string(),
            size_bytes: 2500,
            sha256_hex: "ab".repeat(32),
            chunk_size: 1024,
            iv_hex: "00".repeat(16),
            total_chunks: 3,
        }
    }

    #[test]
    fn test_layout_2500_bytes() -> TestResult {
        let layout = ChunkLayout::new(2500, 1024)?;
        assert_eq!(layout.total_chunks(), 3);
        assert_eq!(layout.chunk_range(0), Some((0, 1024)));
        assert_eq!(layout.chunk_range(1), Some((1024, 1024)));
        assert_eq!(layout.chunk_range(2), Some((2048, 452)));
        assert_eq!(layout.chunk_range(3), None);
        Ok(())
    }

    #[test]
    fn test_layout_exact_multiple() -> TestResult {
        let layout = ChunkLayout::new(2048, 1024)?;
        assert_eq!(layout.total_chunks(), 2);
        assert_eq!(layout.chunk_len(1), Some(1024));
        Ok(())
    }

    #[test]
    fn test_layout_rejects_zero_chunk_size() {
        assert!(matches!(
            ChunkLayout::new(10, 0),
            Err(FotaError::Validation(_))
        ));
    }

    #[test]
    fn test_manifest_wire_names() -> TestResult {
        let value = serde_json::to_value(sample_manifest())?;
        assert_eq!(value.get("size"), Some(&serde_json::json!(2500)));
        assert_eq!(value.get("hash"), Some(&serde_json::json!("ab".repeat(32))));
        assert_eq!(value.get("iv"), Some(&serde_json::json!("00".repeat(16))));
        assert!(value.get("size_bytes").is_none());
        Ok(())
    }

    #[test]
    fn test_manifest_response_shapes() -> TestResult {
        let empty = serde_json::to_string(&ManifestResponse::empty())?;
        assert_eq!(empty, r#"{"status":"no_active_firmware"}"#);

        let parsed: ManifestResponse = serde_json::from_str(&empty)?;
        assert!(parsed.is_empty());

        let active = ManifestResponse::Active(sample_manifest());
        let parsed: ManifestResponse = serde_json::from_str(&serde_json::to_string(&active)?)?;
        assert_eq!(parsed.active(), Some(&sample_manifest()));
        Ok(())
    }

    #[test]
    fn test_upload_response_is_flat() -> TestResult {
        let response = UploadResponse {
            status: UploadStatus::Success,
            manifest: sample_manifest(),
        };
        let value = serde_json::to_value(&response)?;
        assert_eq!(value.get("status"), Some(&serde_json::json!("success")));
        assert_eq!(value.get("total_chunks"), Some(&serde_json::json!(3)));
        Ok(())
    }

    #[test]
    fn test_validate_rejects_inconsistent_chunk_count() {
        let mut manifest = sample_manifest();
        manifest.total_chunks = 4;
        assert!(matches!(manifest.validate(), Err(FotaError::Validation(_))));
    }

    #[test]
    fn test_is_update_for_exact_version_only() {
        let manifest = sample_manifest();
        assert!(!manifest.is_update_for("1.0.0"));
        assert!(manifest.is_update_for("1.0"));
        assert!(manifest.is_update_for(""));
    }

    #[test]
    fn test_validate_rejects_bad_iv() {
        let mut manifest = sample_manifest();
        manifest.iv_hex = "zz".to_string();
        assert!(matches!(manifest.validate(), Err(FotaError::Crypto(_))));
    }

    #[tokio::test]
    async fn test_streamed_digest_matches_one_shot() -> TestResult {
        let storage = MemoryStorage::new();
        let content: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let handle = storage.put("1", &content).await?;

        let streamed = digest_stored(&storage, handle, content.len() as u64).await?;
        assert_eq!(streamed, hex::encode(Sha256::digest(&content)));
        Ok(())
    }
}
