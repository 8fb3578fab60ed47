//! Firmware image persistence
//!
//! Every upload is stored under a fresh [`StorageHandle`]. Handles are never
//! reused, so a published snapshot keeps reading the exact bytes it was built
//! from even if the same version string is uploaded again.

use crate::error::FotaResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Stable reference to one stored upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageHandle(Uuid);

impl StorageHandle {
    /// Allocate a new unique handle
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying identifier
    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl Default for StorageHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StorageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Backend that persists uploaded firmware binaries
#[async_trait]
pub trait FirmwareStorage: Send + Sync {
    /// Persist `content` and return a handle to it
    async fn put(&self, version: &str, content: &[u8]) -> FotaResult<StorageHandle>;

    /// Read `len` bytes starting at `offset`
    ///
    /// Reading past the end of the stored content is an error.
    async fn read_at(&self, handle: StorageHandle, offset: u64, len: usize) -> FotaResult<Vec<u8>>;

    /// Size of the stored content in bytes
    async fn size(&self, handle: StorageHandle) -> FotaResult<u64>;
}

fn unknown_handle(handle: StorageHandle) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("no stored firmware for handle {}", handle),
    )
}

fn out_of_bounds(offset: u64, len: usize, size: usize) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!(
            "read of {} bytes at offset {} exceeds stored size {}",
            len, offset, size
        ),
    )
}

/// In-memory storage
#[derive(Debug, Default)]
pub struct MemoryStorage {
    images: RwLock<HashMap<StorageHandle, Arc<[u8]>>>,
}

impl MemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of uploads held
    pub async fn count(&self) -> usize {
        self.images.read().await.len()
    }

    async fn content(&self, handle: StorageHandle) -> FotaResult<Arc<[u8]>> {
        let images = self.images.read().await;
        images
            .get(&handle)
            .cloned()
            .ok_or_else(|| unknown_handle(handle).into())
    }
}

#[async_trait]
impl FirmwareStorage for MemoryStorage {
    async fn put(&self, version: &str, content: &[u8]) -> FotaResult<StorageHandle> {
        let handle = StorageHandle::new();
        self.images.write().await.insert(handle, Arc::from(content));
        debug!(%handle, version, size = content.len(), "Stored firmware in memory");
        Ok(handle)
    }

    async fn read_at(&self, handle: StorageHandle, offset: u64, len: usize) -> FotaResult<Vec<u8>> {
        let content = self.content(handle).await?;
        let start = usize::try_from(offset).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
        })?;
        let slice = start
            .checked_add(len)
            .and_then(|end| content.get(start..end))
            .ok_or_else(|| out_of_bounds(offset, len, content.len()))?;
        Ok(slice.to_vec())
    }

    async fn size(&self, handle: StorageHandle) -> FotaResult<u64> {
        let content = self.content(handle).await?;
        Ok(content.len() as u64)
    }
}

/// One file per upload inside a directory
///
/// Files are named `<handle>.bin` and written through a `.part` file that
/// is renamed into place. Superseded uploads are left on disk.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Open (creating if needed) a storage directory
    pub async fn new(dir: impl Into<PathBuf>) -> FotaResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        info!(dir = %dir.display(), "Opened firmware storage directory");
        Ok(Self { dir })
    }

    /// Storage directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing a handle
    pub fn path_for(&self, handle: StorageHandle) -> PathBuf {
        self.dir.join(format!("{}.bin", handle))
    }
}

#[async_trait]
impl FirmwareStorage for FileStorage {
    async fn put(&self, version: &str, content: &[u8]) -> FotaResult<StorageHandle> {
        let handle = StorageHandle::new();
        let path = self.path_for(handle);
        let partial = path.with_extension("bin.part");

        tokio::fs::write(&partial, content).await?;
        tokio::fs::rename(&partial, &path).await?;

        debug!(%handle, version, path = %path.display(), size = content.len(), "Stored firmware file");
        Ok(handle)
    }

    async fn read_at(&self, handle: StorageHandle, offset: u64, len: usize) -> FotaResult<Vec<u8>> {
        let path = self.path_for(handle);
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(unknown_handle(handle).into());
            }
            Err(e) => return Err(e.into()),
        };

        file.seek(SeekFrom::Start(offset)).await?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer).await?;
        Ok(buffer)
    }

    async fn size(&self, handle: StorageHandle) -> FotaResult<u64> {
        match tokio::fs::metadata(self.path_for(handle)).await {
            Ok(metadata) => Ok(metadata.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(unknown_handle(handle).into()),
            Err(e) => Err(e.into()),
        }
    }
}
