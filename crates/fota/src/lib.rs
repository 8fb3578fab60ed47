//! Secure chunked firmware distribution for EcoWatt devices
//!
//! This crate delivers one firmware image at a time to field devices over a
//! constrained link:
//! - A single active slot, replaced atomically on every upload
//! - Manifests carrying size, SHA-256, chunk geometry and the image IV
//! - Chunks encrypted from one logical AES-CTR stream and tagged with
//!   HMAC-SHA256, servable in any order
//! - A device-side assembler that verifies, decrypts and resumes downloads
//!
//! # Architecture
//!
//! - [`store`]: firmware persistence behind the [`FirmwareStorage`] trait
//! - [`manifest`]: manifest and chunk geometry
//! - [`lifecycle`]: the active slot and the service operations
//! - [`device`]: in-order download assembly
//! - [`config`]: JSON configuration
//! - [`error`]: error types
//!
//! # Example
//!
//! ```
//! use ecowatt_fota::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cipher = ChunkCipher::new(&FotaKeys::generate())?;
//! let service = FotaService::new(Arc::new(MemoryStorage::new()), cipher.clone(), 1024)?;
//!
//! let upload = service.upload(&[0x42; 2500], "1.0.0").await?;
//! let mut session = DownloadSession::new(upload.manifest, cipher)?;
//! while !session.is_complete() {
//!     let chunk = service.get_chunk("1.0.0", session.next_chunk()).await?;
//!     session.accept_sealed(&chunk)?;
//! }
//! let image = session.finish()?;
//! assert_eq!(image.len(), 2500);
//!
//! service.boot_ok(&serde_json::json!({ "version": "1.0.0" })).await;
//! assert_eq!(service.state().await, FotaState::Empty);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod device;
pub mod error;
pub mod lifecycle;
pub mod manifest;
pub mod prelude;
pub mod store;

pub use config::{DEFAULT_CHUNK_SIZE, FotaConfig, KeySource, MAX_CHUNK_SIZE, StorageConfig};
pub use device::{DeviceReport, DownloadSession, DownloadState, ReportStatus};
pub use error::{FotaError, FotaResult, NotFoundReason};
pub use lifecycle::{Ack, ActiveFirmware, FotaService, FotaState, FotaStatus, RECENT_IV_HISTORY};
pub use manifest::{
    ChunkLayout, EmptyStatus, HASH_READ_BLOCK, Manifest, ManifestResponse, UploadResponse,
    UploadStatus, digest_stored,
};
pub use store::{FileStorage, FirmwareStorage, MemoryStorage, StorageHandle};
