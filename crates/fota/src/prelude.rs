//! Prelude for ecowatt-fota
//!
//! This module re-exports the most commonly used types and traits for convenience.

pub use crate::config::{FotaConfig, KeySource, StorageConfig};
pub use crate::device::{DeviceReport, DownloadSession, DownloadState, ReportStatus};
pub use crate::error::{FotaError, FotaResult, NotFoundReason};
pub use crate::lifecycle::{Ack, ActiveFirmware, FotaService, FotaState, FotaStatus};
pub use crate::manifest::{ChunkLayout, Manifest, ManifestResponse, UploadResponse};
pub use crate::store::{FileStorage, FirmwareStorage, MemoryStorage, StorageHandle};

pub use ecowatt_fota_crypto::prelude::*;
