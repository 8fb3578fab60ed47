//! Error types for the FOTA service

use ecowatt_fota_crypto::CryptoError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a lookup resolved to nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotFoundReason {
    /// No image is staged
    NoActiveFirmware,
    /// The requested version is not the active one
    VersionMismatch,
    /// Chunk index outside `[0, total_chunks)`
    IndexOutOfRange,
}

impl std::fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotFoundReason::NoActiveFirmware => write!(f, "no active firmware"),
            NotFoundReason::VersionMismatch => write!(f, "version is not active"),
            NotFoundReason::IndexOutOfRange => write!(f, "chunk index out of range"),
        }
    }
}

/// Errors that can occur during FOTA operations
#[derive(Error, Debug)]
pub enum FotaError {
    /// Malformed or missing request fields
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Wrong version, out-of-range index, or empty slot
    #[error("Not found: {0}")]
    NotFound(NotFoundReason),

    /// Storage backend failure
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Chunk verification or key handling failure
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Invalid configuration or key material
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl FotaError {
    /// Whether the error is a routine not-found result
    pub fn is_not_found(&self) -> bool {
        matches!(self, FotaError::NotFound(_))
    }

    /// Whether the error came from a failed integrity check on received data
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, FotaError::Crypto(e) if e.is_integrity_failure())
    }
}

impl From<serde_json::Error> for FotaError {
    fn from(e: serde_json::Error) -> Self {
        FotaError::SerializationError(e.to_string())
    }
}

/// Result type for FOTA operations
pub type FotaResult<T> = std::result::Result<T, FotaError>;
