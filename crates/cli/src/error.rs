//! Error types for fotactl CLI

use ecowatt_fota::FotaError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::NotFound(_) => 2,
            CliError::ValidationError(_)
            | CliError::InvalidConfiguration(_)
            | CliError::JsonError(_) => 3,
            CliError::VerificationFailed(_) => 4,
            CliError::IoError(_) => 1,
        }
    }
}

impl From<FotaError> for CliError {
    fn from(e: FotaError) -> Self {
        if e.is_integrity_failure() {
            return CliError::VerificationFailed(e.to_string());
        }
        match e {
            FotaError::NotFound(reason) => CliError::NotFound(reason.to_string()),
            FotaError::Validation(msg) => CliError::ValidationError(msg),
            FotaError::Config(msg) => CliError::InvalidConfiguration(msg),
            FotaError::Storage(io) => CliError::IoError(io),
            FotaError::Crypto(crypto) => CliError::ValidationError(crypto.to_string()),
            FotaError::SerializationError(msg) => CliError::ValidationError(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecowatt_fota::NotFoundReason;
    use ecowatt_fota_crypto::CryptoError;

    #[test]
    fn fota_errors_map_to_exit_codes() {
        let cases = [
            (FotaError::NotFound(NotFoundReason::NoActiveFirmware), 2),
            (FotaError::Validation("x".to_string()), 3),
            (FotaError::Config("x".to_string()), 3),
            (FotaError::Crypto(CryptoError::MacMismatch { index: 0 }), 4),
            (
                FotaError::Crypto(CryptoError::EncodingError("x".to_string())),
                3,
            ),
            (FotaError::Storage(std::io::Error::other("disk")), 1),
        ];
        for (error, code) in cases {
            let rendered = error.to_string();
            assert_eq!(CliError::from(error).exit_code(), code, "{}", rendered);
        }
    }
}
