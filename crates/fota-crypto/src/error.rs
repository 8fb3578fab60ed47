//! Error types for chunk encryption and authentication

#![deny(clippy::unwrap_used)]

use thiserror::Error;

/// Cryptographic operation errors
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Invalid key length
    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid IV length
    #[error("Invalid IV length: expected {expected} bytes, got {actual}")]
    InvalidIvLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid MAC length
    #[error("Invalid MAC length: expected {expected} bytes, got {actual}")]
    InvalidMacLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Key material could not be parsed or located
    #[error("Key format error: {0}")]
    KeyFormatError(String),

    /// Authentication tag did not match the received chunk
    #[error("MAC verification failed for chunk {index}")]
    MacMismatch {
        /// Chunk index the tag was checked against
        index: u32,
    },

    /// Chunk IV differs from the IV announced in the manifest
    #[error("IV mismatch for chunk {index}")]
    IvMismatch {
        /// Chunk index carrying the unexpected IV
        index: u32,
    },

    /// Chunk arrived out of the expected sequence
    #[error("Chunk number mismatch: expected {expected}, got {actual}")]
    ChunkNumberMismatch {
        /// Chunk number the receiver was waiting for
        expected: u32,
        /// Chunk number actually received
        actual: u32,
    },

    /// Decrypted chunk has the wrong length for its position
    #[error("Unexpected length for chunk {index}: expected {expected} bytes, got {actual}")]
    UnexpectedChunkLength {
        /// Chunk index
        index: u32,
        /// Length implied by the manifest
        expected: usize,
        /// Length received
        actual: usize,
    },

    /// Digest of the assembled image differs from the manifest hash
    #[error("SHA-256 mismatch: expected {expected}, computed {actual}")]
    DigestMismatch {
        /// Hash announced in the manifest
        expected: String,
        /// Hash of the assembled plaintext
        actual: String,
    },

    /// Binary chunk frame is malformed
    #[error("Invalid chunk frame: {0}")]
    InvalidFrame(String),

    /// Hex or base64 payload could not be decoded
    #[error("Encoding error: {0}")]
    EncodingError(String),

    /// I/O error
    #[error("File I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl CryptoError {
    /// Whether this error means received data failed an integrity check
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            CryptoError::MacMismatch { .. }
                | CryptoError::IvMismatch { .. }
                | CryptoError::ChunkNumberMismatch { .. }
                | CryptoError::UnexpectedChunkLength { .. }
                | CryptoError::DigestMismatch { .. }
        )
    }
}

impl From<serde_json::Error> for CryptoError {
    fn from(e: serde_json::Error) -> Self {
        CryptoError::SerializationError(e.to_string())
    }
}

impl From<base64::DecodeError> for CryptoError {
    fn from(e: base64::DecodeError) -> Self {
        CryptoError::EncodingError(format!("Base64 decode error: {}", e))
    }
}

impl From<hex::FromHexError> for CryptoError {
    fn from(e: hex::FromHexError) -> Self {
        CryptoError::EncodingError(format!("Hex decode error: {}", e))
    }
}

/// Result type for cryptographic operations
pub type CryptoResult<T> = std::result::Result<T, CryptoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CryptoError::MacMismatch { index: 7 };
        assert_eq!(err.to_string(), "MAC verification failed for chunk 7");

        let err = CryptoError::InvalidKeyLength {
            expected: 16,
            actual: 15,
        };
        assert!(err.to_string().contains("16"));
        assert!(err.to_string().contains("15"));
    }

    #[test]
    fn test_integrity_classification() {
        assert!(CryptoError::MacMismatch { index: 0 }.is_integrity_failure());
        assert!(
            CryptoError::DigestMismatch {
                expected: "a".to_string(),
                actual: "b".to_string(),
            }
            .is_integrity_failure()
        );
        assert!(!CryptoError::KeyFormatError("bad".to_string()).is_integrity_failure());
    }

    #[test]
    fn test_error_from_hex() {
        let hex_result = hex::decode("zz");
        match hex_result {
            Err(hex_err) => {
                let crypto_err: CryptoError = hex_err.into();
                assert!(matches!(crypto_err, CryptoError::EncodingError(_)));
            }
            Ok(_) => panic!("Expected error"),
        }
    }
}
