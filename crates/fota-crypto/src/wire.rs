//! JSON representation of a sealed chunk
//!
//! ```json
//! {"chunk_number": 2, "iv": "<32 hex>", "data": "<base64>", "mac": "<64 hex>"}
//! ```

use crate::chunk::SealedChunk;
use crate::ctr::Iv;
use crate::error::{CryptoError, CryptoResult};
use crate::mac::MAC_LEN;
use crate::utils;
use serde::{Deserialize, Serialize};

/// Chunk as served to devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkResponse {
    /// Chunk index
    pub chunk_number: u32,
    /// Image IV, lowercase hex
    pub iv: String,
    /// Ciphertext, standard base64 with padding
    pub data: String,
    /// Tag, lowercase hex
    pub mac: String,
}

impl From<&SealedChunk> for ChunkResponse {
    fn from(chunk: &SealedChunk) -> Self {
        Self {
            chunk_number: chunk.index,
            iv: chunk.iv.to_hex(),
            data: utils::encode_base64(&chunk.ciphertext),
            mac: chunk.mac_hex(),
        }
    }
}

impl From<SealedChunk> for ChunkResponse {
    fn from(chunk: SealedChunk) -> Self {
        Self::from(&chunk)
    }
}

impl TryFrom<&ChunkResponse> for SealedChunk {
    type Error = CryptoError;

    /// Decode the text fields. Hex is accepted in either case.
    fn try_from(response: &ChunkResponse) -> CryptoResult<Self> {
        let iv = Iv::from_hex(&response.iv)?;
        let ciphertext = utils::decode_base64(&response.data)?;
        let tag = hex::decode(&response.mac)?;
        if tag.len() != MAC_LEN {
            return Err(CryptoError::InvalidMacLength {
                expected: MAC_LEN,
                actual: tag.len(),
            });
        }
        let mut mac = [0u8; MAC_LEN];
        mac.copy_from_slice(&tag);

        Ok(SealedChunk {
            index: response.chunk_number,
            iv,
            ciphertext,
            mac,
        })
    }
}

impl ChunkResponse {
    /// Serialize to a JSON string
    pub fn to_json(&self) -> CryptoResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from a JSON string
    pub fn from_json(json: &str) -> CryptoResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn sample() -> SealedChunk {
        SealedChunk {
            index: 2,
            iv: Iv::from_bytes([0xAB; 16]),
            ciphertext: vec![1, 2, 3, 4, 5],
            mac: [0xCD; MAC_LEN],
        }
    }

    #[test]
    fn test_response_fields() -> TestResult {
        let response = ChunkResponse::from(&sample());
        assert_eq!(response.chunk_number, 2);
        assert_eq!(response.iv, "ab".repeat(16));
        assert_eq!(response.data, "AQIDBAU=");
        assert_eq!(response.mac, "cd".repeat(32));

        let value: serde_json::Value = serde_json::from_str(&response.to_json()?)?;
        assert_eq!(value.get("chunk_number"), Some(&serde_json::json!(2)));
        Ok(())
    }

    #[test]
    fn test_decode_accepts_uppercase_hex() -> TestResult {
        let mut response = ChunkResponse::from(&sample());
        response.mac = response.mac.to_uppercase();
        response.iv = response.iv.to_uppercase();
        assert_eq!(SealedChunk::try_from(&response)?, sample());
        Ok(())
    }

    #[test]
    fn test_decode_rejects_bad_fields() {
        let mut response = ChunkResponse::from(&sample());
        response.mac = "cd".repeat(16);
        assert!(matches!(
            SealedChunk::try_from(&response),
            Err(CryptoError::InvalidMacLength { .. })
        ));

        let mut response = ChunkResponse::from(&sample());
        response.data = "***".to_string();
        assert!(matches!(
            SealedChunk::try_from(&response),
            Err(CryptoError::EncodingError(_))
        ));

        let mut response = ChunkResponse::from(&sample());
        response.iv = "abcd".to_string();
        assert!(matches!(
            SealedChunk::try_from(&response),
            Err(CryptoError::InvalidIvLength { .. })
        ));
    }
}
