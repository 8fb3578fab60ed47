//! HMAC-SHA256 chunk tags
//!
//! `tag = HMAC-SHA256(mac_key, index_u32_be || iv || ciphertext)`. Binding the
//! index and IV into the tag stops a chunk from being replayed at another
//! position or under another image, even though both keys are shared.

use crate::ctr::Iv;
use crate::error::{CryptoError, CryptoResult};
use crate::keys::MacKey;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Tag length in bytes
pub const MAC_LEN: usize = 32;

/// Keyed chunk authenticator
#[derive(Clone)]
pub struct ChunkAuthenticator {
    keyed: HmacSha256,
}

impl ChunkAuthenticator {
    /// Key the authenticator
    pub fn new(key: &MacKey) -> CryptoResult<Self> {
        let keyed = HmacSha256::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::KeyFormatError(format!("Invalid MAC key: {}", e)))?;
        Ok(Self { keyed })
    }

    fn message(&self, index: u32, iv: &Iv, ciphertext: &[u8]) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(&index.to_be_bytes());
        mac.update(iv.as_bytes());
        mac.update(ciphertext);
        mac
    }

    /// Compute the tag for a chunk
    pub fn tag(&self, index: u32, iv: &Iv, ciphertext: &[u8]) -> [u8; MAC_LEN] {
        let digest = self.message(index, iv, ciphertext).finalize().into_bytes();
        let mut tag = [0u8; MAC_LEN];
        tag.copy_from_slice(&digest);
        tag
    }

    /// Verify a received tag in constant time
    pub fn verify(&self, index: u32, iv: &Iv, ciphertext: &[u8], tag: &[u8]) -> CryptoResult<()> {
        if tag.len() != MAC_LEN {
            return Err(CryptoError::InvalidMacLength {
                expected: MAC_LEN,
                actual: tag.len(),
            });
        }
        if self.message(index, iv, ciphertext).verify_slice(tag).is_err() {
            return Err(CryptoError::MacMismatch { index });
        }
        Ok(())
    }
}

impl std::fmt::Debug for ChunkAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ChunkAuthenticator(HMAC-SHA256)")
    }
}
