//! Chunk encryption and authentication for EcoWatt firmware over the air
//!
//! This crate provides the cryptographic layer shared by the update server
//! and devices:
//! - AES-128-CTR encryption addressable by image byte offset
//! - HMAC-SHA256 tags binding chunk index, IV and ciphertext
//! - Pre-shared key loading from the environment, a key file, or memory
//!
//! # Architecture
//!
//! - [`ctr`]: counter layout and keystream generation
//! - [`mac`]: chunk tags
//! - [`chunk`]: sealing and opening whole chunks, binary frames
//! - [`wire`]: JSON chunk representation served to devices
//! - [`keys`]: key material and providers
//! - [`error`]: error types for cryptographic operations
//!
//! # Security Considerations
//!
//! - Tags are verified in constant time before any byte is decrypted
//! - Key material is zeroized on drop and never printed by `Debug`
//! - IVs come from `OsRng`
//!
//! # Example
//!
//! ```
//! use ecowatt_fota_crypto::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cipher = ChunkCipher::new(&FotaKeys::generate())?;
//! let iv = Iv::generate();
//!
//! let sealed = cipher.seal(&iv, 0, 1024, b"firmware bytes");
//! let plaintext = cipher.open(&sealed, 1024)?;
//! assert_eq!(plaintext, b"firmware bytes");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod chunk;
pub mod ctr;
pub mod error;
pub mod keys;
pub mod mac;
pub mod prelude;
pub mod wire;

pub use chunk::{ChunkCipher, FRAME_HEADER_LEN, SealedChunk};
pub use ctr::{BLOCK_SIZE, IV_LEN, Iv, Keystream, block_offset, chunk_byte_offset};
pub use error::{CryptoError, CryptoResult};
pub use keys::{
    EncryptionKey, EnvKeyProvider, FileKeyProvider, FotaKeys, KeyFile, KeyProvider, MacKey,
    StaticKeyProvider,
};
pub use mac::{ChunkAuthenticator, MAC_LEN};
pub use wire::ChunkResponse;

/// Encoding and hashing helpers
pub mod utils {
    use crate::error::CryptoError;
    use sha2::{Digest, Sha256};

    /// Compute SHA256 hash of data and return as hex string
    pub fn compute_sha256_hex(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Compare two hex digests ignoring case
    pub fn digest_eq(a: &str, b: &str) -> bool {
        a.eq_ignore_ascii_case(b)
    }

    /// Encode bytes as base64 (Standard alphabet with padding)
    pub fn encode_base64(data: &[u8]) -> String {
        use base64::{Engine as _, engine::general_purpose::STANDARD};
        STANDARD.encode(data)
    }

    /// Decode base64 to bytes
    pub fn decode_base64(data: &str) -> Result<Vec<u8>, CryptoError> {
        use base64::{Engine as _, engine::general_purpose::STANDARD};
        STANDARD.decode(data).map_err(CryptoError::from)
    }

}
