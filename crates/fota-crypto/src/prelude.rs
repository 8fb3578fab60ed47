//! Prelude for ecowatt-fota-crypto
//!
//! Re-exports the types needed to seal, open and transport chunks.
//!
//! ```
//! use ecowatt_fota_crypto::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let keys = StaticKeyProvider::new(FotaKeys::generate()).load_keys()?;
//! let _cipher = ChunkCipher::new(&keys)?;
//! # Ok(())
//! # }
//! ```

pub use crate::chunk::{ChunkCipher, SealedChunk};
pub use crate::ctr::Iv;
pub use crate::error::{CryptoError, CryptoResult};
pub use crate::keys::{
    EnvKeyProvider, FileKeyProvider, FotaKeys, KeyFile, KeyProvider, StaticKeyProvider,
};
pub use crate::wire::ChunkResponse;
