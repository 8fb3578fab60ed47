//! AES-128 counter-mode keystream addressable by image byte offset
//!
//! An image is encrypted as one continuous CTR stream, but chunks are
//! requested independently. The keystream block covering image byte `k` is
//! always block `k / 16`, so any chunk can be produced on its own by seeking
//! the counter to the chunk's first block.
//!
//! Counter layout: the 16-byte IV is the initial counter block. The upper 12
//! bytes are a fixed nonce; the lower 4 bytes are a big-endian integer that
//! is advanced modulo 2^32. Carries never propagate into the nonce.

use crate::error::{CryptoError, CryptoResult};
use crate::keys::EncryptionKey;
use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// Cipher block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// IV length in bytes
pub const IV_LEN: usize = 16;

/// Bytes of the counter block that never change
pub const NONCE_LEN: usize = 12;

const BLOCK_SIZE_U64: u64 = BLOCK_SIZE as u64;

/// Per-image initialization vector, used as the initial counter block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Iv([u8; IV_LEN]);

impl Iv {
    /// Create an IV from raw bytes
    pub fn from_bytes(bytes: [u8; IV_LEN]) -> Self {
        Self(bytes)
    }

    /// Generate a uniformly random IV using `OsRng`
    pub fn generate() -> Self {
        let mut bytes = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parse an IV from 32 hex characters
    pub fn from_hex(encoded: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(encoded)?;
        Self::from_slice(&bytes)
    }

    /// Parse an IV from a byte slice
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != IV_LEN {
            return Err(CryptoError::InvalidIvLength {
                expected: IV_LEN,
                actual: bytes.len(),
            });
        }
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(bytes);
        Ok(Self(iv))
    }

    /// Lowercase hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw IV bytes
    pub fn as_bytes(&self) -> &[u8; IV_LEN] {
        &self.0
    }
}

impl std::fmt::Display for Iv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Iv {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Iv {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Iv::from_hex(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Index of the keystream block that covers the first byte of a chunk
pub fn block_offset(index: u32, chunk_size: u32) -> u64 {
    chunk_byte_offset(index, chunk_size) / BLOCK_SIZE_U64
}

/// Image byte offset of the first byte of a chunk
pub fn chunk_byte_offset(index: u32, chunk_size: u32) -> u64 {
    u64::from(index) * u64::from(chunk_size)
}

/// Counter block for the given keystream block index
///
/// Only the low 32 bits of `block` matter: the counter tail wraps mod 2^32.
pub fn counter_block(iv: &Iv, block: u64) -> [u8; BLOCK_SIZE] {
    let mut counter = *iv.as_bytes();
    // truncation is the mod 2^32 reduction on the counter tail
    advance_counter(&mut counter, block as u32);
    counter
}

fn advance_counter(counter: &mut [u8; BLOCK_SIZE], blocks: u32) {
    let (_, tail) = counter.split_at_mut(NONCE_LEN);
    let mut be = [0u8; BLOCK_SIZE - NONCE_LEN];
    be.copy_from_slice(tail);
    let next = u32::from_be_bytes(be).wrapping_add(blocks);
    tail.copy_from_slice(&next.to_be_bytes());
}

/// AES-128 keystream generator
#[derive(Clone)]
pub struct Keystream {
    cipher: Aes128,
}

impl Keystream {
    /// Key the block cipher
    pub fn new(key: &EncryptionKey) -> Self {
        let key = GenericArray::from(*key.as_bytes());
        Self {
            cipher: Aes128::new(&key),
        }
    }

    /// Keystream block for one counter value (single-block ECB encryption)
    pub fn block(&self, counter: &[u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
        let mut block = GenericArray::from(*counter);
        self.cipher.encrypt_block(&mut block);
        let mut keystream = [0u8; BLOCK_SIZE];
        keystream.copy_from_slice(&block);
        keystream
    }

    /// XOR `data` in place with the keystream starting at image byte `byte_offset`
    ///
    /// Encryption and decryption are the same operation.
    pub fn apply(&self, iv: &Iv, byte_offset: u64, data: &mut [u8]) {
        let mut counter = counter_block(iv, byte_offset / BLOCK_SIZE_U64);
        let skip = (byte_offset % BLOCK_SIZE_U64) as usize;

        let head_len = data.len().min(BLOCK_SIZE - skip);
        let (head, rest) = data.split_at_mut(head_len);
        if !head.is_empty() {
            let keystream = self.block(&counter);
            xor_in_place(head, keystream.iter().skip(skip));
            advance_counter(&mut counter, 1);
        }

        for block in rest.chunks_mut(BLOCK_SIZE) {
            let keystream = self.block(&counter);
            xor_in_place(block, keystream.iter());
            advance_counter(&mut counter, 1);
        }
    }
}

impl std::fmt::Debug for Keystream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Keystream(AES-128)")
    }
}

fn xor_in_place<'a>(data: &mut [u8], keystream: impl Iterator<Item = &'a u8>) {
    for (byte, key) in data.iter_mut().zip(keystream) {
        *byte ^= key;
    }
}
