//! Sealing and opening of individual firmware chunks
//!
//! A sealed chunk is the ciphertext of one chunk-sized slice of the image
//! plus its tag. Sealing is deterministic for a fixed `(keys, iv, index,
//! chunk_size, plaintext)`.

use crate::ctr::{BLOCK_SIZE, IV_LEN, Iv, Keystream, chunk_byte_offset};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::FotaKeys;
use crate::mac::{ChunkAuthenticator, MAC_LEN};
use tracing::trace;

/// Fixed part of a binary chunk frame: index, IV, tag, ciphertext length
pub const FRAME_HEADER_LEN: usize = 4 + IV_LEN + MAC_LEN + 4;

/// One encrypted, authenticated chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedChunk {
    /// Chunk index within the image
    pub index: u32,
    /// Image IV (identical for every chunk of one image)
    pub iv: Iv,
    /// Encrypted chunk bytes
    pub ciphertext: Vec<u8>,
    /// HMAC-SHA256 over `index || iv || ciphertext`
    pub mac: [u8; MAC_LEN],
}

impl SealedChunk {
    /// Hex encoding of the tag
    pub fn mac_hex(&self) -> String {
        hex::encode(self.mac)
    }

    /// Encode as a compact binary frame
    ///
    /// Format: \[index u32 BE (4)\]\[iv (16)\]\[mac (32)\]\[len u32 BE (4)\]\[ciphertext\]
    pub fn to_frame(&self) -> CryptoResult<Vec<u8>> {
        let len = u32::try_from(self.ciphertext.len()).map_err(|e| {
            CryptoError::InvalidFrame(format!("ciphertext too large for frame: {}", e))
        })?;
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + self.ciphertext.len());
        frame.extend_from_slice(&self.index.to_be_bytes());
        frame.extend_from_slice(self.iv.as_bytes());
        frame.extend_from_slice(&self.mac);
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&self.ciphertext);
        Ok(frame)
    }

    /// Decode a binary frame produced by [`SealedChunk::to_frame`]
    ///
    /// Rejects short input, a length field that disagrees with the payload,
    /// and trailing bytes.
    pub fn from_frame(frame: &[u8]) -> CryptoResult<Self> {
        if frame.len() < FRAME_HEADER_LEN {
            return Err(CryptoError::InvalidFrame(format!(
                "frame too short: {} bytes, header needs {}",
                frame.len(),
                FRAME_HEADER_LEN
            )));
        }

        let (index, rest) = split_array::<4>(frame)?;
        let (iv, rest) = split_array::<IV_LEN>(rest)?;
        let (mac, rest) = split_array::<MAC_LEN>(rest)?;
        let (len, payload) = split_array::<4>(rest)?;

        let declared = u32::from_be_bytes(len) as usize;
        if declared != payload.len() {
            return Err(CryptoError::InvalidFrame(format!(
                "length field says {} bytes, frame carries {}",
                declared,
                payload.len()
            )));
        }

        Ok(Self {
            index: u32::from_be_bytes(index),
            iv: Iv::from_bytes(iv),
            ciphertext: payload.to_vec(),
            mac,
        })
    }
}

fn split_array<const N: usize>(bytes: &[u8]) -> CryptoResult<([u8; N], &[u8])> {
    if bytes.len() < N {
        return Err(CryptoError::InvalidFrame("truncated frame".to_string()));
    }
    let (head, tail) = bytes.split_at(N);
    let mut out = [0u8; N];
    out.copy_from_slice(head);
    Ok((out, tail))
}

/// Chunk encryptor and verifier keyed with the pre-shared keys
#[derive(Debug, Clone)]
pub struct ChunkCipher {
    keystream: Keystream,
    authenticator: ChunkAuthenticator,
}

impl ChunkCipher {
    /// Key a cipher with the pre-shared key pair
    pub fn new(keys: &FotaKeys) -> CryptoResult<Self> {
        Ok(Self {
            keystream: Keystream::new(&keys.enc_key),
            authenticator: ChunkAuthenticator::new(&keys.mac_key)?,
        })
    }

    /// Encrypt and tag one chunk
    ///
    /// The keystream is positioned at image byte `index * chunk_size`, i.e.
    /// counter block `index * chunk_size / 16`.
    pub fn seal(&self, iv: &Iv, index: u32, chunk_size: u32, plaintext: &[u8]) -> SealedChunk {
        let offset = chunk_byte_offset(index, chunk_size);
        let mut ciphertext = plaintext.to_vec();
        self.keystream.apply(iv, offset, &mut ciphertext);
        let mac = self.authenticator.tag(index, iv, &ciphertext);

        trace!(
            index,
            block_offset = offset / BLOCK_SIZE as u64,
            len = ciphertext.len(),
            "Sealed chunk"
        );

        SealedChunk {
            index,
            iv: *iv,
            ciphertext,
            mac,
        }
    }

    /// Verify the tag, then decrypt
    ///
    /// Nothing is decrypted unless the tag over `(index, iv, ciphertext)`
    /// verifies.
    pub fn open(&self, chunk: &SealedChunk, chunk_size: u32) -> CryptoResult<Vec<u8>> {
        self.authenticator
            .verify(chunk.index, &chunk.iv, &chunk.ciphertext, &chunk.mac)?;

        let mut plaintext = chunk.ciphertext.clone();
        self.keystream.apply(
            &chunk.iv,
            chunk_byte_offset(chunk.index, chunk_size),
            &mut plaintext,
        );
        Ok(plaintext)
    }

    /// Verify a chunk's tag without decrypting it
    pub fn verify(&self, chunk: &SealedChunk) -> CryptoResult<()> {
        self.authenticator
            .verify(chunk.index, &chunk.iv, &chunk.ciphertext, &chunk.mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{EncryptionKey, MacKey};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn cipher() -> CryptoResult<ChunkCipher> {
        ChunkCipher::new(&FotaKeys::new(
            EncryptionKey::from_bytes([0x11; 16]),
            MacKey::from_bytes([0x22; 32]),
        ))
    }

    #[test]
    fn test_seal_open_roundtrip() -> TestResult {
        let cipher = cipher()?;
        let iv = Iv::generate();
        let plaintext = vec![0x5Au8; 452];

        let sealed = cipher.seal(&iv, 2, 1024, &plaintext);
        assert_ne!(sealed.ciphertext, plaintext);
        assert_eq!(cipher.open(&sealed, 1024)?, plaintext);
        Ok(())
    }

    #[test]
    fn test_open_fails_closed_on_tampered_ciphertext() -> TestResult {
        let cipher = cipher()?;
        let iv = Iv::generate();
        let mut sealed = cipher.seal(&iv, 0, 64, &[1u8; 64]);
        if let Some(byte) = sealed.ciphertext.first_mut() {
            *byte ^= 0x01;
        }
        assert!(matches!(
            cipher.open(&sealed, 64),
            Err(CryptoError::MacMismatch { index: 0 })
        ));
        Ok(())
    }

    #[test]
    fn test_frame_roundtrip() -> TestResult {
        let cipher = cipher()?;
        let sealed = cipher.seal(&Iv::generate(), 9, 32, b"frame me please");
        let frame = sealed.to_frame()?;
        assert_eq!(frame.len(), FRAME_HEADER_LEN + 15);
        assert_eq!(SealedChunk::from_frame(&frame)?, sealed);
        Ok(())
    }

    #[test]
    fn test_frame_rejects_truncation_and_trailing_bytes() -> TestResult {
        let cipher = cipher()?;
        let sealed = cipher.seal(&Iv::generate(), 1, 32, b"payload");
        let frame = sealed.to_frame()?;

        let short = frame.get(..FRAME_HEADER_LEN - 1).unwrap_or_default();
        assert!(matches!(
            SealedChunk::from_frame(short),
            Err(CryptoError::InvalidFrame(_))
        ));

        let cut = frame.get(..frame.len() - 1).unwrap_or_default();
        assert!(matches!(
            SealedChunk::from_frame(cut),
            Err(CryptoError::InvalidFrame(_))
        ));

        let mut long = frame.clone();
        long.push(0);
        assert!(matches!(
            SealedChunk::from_frame(&long),
            Err(CryptoError::InvalidFrame(_))
        ));
        Ok(())
    }
}
