//! Device-side download assembly
//!
//! A [`DownloadSession`] consumes chunks strictly in order, verifying each
//! one before decrypting, and checks the whole-image digest at the end.
//! Its progress can be persisted as a [`DownloadState`] and resumed after a
//! reboot.

use crate::error::{FotaError, FotaResult};
use crate::manifest::{ChunkLayout, Manifest};
use ecowatt_fota_crypto::utils::digest_eq;
use ecowatt_fota_crypto::{ChunkCipher, ChunkResponse, CryptoError, Iv, SealedChunk};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

/// Persistable download progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadState {
    /// Version being downloaded
    pub target: String,
    /// Next chunk index expected
    pub next: u32,
    /// Total chunks in the image
    pub total: u32,
    /// Image size in bytes
    pub size: u64,
    /// Chunk size in bytes
    pub chunk: u32,
    /// Expected SHA-256, hex
    pub hash: String,
    /// Image IV, hex
    pub iv: String,
}

/// Device report status values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// A chunk verified and was written
    ChunkOk,
    /// The assembled image failed the digest check
    ShaFail,
    /// The image is complete and verified
    Done,
}

/// Payload a device sends to `report`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceReport {
    /// Reporting device
    pub device_id: String,
    /// What happened
    pub status: ReportStatus,
    /// Chunk the status refers to
    pub chunk: u32,
    /// Version being downloaded
    pub version: String,
}

/// In-order chunk assembler for one manifest
#[derive(Debug)]
pub struct DownloadSession {
    manifest: Manifest,
    layout: ChunkLayout,
    iv: Iv,
    cipher: ChunkCipher,
    next: u32,
    hasher: Sha256,
    image: Vec<u8>,
}

impl DownloadSession {
    /// Start a download, validating the manifest first
    pub fn new(manifest: Manifest, cipher: ChunkCipher) -> FotaResult<Self> {
        manifest.validate()?;
        let layout = manifest.layout()?;
        let iv = manifest.iv()?;
        let capacity = usize::try_from(layout.size_bytes()).unwrap_or_default();
        info!(
            version = %manifest.version,
            size = layout.size_bytes(),
            total_chunks = layout.total_chunks(),
            "Starting firmware download"
        );
        Ok(Self {
            manifest,
            layout,
            iv,
            cipher,
            next: 0,
            hasher: Sha256::new(),
            image: Vec::with_capacity(capacity),
        })
    }

    /// Start a download only when the manifest differs from the running version
    ///
    /// Returns `None` when the device is already up to date.
    pub fn for_update(
        manifest: Manifest,
        cipher: ChunkCipher,
        current_version: &str,
    ) -> FotaResult<Option<Self>> {
        if !manifest.is_update_for(current_version) {
            info!(version = %manifest.version, "Firmware up to date, skipping download");
            return Ok(None);
        }
        Self::new(manifest, cipher).map(Some)
    }

    /// Rebuild a session from persisted progress and the bytes already written
    pub fn resume(
        manifest: Manifest,
        cipher: ChunkCipher,
        state: &DownloadState,
        received: Vec<u8>,
    ) -> FotaResult<Self> {
        let mut session = Self::new(manifest, cipher)?;

        if state.target != session.manifest.version
            || state.total != session.layout.total_chunks()
            || state.size != session.layout.size_bytes()
            || state.chunk != session.layout.chunk_size()
            || !digest_eq(&state.hash, &session.manifest.sha256_hex)
            || !digest_eq(&state.iv, &session.manifest.iv_hex)
        {
            return Err(FotaError::Validation(
                "saved download state does not match the manifest".to_string(),
            ));
        }
        if state.next > state.total {
            return Err(FotaError::Validation(format!(
                "saved next chunk {} exceeds total {}",
                state.next, state.total
            )));
        }

        let expected_len = session
            .layout
            .chunk_range(state.next)
            .map_or(session.layout.size_bytes(), |(offset, _)| offset);
        if received.len() as u64 != expected_len {
            return Err(FotaError::Validation(format!(
                "resume needs {} bytes already written, got {}",
                expected_len,
                received.len()
            )));
        }

        session.hasher.update(&received);
        session.image = received;
        session.next = state.next;
        debug!(version = %state.target, next = state.next, "Resumed firmware download");
        Ok(session)
    }

    /// Manifest being downloaded
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Index of the next chunk to fetch
    pub fn next_chunk(&self) -> u32 {
        self.next
    }

    /// Whether every chunk has been accepted
    pub fn is_complete(&self) -> bool {
        self.next >= self.layout.total_chunks()
    }

    /// Accept the next chunk in JSON form
    pub fn accept(&mut self, response: &ChunkResponse) -> FotaResult<u32> {
        if response.chunk_number != self.next {
            return Err(self.out_of_sequence(response.chunk_number));
        }
        let sealed = SealedChunk::try_from(response)?;
        self.accept_sealed(&sealed)
    }

    /// Accept the next chunk
    ///
    /// Checks, in order: chunk number, IV, tag, plaintext length. The
    /// session is unchanged when any check fails.
    pub fn accept_sealed(&mut self, chunk: &SealedChunk) -> FotaResult<u32> {
        if chunk.index != self.next || self.is_complete() {
            return Err(self.out_of_sequence(chunk.index));
        }
        if chunk.iv != self.iv {
            warn!(index = chunk.index, "Chunk IV differs from manifest");
            return Err(CryptoError::IvMismatch { index: chunk.index }.into());
        }

        let plaintext = self
            .cipher
            .open(chunk, self.layout.chunk_size())
            .inspect_err(|e| warn!(index = chunk.index, error = %e, "Chunk failed verification"))?;

        let expected = self.layout.chunk_len(chunk.index).unwrap_or_default();
        if plaintext.len() != expected {
            return Err(CryptoError::UnexpectedChunkLength {
                index: chunk.index,
                expected,
                actual: plaintext.len(),
            }
            .into());
        }

        self.hasher.update(&plaintext);
        self.image.extend_from_slice(&plaintext);
        self.next = self.next.saturating_add(1);
        debug!(index = chunk.index, len = plaintext.len(), "Chunk accepted");
        Ok(chunk.index)
    }

    fn out_of_sequence(&self, actual: u32) -> FotaError {
        debug!(expected = self.next, actual, "Chunk out of sequence");
        CryptoError::ChunkNumberMismatch {
            expected: self.next,
            actual,
        }
        .into()
    }

    /// Persistable progress
    pub fn progress(&self) -> DownloadState {
        DownloadState {
            target: self.manifest.version.clone(),
            next: self.next,
            total: self.layout.total_chunks(),
            size: self.layout.size_bytes(),
            chunk: self.layout.chunk_size(),
            hash: self.manifest.sha256_hex.clone(),
            iv: self.manifest.iv_hex.clone(),
        }
    }

    /// Plaintext accepted so far
    pub fn received(&self) -> &[u8] {
        &self.image
    }

    /// Finish the download, returning the verified image
    pub fn finish(self) -> FotaResult<Vec<u8>> {
        if !self.is_complete() {
            return Err(FotaError::Validation(format!(
                "download incomplete: {} of {} chunks",
                self.next,
                self.layout.total_chunks()
            )));
        }

        let actual = hex::encode(self.hasher.finalize());
        if !digest_eq(&actual, &self.manifest.sha256_hex) {
            warn!(expected = %self.manifest.sha256_hex, actual = %actual, "Firmware digest mismatch");
            return Err(CryptoError::DigestMismatch {
                expected: self.manifest.sha256_hex,
                actual,
            }
            .into());
        }

        info!(version = %self.manifest.version, size = self.image.len(), "Firmware download verified");
        Ok(self.image)
    }

    /// Report payload for this download
    pub fn report(&self, device_id: &str, status: ReportStatus, chunk: u32) -> DeviceReport {
        DeviceReport {
            device_id: device_id.to_string(),
            status,
            chunk,
            version: self.manifest.version.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecowatt_fota_crypto::FotaKeys;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    struct Fixture {
        cipher: ChunkCipher,
        iv: Iv,
        image: Vec<u8>,
        manifest: Manifest,
    }

    fn fixture() -> Result<Fixture, Box<dyn std::error::Error>> {
        let cipher = ChunkCipher::new(&FotaKeys::generate())?;
        let iv = Iv::generate();
        let image: Vec<u8> = (0..100u8).collect();
        let manifest = Manifest {
            version: "1.2".to_string(),
            size_bytes: 100,
            sha256_hex: hex::encode(Sha256::digest(&image)),
            chunk_size: 32,
            iv_hex: iv.to_hex(),
            total_chunks: 4,
        };
        Ok(Fixture {
            cipher,
            iv,
            image,
            manifest,
        })
    }

    impl Fixture {
        fn chunk(&self, index: u32) -> SealedChunk {
            let start = index as usize * 32;
            let end = (start + 32).min(self.image.len());
            let piece = self.image.get(start..end).unwrap_or_default();
            self.cipher.seal(&self.iv, index, 32, piece)
        }
    }

    #[test]
    fn test_in_order_download() -> TestResult {
        let fx = fixture()?;
        let mut session = DownloadSession::new(fx.manifest.clone(), fx.cipher.clone())?;
        for index in 0..4 {
            session.accept(&ChunkResponse::from(&fx.chunk(index)))?;
        }
        assert!(session.is_complete());
        assert_eq!(session.finish()?, fx.image);
        Ok(())
    }

    #[test]
    fn test_for_update_skips_running_version() -> TestResult {
        let fx = fixture()?;
        let skipped = DownloadSession::for_update(fx.manifest.clone(), fx.cipher.clone(), "1.2")?;
        assert!(skipped.is_none());

        let mut session = DownloadSession::for_update(fx.manifest.clone(), fx.cipher.clone(), "1.1")?
            .ok_or("expected a download for an older running version")?;
        for index in 0..4 {
            session.accept_sealed(&fx.chunk(index))?;
        }
        assert_eq!(session.finish()?, fx.image);
        Ok(())
    }

    #[test]
    fn test_out_of_order_chunk_rejected() -> TestResult {
        let fx = fixture()?;
        let mut session = DownloadSession::new(fx.manifest.clone(), fx.cipher.clone())?;
        let result = session.accept_sealed(&fx.chunk(1));
        assert!(matches!(
            result,
            Err(FotaError::Crypto(CryptoError::ChunkNumberMismatch {
                expected: 0,
                actual: 1
            }))
        ));
        assert_eq!(session.next_chunk(), 0);
        Ok(())
    }

    #[test]
    fn test_foreign_iv_rejected() -> TestResult {
        let fx = fixture()?;
        let mut session = DownloadSession::new(fx.manifest.clone(), fx.cipher.clone())?;
        let other = fx.cipher.seal(&Iv::generate(), 0, 32, &[0u8; 32]);
        assert!(matches!(
            session.accept_sealed(&other),
            Err(FotaError::Crypto(CryptoError::IvMismatch { index: 0 }))
        ));
        Ok(())
    }

    #[test]
    fn test_truncated_chunk_rejected_after_mac() -> TestResult {
        let fx = fixture()?;
        let mut session = DownloadSession::new(fx.manifest.clone(), fx.cipher.clone())?;
        let short = fx.cipher.seal(&fx.iv, 0, 32, &[0u8; 10]);
        assert!(matches!(
            session.accept_sealed(&short),
            Err(FotaError::Crypto(CryptoError::UnexpectedChunkLength {
                index: 0,
                expected: 32,
                actual: 10
            }))
        ));
        Ok(())
    }

    #[test]
    fn test_digest_mismatch_on_finish() -> TestResult {
        let fx = fixture()?;
        let mut manifest = fx.manifest.clone();
        manifest.sha256_hex = "00".repeat(32);
        let mut session = DownloadSession::new(manifest, fx.cipher.clone())?;
        for index in 0..4 {
            session.accept_sealed(&fx.chunk(index))?;
        }
        assert!(matches!(
            session.finish(),
            Err(FotaError::Crypto(CryptoError::DigestMismatch { .. }))
        ));
        Ok(())
    }

    #[test]
    fn test_uppercase_manifest_hash_accepted() -> TestResult {
        let fx = fixture()?;
        let mut manifest = fx.manifest.clone();
        manifest.sha256_hex = manifest.sha256_hex.to_uppercase();
        let mut session = DownloadSession::new(manifest, fx.cipher.clone())?;
        for index in 0..4 {
            session.accept_sealed(&fx.chunk(index))?;
        }
        assert_eq!(session.finish()?, fx.image);
        Ok(())
    }

    #[test]
    fn test_finish_incomplete_fails() -> TestResult {
        let fx = fixture()?;
        let mut session = DownloadSession::new(fx.manifest.clone(), fx.cipher.clone())?;
        session.accept_sealed(&fx.chunk(0))?;
        assert!(matches!(session.finish(), Err(FotaError::Validation(_))));
        Ok(())
    }

    #[test]
    fn test_resume_continues_download() -> TestResult {
        let fx = fixture()?;
        let mut session = DownloadSession::new(fx.manifest.clone(), fx.cipher.clone())?;
        session.accept_sealed(&fx.chunk(0))?;
        session.accept_sealed(&fx.chunk(1))?;

        let saved = serde_json::to_string(&session.progress())?;
        let state: DownloadState = serde_json::from_str(&saved)?;
        let written = session.received().to_vec();

        let mut resumed =
            DownloadSession::resume(fx.manifest.clone(), fx.cipher.clone(), &state, written)?;
        assert_eq!(resumed.next_chunk(), 2);
        resumed.accept_sealed(&fx.chunk(2))?;
        resumed.accept_sealed(&fx.chunk(3))?;
        assert_eq!(resumed.finish()?, fx.image);
        Ok(())
    }

    #[test]
    fn test_resume_rejects_wrong_byte_count() -> TestResult {
        let fx = fixture()?;
        let mut session = DownloadSession::new(fx.manifest.clone(), fx.cipher.clone())?;
        session.accept_sealed(&fx.chunk(0))?;
        let state = session.progress();

        let result = DownloadSession::resume(fx.manifest.clone(), fx.cipher.clone(), &state, vec![0u8; 5]);
        assert!(matches!(result, Err(FotaError::Validation(_))));
        Ok(())
    }

    #[test]
    fn test_report_payload_shape() -> TestResult {
        let fx = fixture()?;
        let session = DownloadSession::new(fx.manifest.clone(), fx.cipher.clone())?;
        let report = session.report("EcoWatt-7", ReportStatus::ShaFail, 4);
        let value = serde_json::to_value(&report)?;
        assert_eq!(
            value,
            serde_json::json!({
                "device_id": "EcoWatt-7",
                "status": "sha_fail",
                "chunk": 4,
                "version": "1.2"
            })
        );
        Ok(())
    }
}
