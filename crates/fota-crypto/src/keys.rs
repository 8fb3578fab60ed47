//! Pre-shared key material and key provisioning
//!
//! The encryption key (AES-128) and the MAC key (HMAC-SHA256) are shared with
//! devices out of band. This module never derives them from request data and
//! never rotates them; it only loads them from a provider.
//!
//! Key bytes are zeroized on drop and compared in constant time.

use crate::error::{CryptoError, CryptoResult};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use subtle::ConstantTimeEq;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AES-128 key length in bytes
pub const ENC_KEY_LEN: usize = 16;

/// HMAC-SHA256 key length in bytes
pub const MAC_KEY_LEN: usize = 32;

/// Default environment variable holding the hex encryption key
pub const DEFAULT_ENC_KEY_VAR: &str = "FOTA_ENC_KEY";

/// Default environment variable holding the hex MAC key
pub const DEFAULT_MAC_KEY_VAR: &str = "FOTA_MAC_KEY";

/// Permission bits of a saved key file on Unix
#[cfg(unix)]
pub const KEY_FILE_MODE: u32 = 0o600;

/// AES-128 chunk encryption key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; ENC_KEY_LEN]);

impl EncryptionKey {
    /// Create a key from raw bytes
    pub fn from_bytes(bytes: [u8; ENC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; ENC_KEY_LEN] {
        &self.0
    }
}

impl PartialEq for EncryptionKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for EncryptionKey {}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// HMAC-SHA256 chunk authentication key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MacKey([u8; MAC_KEY_LEN]);

impl MacKey {
    /// Create a key from raw bytes
    pub fn from_bytes(bytes: [u8; MAC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; MAC_KEY_LEN] {
        &self.0
    }
}

impl PartialEq for MacKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for MacKey {}

impl std::fmt::Debug for MacKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MacKey(<redacted>)")
    }
}

/// The pair of pre-shared keys used by the chunk protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FotaKeys {
    /// Keystream key
    pub enc_key: EncryptionKey,
    /// Tag key
    pub mac_key: MacKey,
}

impl FotaKeys {
    /// Create a key pair from raw keys
    pub fn new(enc_key: EncryptionKey, mac_key: MacKey) -> Self {
        Self { enc_key, mac_key }
    }

    /// Generate a fresh random key pair using `OsRng`
    pub fn generate() -> Self {
        let mut enc = [0u8; ENC_KEY_LEN];
        let mut mac = [0u8; MAC_KEY_LEN];
        OsRng.fill_bytes(&mut enc);
        OsRng.fill_bytes(&mut mac);
        let keys = Self::new(EncryptionKey::from_bytes(enc), MacKey::from_bytes(mac));
        enc.zeroize();
        mac.zeroize();
        keys
    }

    /// Parse a key pair from hex strings
    pub fn from_hex(enc_hex: &str, mac_hex: &str) -> CryptoResult<Self> {
        let enc = decode_fixed::<ENC_KEY_LEN>(enc_hex)?;
        let mac = decode_fixed::<MAC_KEY_LEN>(mac_hex)?;
        Ok(Self::new(
            EncryptionKey::from_bytes(enc),
            MacKey::from_bytes(mac),
        ))
    }
}

fn decode_fixed<const N: usize>(encoded: &str) -> CryptoResult<[u8; N]> {
    let mut bytes = hex::decode(encoded.trim())?;
    let result = if bytes.len() == N {
        let mut key = [0u8; N];
        key.copy_from_slice(&bytes);
        Ok(key)
    } else {
        Err(CryptoError::InvalidKeyLength {
            expected: N,
            actual: bytes.len(),
        })
    };
    bytes.zeroize();
    result
}

/// On-disk key file format (hex-encoded keys)
#[derive(Serialize, Deserialize)]
pub struct KeyFile {
    /// AES-128 key, 32 hex characters
    pub enc_key: String,
    /// HMAC key, 64 hex characters
    pub mac_key: String,
}

impl KeyFile {
    /// Hex-encode a key pair for storage
    pub fn from_keys(keys: &FotaKeys) -> Self {
        Self {
            enc_key: hex::encode(keys.enc_key.as_bytes()),
            mac_key: hex::encode(keys.mac_key.as_bytes()),
        }
    }

    /// Decode into a key pair
    pub fn to_keys(&self) -> CryptoResult<FotaKeys> {
        FotaKeys::from_hex(&self.enc_key, &self.mac_key)
    }

    /// Write the key file as pretty JSON
    ///
    /// On Unix the file is owner read/write only (`0o600`), including when an
    /// existing file is overwritten.
    pub fn save(&self, path: &Path) -> CryptoResult<()> {
        let mut json = serde_json::to_string_pretty(self)?;
        let written = write_private(path, json.as_bytes());
        json.zeroize();
        written
    }

    /// Read a key file
    pub fn load(path: &Path) -> CryptoResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(unix)]
fn write_private(path: &Path, content: &[u8]) -> CryptoResult<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(KEY_FILE_MODE)
        .open(path)?;
    file.set_permissions(std::fs::Permissions::from_mode(KEY_FILE_MODE))?;
    file.write_all(content)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn write_private(path: &Path, content: &[u8]) -> CryptoResult<()> {
    std::fs::write(path, content)?;
    Ok(())
}

impl Drop for KeyFile {
    fn drop(&mut self) {
        self.enc_key.zeroize();
        self.mac_key.zeroize();
    }
}

/// Source of the pre-shared keys
pub trait KeyProvider: Send + Sync {
    /// Load the key pair
    fn load_keys(&self) -> CryptoResult<FotaKeys>;
}

/// Keys held in memory, supplied by the caller
#[derive(Debug, Clone)]
pub struct StaticKeyProvider {
    keys: FotaKeys,
}

impl StaticKeyProvider {
    /// Wrap an existing key pair
    pub fn new(keys: FotaKeys) -> Self {
        Self { keys }
    }
}

impl KeyProvider for StaticKeyProvider {
    fn load_keys(&self) -> CryptoResult<FotaKeys> {
        Ok(self.keys.clone())
    }
}

/// Keys read from hex-valued environment variables
#[derive(Debug, Clone)]
pub struct EnvKeyProvider {
    enc_var: String,
    mac_var: String,
}

impl EnvKeyProvider {
    /// Read keys from the given variables
    pub fn new(enc_var: impl Into<String>, mac_var: impl Into<String>) -> Self {
        Self {
            enc_var: enc_var.into(),
            mac_var: mac_var.into(),
        }
    }

    fn read_var(name: &str) -> CryptoResult<String> {
        std::env::var(name).map_err(|e| {
            CryptoError::KeyFormatError(format!("environment variable {}: {}", name, e))
        })
    }
}

impl Default for EnvKeyProvider {
    fn default() -> Self {
        Self::new(DEFAULT_ENC_KEY_VAR, DEFAULT_MAC_KEY_VAR)
    }
}

impl KeyProvider for EnvKeyProvider {
    fn load_keys(&self) -> CryptoResult<FotaKeys> {
        let mut enc = Self::read_var(&self.enc_var)?;
        let mut mac = Self::read_var(&self.mac_var)?;
        let keys = FotaKeys::from_hex(&enc, &mac);
        enc.zeroize();
        mac.zeroize();
        debug!(enc_var = %self.enc_var, mac_var = %self.mac_var, "Loaded FOTA keys from environment");
        keys
    }
}

/// Keys read from a JSON [`KeyFile`]
#[derive(Debug, Clone)]
pub struct FileKeyProvider {
    path: PathBuf,
}

impl FileKeyProvider {
    /// Read keys from the given file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl KeyProvider for FileKeyProvider {
    fn load_keys(&self) -> CryptoResult<FotaKeys> {
        let file = KeyFile::load(&self.path).map_err(|e| {
            CryptoError::KeyFormatError(format!(
                "failed to read key file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        debug!(path = %self.path.display(), "Loaded FOTA keys from file");
        file.to_keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    const ENC_HEX: &str = "603deb1015ca71be2b73aef0857d7781";
    const MAC_HEX: &str = "603deb1015ca71be2b73aef0857d77811f352c073b6108d72d9810a30914dff4";

    #[test]
    fn test_from_hex_roundtrip_through_key_file() -> TestResult {
        let keys = FotaKeys::from_hex(ENC_HEX, MAC_HEX)?;
        let file = KeyFile::from_keys(&keys);
        assert_eq!(file.enc_key, ENC_HEX);
        assert_eq!(file.mac_key, MAC_HEX);
        assert_eq!(file.to_keys()?, keys);
        Ok(())
    }

    #[test]
    fn test_from_hex_rejects_wrong_length() {
        let result = FotaKeys::from_hex("00ff", MAC_HEX);
        assert!(matches!(
            result,
            Err(CryptoError::InvalidKeyLength {
                expected: 16,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_from_hex_rejects_non_hex() {
        let result = FotaKeys::from_hex(ENC_HEX, "not-hex");
        assert!(matches!(result, Err(CryptoError::EncodingError(_))));
    }

    #[test]
    fn test_generated_keys_differ() {
        let a = FotaKeys::generate();
        let b = FotaKeys::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_debug_redacts_key_bytes() -> TestResult {
        let keys = FotaKeys::from_hex(ENC_HEX, MAC_HEX)?;
        let rendered = format!("{:?}", keys);
        assert!(rendered.contains("redacted"));
        assert!(!rendered.contains("603deb"));
        Ok(())
    }

    #[test]
    fn test_file_provider() -> TestResult {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("keys.json");
        let keys = FotaKeys::generate();
        KeyFile::from_keys(&keys).save(&path)?;

        let loaded = FileKeyProvider::new(&path).load_keys()?;
        assert_eq!(loaded, keys);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_key_file_is_owner_only() -> TestResult {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("keys.json");
        std::fs::write(&path, "{}")?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644))?;

        KeyFile::from_keys(&FotaKeys::generate()).save(&path)?;
        let mode = std::fs::metadata(&path)?.permissions().mode() & 0o777;
        assert_eq!(mode, KEY_FILE_MODE);
        KeyFile::load(&path)?.to_keys()?;
        Ok(())
    }

    #[test]
    fn test_file_provider_missing_file() {
        let result = FileKeyProvider::new("/nonexistent/keys.json").load_keys();
        assert!(matches!(result, Err(CryptoError::KeyFormatError(_))));
    }

    #[test]
    fn test_env_provider_missing_variable() {
        let provider = EnvKeyProvider::new(
            "ECOWATT_FOTA_TEST_UNSET_ENC",
            "ECOWATT_FOTA_TEST_UNSET_MAC",
        );
        assert!(matches!(
            provider.load_keys(),
            Err(CryptoError::KeyFormatError(_))
        ));
    }
}
