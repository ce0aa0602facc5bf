//! Symmetric key material: generation, raw export/import, text encoding

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{CryptoError, CryptoResult};
use crate::KEY_SIZE;

/// A 256-bit AES-GCM key. Zeroized on drop.
#[derive(Clone)]
pub struct SymmetricKey {
    bytes: [u8; KEY_SIZE],
}

/// Top-level per-user key; wraps item keys and the identity private key.
pub type VaultKey = SymmetricKey;
/// Per-record key, minted fresh on every create and every content edit.
pub type ItemKey = SymmetricKey;
/// Per-group key, wrapped individually for each member.
pub type GroupKey = SymmetricKey;

impl SymmetricKey {
    /// Generate a fresh random key from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Text form used when the key itself crosses an interface
    /// (e.g. handing a vault key to custody).
    pub fn to_base64(&self) -> SecretString {
        SecretString::from(STANDARD.encode(self.bytes))
    }

    pub fn from_base64(encoded: &SecretString) -> CryptoResult<Self> {
        let raw = Zeroizing::new(
            STANDARD
                .decode(encoded.expose_secret())
                .map_err(|e| CryptoError::KeyFormat(format!("base64 decode: {e}")))?,
        );
        import_key(&raw)
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Export raw key bytes so the key can be encrypted as an ordinary payload.
pub fn export_key(key: &SymmetricKey) -> Zeroizing<Vec<u8>> {
    Zeroizing::new(key.bytes.to_vec())
}

/// Import raw key bytes. Anything other than exactly 32 bytes is rejected.
pub fn import_key(raw: &[u8]) -> CryptoResult<SymmetricKey> {
    if raw.len() != KEY_SIZE {
        return Err(CryptoError::KeyFormat(format!(
            "symmetric key must be {KEY_SIZE} bytes, got {}",
            raw.len()
        )));
    }
    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(raw);
    Ok(SymmetricKey { bytes })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        let k1 = SymmetricKey::generate();
        let k2 = SymmetricKey::generate();
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
    }

    #[test]
    fn test_export_import_roundtrip() {
        let key = SymmetricKey::generate();
        let raw = export_key(&key);
        let imported = import_key(&raw).unwrap();
        assert_eq!(key.as_bytes(), imported.as_bytes());
    }

    #[test]
    fn test_import_wrong_length() {
        for len in [0usize, 16, 31, 33, 64] {
            let result = import_key(&vec![7u8; len]);
            assert!(
                matches!(result, Err(CryptoError::KeyFormat(_))),
                "length {len} must be rejected"
            );
        }
    }

    #[test]
    fn test_base64_roundtrip() {
        let key = SymmetricKey::generate();
        let encoded = key.to_base64();
        let decoded = SymmetricKey::from_base64(&encoded).unwrap();
        assert_eq!(key.as_bytes(), decoded.as_bytes());
    }

    #[test]
    fn test_base64_garbage_is_key_format() {
        let result = SymmetricKey::from_base64(&SecretString::from("not base64!!"));
        assert!(matches!(result, Err(CryptoError::KeyFormat(_))));
    }

    #[test]
    fn test_debug_redacts() {
        let key = SymmetricKey::from_bytes([0xAB; KEY_SIZE]);
        let dbg = format!("{key:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("171"));
    }
}
