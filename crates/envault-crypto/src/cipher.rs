//! AES-256-GCM payload encryption/decryption
//!
//! Combined ciphertext format (binary, base64 when crossing an interface):
//! ```text
//! [12 bytes: random nonce][N bytes: ciphertext][16 bytes: GCM tag]
//! ```
//!
//! Every call draws a fresh 96-bit nonce from the CSPRNG, so encrypting the
//! same plaintext twice under the same key yields unrelated outputs.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::SymmetricKey;
use crate::{NONCE_SIZE, TAG_SIZE};

/// Encrypt `plaintext` and return the combined layout as raw bytes.
pub fn encrypt_bytes(key: &SymmetricKey, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::Encryption(format!("AES-GCM seal: {e}")))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt the raw combined layout produced by [`encrypt_bytes`].
pub fn decrypt_bytes(key: &SymmetricKey, combined: &[u8]) -> CryptoResult<Zeroizing<Vec<u8>>> {
    if combined.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::Decryption);
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    cipher
        .decrypt(nonce, ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::Decryption)
}

/// Encrypt `plaintext` and return base64(nonce || ciphertext || tag).
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> CryptoResult<String> {
    encrypt_bytes(key, plaintext).map(|combined| STANDARD.encode(combined))
}

/// Decrypt the base64 output of [`encrypt`].
///
/// Malformed base64, truncated input, a wrong key and a failed tag check all
/// surface as the same [`CryptoError::Decryption`].
pub fn decrypt(key: &SymmetricKey, combined: &str) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let raw = STANDARD
        .decode(combined)
        .map_err(|_| CryptoError::Decryption)?;
    decrypt_bytes(key, &raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = SymmetricKey::generate();
        let plaintext = b"correct horse battery staple";

        let encrypted = encrypt(&key, plaintext).unwrap();
        let decrypted = decrypt(&key, &encrypted).unwrap();

        assert_eq!(decrypted.as_slice(), plaintext);
    }

    #[test]
    fn test_encrypt_decrypt_empty() {
        let key = SymmetricKey::generate();

        let encrypted = encrypt_bytes(&key, b"").unwrap();
        assert_eq!(encrypted.len(), NONCE_SIZE + TAG_SIZE);

        let decrypted = decrypt_bytes(&key, &encrypted).unwrap();
        assert!(decrypted.is_empty());
    }

    #[test]
    fn test_same_plaintext_different_output() {
        let key = SymmetricKey::generate();
        let a = encrypt(&key, b"same").unwrap();
        let b = encrypt(&key, b"same").unwrap();

        assert_ne!(a, b, "fresh nonce per call");
        assert_eq!(decrypt(&key, &a).unwrap().as_slice(), b"same");
        assert_eq!(decrypt(&key, &b).unwrap().as_slice(), b"same");
    }

    #[test]
    fn test_decrypt_wrong_key() {
        let key1 = SymmetricKey::generate();
        let key2 = SymmetricKey::generate();

        let encrypted = encrypt(&key1, b"secret data").unwrap();
        let result = decrypt(&key2, &encrypted);

        assert!(matches!(result, Err(CryptoError::Decryption)));
    }

    #[test]
    fn test_encrypted_size() {
        let key = SymmetricKey::generate();
        let encrypted = encrypt_bytes(&key, &[0u8; 1000]).unwrap();

        // nonce (12) + plaintext (1000) + tag (16)
        assert_eq!(encrypted.len(), 12 + 1000 + 16);
    }

    #[test]
    fn test_truncated_input() {
        let key = SymmetricKey::generate();
        for len in [0usize, 5, NONCE_SIZE, NONCE_SIZE + TAG_SIZE - 1] {
            let result = decrypt_bytes(&key, &vec![0u8; len]);
            assert!(matches!(result, Err(CryptoError::Decryption)));
        }
    }

    #[test]
    fn test_bad_base64_is_decryption_error() {
        let key = SymmetricKey::generate();
        let result = decrypt(&key, "%%% not base64 %%%");
        assert!(matches!(result, Err(CryptoError::Decryption)));
    }

    #[test]
    fn test_every_byte_flip_detected() {
        let key = SymmetricKey::generate();
        let encrypted = encrypt_bytes(&key, b"tamper me").unwrap();

        for i in 0..encrypted.len() {
            let mut tampered = encrypted.clone();
            tampered[i] ^= 0x01;
            assert!(
                decrypt_bytes(&key, &tampered).is_err(),
                "flip at byte {i} must fail"
            );
        }
    }
}
