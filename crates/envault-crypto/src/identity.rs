//! RSA identity keypairs and the asymmetric wrap used for sharing.
//!
//! Public keys travel as base64 SubjectPublicKeyInfo DER. Private keys are
//! PKCS#8 DER and only ever leave the client AES-GCM encrypted under the
//! owner's vault key.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use envault_core::types::PublishedIdentity;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::cipher::{decrypt, encrypt};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::{export_key, import_key, SymmetricKey, VaultKey};
use crate::RSA_BITS;

/// A user's RSA-2048 keypair.
#[derive(Clone)]
pub struct IdentityKeyPair {
    pub public: RsaPublicKey,
    pub private: RsaPrivateKey,
}

impl IdentityKeyPair {
    pub fn generate() -> CryptoResult<Self> {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), RSA_BITS)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { public, private })
    }

    pub fn from_private(private: RsaPrivateKey) -> Self {
        let public = RsaPublicKey::from(&private);
        Self { public, private }
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public", &"[RSA-2048]")
            .field("private", &"[REDACTED]")
            .finish()
    }
}

pub fn export_public_key(key: &RsaPublicKey) -> CryptoResult<String> {
    let der = key
        .to_public_key_der()
        .map_err(|e| CryptoError::KeyFormat(format!("SPKI encode: {e}")))?;
    Ok(STANDARD.encode(der.as_bytes()))
}

pub fn import_public_key(encoded: &str) -> CryptoResult<RsaPublicKey> {
    let der = STANDARD
        .decode(encoded)
        .map_err(|e| CryptoError::KeyFormat(format!("base64 decode: {e}")))?;
    RsaPublicKey::from_public_key_der(&der)
        .map_err(|e| CryptoError::KeyFormat(format!("SPKI decode: {e}")))
}

pub fn export_private_key(key: &RsaPrivateKey) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let doc = key
        .to_pkcs8_der()
        .map_err(|e| CryptoError::KeyFormat(format!("PKCS#8 encode: {e}")))?;
    Ok(Zeroizing::new(doc.as_bytes().to_vec()))
}

pub fn import_private_key(der: &[u8]) -> CryptoResult<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_der(der)
        .map_err(|e| CryptoError::KeyFormat(format!("PKCS#8 decode: {e}")))
}

/// Produce the server-side form of an identity: the public key in the clear
/// and the private key sealed under the vault key.
pub fn publish_identity(
    vault_key: &VaultKey,
    keypair: &IdentityKeyPair,
) -> CryptoResult<PublishedIdentity> {
    let public_key = export_public_key(&keypair.public)?;
    let private_der = export_private_key(&keypair.private)?;
    let wrapped_private_key = encrypt(vault_key, &private_der)?;
    Ok(PublishedIdentity {
        public_key,
        wrapped_private_key,
    })
}

/// Recover the keypair from its published form.
///
/// A wrong vault key yields [`CryptoError::Decryption`]; a wrapper that
/// authenticates but does not hold a valid PKCS#8 key yields
/// [`CryptoError::KeyFormat`].
pub fn unlock_identity(
    vault_key: &VaultKey,
    published: &PublishedIdentity,
) -> CryptoResult<IdentityKeyPair> {
    let der = decrypt(vault_key, &published.wrapped_private_key)?;
    let private = import_private_key(&der)?;
    Ok(IdentityKeyPair::from_private(private))
}

/// RSA-OAEP-SHA256 encrypt the raw bytes of `key` to `recipient`.
pub fn wrap_key_for_recipient(
    key: &SymmetricKey,
    recipient: &RsaPublicKey,
) -> CryptoResult<String> {
    let raw = export_key(key);
    let wrapped = recipient
        .encrypt(&mut rand::thread_rng(), Oaep::new::<Sha256>(), &raw)
        .map_err(|e| CryptoError::Encryption(format!("RSA-OAEP: {e}")))?;
    Ok(STANDARD.encode(wrapped))
}

/// Inverse of [`wrap_key_for_recipient`]. Any failure is a
/// [`CryptoError::Decryption`].
pub fn unwrap_key_with_private(
    wrapped: &str,
    private: &RsaPrivateKey,
) -> CryptoResult<SymmetricKey> {
    let ciphertext = STANDARD.decode(wrapped).map_err(|_| CryptoError::Decryption)?;
    let raw = Zeroizing::new(
        private
            .decrypt(Oaep::new::<Sha256>(), &ciphertext)
            .map_err(|_| CryptoError::Decryption)?,
    );
    import_key(&raw).map_err(|_| CryptoError::Decryption)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    // RSA keygen dominates test time; share two keypairs across the module.
    fn alice() -> &'static IdentityKeyPair {
        static KP: OnceLock<IdentityKeyPair> = OnceLock::new();
        KP.get_or_init(|| IdentityKeyPair::generate().unwrap())
    }

    fn bob() -> &'static IdentityKeyPair {
        static KP: OnceLock<IdentityKeyPair> = OnceLock::new();
        KP.get_or_init(|| IdentityKeyPair::generate().unwrap())
    }

    #[test]
    fn test_public_key_roundtrip() {
        let encoded = export_public_key(&alice().public).unwrap();
        let decoded = import_public_key(&encoded).unwrap();
        assert_eq!(decoded, alice().public);
    }

    #[test]
    fn test_import_garbage_public_key() {
        assert!(matches!(
            import_public_key("AAAA"),
            Err(CryptoError::KeyFormat(_))
        ));
        assert!(matches!(
            import_public_key("***"),
            Err(CryptoError::KeyFormat(_))
        ));
    }

    #[test]
    fn test_publish_unlock_roundtrip() {
        let vault_key = VaultKey::generate();
        let published = publish_identity(&vault_key, alice()).unwrap();
        let unlocked = unlock_identity(&vault_key, &published).unwrap();
        assert_eq!(unlocked.private, alice().private);
        assert_eq!(unlocked.public, alice().public);
    }

    #[test]
    fn test_unlock_with_wrong_vault_key() {
        let published = publish_identity(&VaultKey::generate(), alice()).unwrap();
        let result = unlock_identity(&VaultKey::generate(), &published);
        assert!(matches!(result, Err(CryptoError::Decryption)));
    }

    #[test]
    fn test_unlock_non_pkcs8_payload() {
        let vault_key = VaultKey::generate();
        let published = PublishedIdentity {
            public_key: export_public_key(&alice().public).unwrap(),
            wrapped_private_key: encrypt(&vault_key, b"not a der document").unwrap(),
        };
        let result = unlock_identity(&vault_key, &published);
        assert!(matches!(result, Err(CryptoError::KeyFormat(_))));
    }

    #[test]
    fn test_wrap_unwrap_for_recipient() {
        let item_key = SymmetricKey::generate();
        let wrapped = wrap_key_for_recipient(&item_key, &bob().public).unwrap();
        let unwrapped = unwrap_key_with_private(&wrapped, &bob().private).unwrap();
        assert_eq!(item_key.as_bytes(), unwrapped.as_bytes());
    }

    #[test]
    fn test_wrong_recipient_cannot_unwrap() {
        let item_key = SymmetricKey::generate();
        let wrapped = wrap_key_for_recipient(&item_key, &bob().public).unwrap();
        let result = unwrap_key_with_private(&wrapped, &alice().private);
        assert!(matches!(result, Err(CryptoError::Decryption)));
    }

    #[test]
    fn test_oaep_is_randomized() {
        let item_key = SymmetricKey::generate();
        let a = wrap_key_for_recipient(&item_key, &bob().public).unwrap();
        let b = wrap_key_for_recipient(&item_key, &bob().public).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrapped_size_is_modulus() {
        let wrapped = wrap_key_for_recipient(&SymmetricKey::generate(), &alice().public).unwrap();
        let raw = STANDARD.decode(wrapped).unwrap();
        assert_eq!(raw.len(), RSA_BITS / 8);
    }

    #[test]
    fn test_debug_redacts_private() {
        let dbg = format!("{:?}", alice());
        assert!(dbg.contains("REDACTED"));
    }
}
