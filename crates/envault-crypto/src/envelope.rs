//! Item envelopes: record content under a per-record item key, the item key
//! under the vault key.
//!
//! ```text
//! VaultKey ──wraps──▶ ItemKey ──encrypts──▶ serde_json(content)
//! ```
//!
//! The envelope layer never looks inside the content; anything serde can
//! round-trip passes through unchanged.

use envault_core::types::Envelope;
use serde::{de::DeserializeOwned, Serialize};
use zeroize::Zeroizing;

use crate::cipher::{decrypt, encrypt};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::{export_key, import_key, ItemKey, SymmetricKey, VaultKey};

/// Seal `content` under a brand-new item key and wrap that key with the
/// vault key. Both halves of the returned envelope must be stored together.
pub fn create_item<T: Serialize>(vault_key: &VaultKey, content: &T) -> CryptoResult<Envelope> {
    let item_key = ItemKey::generate();
    let payload = Zeroizing::new(
        serde_json::to_vec(content).map_err(|e| CryptoError::Serialization(e.to_string()))?,
    );

    let encrypted_data = encrypt(&item_key, &payload)?;
    let encrypted_item_key = wrap_key(vault_key, &item_key)?;

    tracing::debug!(bytes = payload.len(), "sealed item envelope");
    Ok(Envelope {
        encrypted_data,
        encrypted_item_key,
    })
}

/// Open an envelope. Every failure (unwrap, import, decrypt, deserialize)
/// is reported as [`CryptoError::Decryption`] and no partial content escapes.
pub fn read_item<T: DeserializeOwned>(
    vault_key: &VaultKey,
    envelope: &Envelope,
) -> CryptoResult<T> {
    let item_key = unwrap_item_key(vault_key, &envelope.encrypted_item_key)?;
    read_item_with_key(&item_key, &envelope.encrypted_data)
}

/// Decrypt content with an already-unwrapped item key (the recipient path
/// for shared records).
pub fn read_item_with_key<T: DeserializeOwned>(
    item_key: &ItemKey,
    encrypted_data: &str,
) -> CryptoResult<T> {
    let payload = decrypt(item_key, encrypted_data)?;
    serde_json::from_slice(&payload).map_err(|_| CryptoError::Decryption)
}

/// Re-seal edited content. Always mints a fresh item key: an edit never
/// reuses key material from an earlier version of the record.
pub fn update_item<T: Serialize>(vault_key: &VaultKey, content: &T) -> CryptoResult<Envelope> {
    create_item(vault_key, content)
}

/// Encrypt the raw bytes of `key` under `wrapping_key`.
pub fn wrap_key(wrapping_key: &SymmetricKey, key: &SymmetricKey) -> CryptoResult<String> {
    encrypt(wrapping_key, &export_key(key))
}

/// Recover an item key from its vault-key wrapper.
pub fn unwrap_item_key(vault_key: &VaultKey, encrypted_item_key: &str) -> CryptoResult<ItemKey> {
    let raw = decrypt(vault_key, encrypted_item_key)?;
    // A wrapper that authenticates but holds the wrong length is still
    // indistinguishable from corruption to the caller.
    import_key(&raw).map_err(|_| CryptoError::Decryption)
}

/// Move a wrapped payload from `old_key` to `new_key` without exposing it
/// beyond this call. Used for item keys and the identity private key when
/// the vault key rotates.
pub fn rewrap(
    old_key: &SymmetricKey,
    new_key: &SymmetricKey,
    wrapped: &str,
) -> CryptoResult<String> {
    let raw = decrypt(old_key, wrapped)?;
    encrypt(new_key, &raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Login {
        title: String,
        username: String,
        password: String,
        notes: Option<String>,
    }

    fn login() -> Login {
        Login {
            title: "mail".into(),
            username: "alice@example.com".into(),
            password: "hunter2".into(),
            notes: Some("2FA on phone".into()),
        }
    }

    #[test]
    fn test_create_read_roundtrip() {
        let vault_key = VaultKey::generate();
        let envelope = create_item(&vault_key, &login()).unwrap();
        let content: Login = read_item(&vault_key, &envelope).unwrap();
        assert_eq!(content, login());
    }

    #[test]
    fn test_read_with_other_vault_key_fails() {
        let envelope = create_item(&VaultKey::generate(), &login()).unwrap();
        let result: CryptoResult<Login> = read_item(&VaultKey::generate(), &envelope);
        assert!(matches!(result, Err(CryptoError::Decryption)));
    }

    #[test]
    fn test_update_mints_distinct_item_keys() {
        let vault_key = VaultKey::generate();
        let first = update_item(&vault_key, &login()).unwrap();
        let second = update_item(&vault_key, &login()).unwrap();

        let k1 = unwrap_item_key(&vault_key, &first.encrypted_item_key).unwrap();
        let k2 = unwrap_item_key(&vault_key, &second.encrypted_item_key).unwrap();
        assert_ne!(export_key(&k1).as_slice(), export_key(&k2).as_slice());
    }

    #[test]
    fn test_old_item_key_cannot_read_new_content() {
        let vault_key = VaultKey::generate();
        let v1 = create_item(&vault_key, &login()).unwrap();
        let k1 = unwrap_item_key(&vault_key, &v1.encrypted_item_key).unwrap();

        let mut edited = login();
        edited.password = "correct horse".into();
        let v2 = update_item(&vault_key, &edited).unwrap();

        let result: CryptoResult<Login> = read_item_with_key(&k1, &v2.encrypted_data);
        assert!(matches!(result, Err(CryptoError::Decryption)));
    }

    #[test]
    fn test_mismatched_halves_fail() {
        let vault_key = VaultKey::generate();
        let a = create_item(&vault_key, &login()).unwrap();
        let b = create_item(&vault_key, &login()).unwrap();

        let franken = Envelope {
            encrypted_data: a.encrypted_data,
            encrypted_item_key: b.encrypted_item_key,
        };
        let result: CryptoResult<Login> = read_item(&vault_key, &franken);
        assert!(matches!(result, Err(CryptoError::Decryption)));
    }

    #[test]
    fn test_wrong_shape_is_decryption_error() {
        let vault_key = VaultKey::generate();
        let envelope = create_item(&vault_key, &"just a string").unwrap();
        let result: CryptoResult<Login> = read_item(&vault_key, &envelope);
        assert!(matches!(result, Err(CryptoError::Decryption)));
    }

    #[test]
    fn test_wrapped_non_key_payload_is_rejected() {
        let vault_key = VaultKey::generate();
        let bogus = encrypt(&vault_key, b"too short").unwrap();
        assert!(matches!(
            unwrap_item_key(&vault_key, &bogus),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn test_rewrap_moves_key_between_vault_keys() {
        let old = VaultKey::generate();
        let new = VaultKey::generate();
        let envelope = create_item(&old, &login()).unwrap();

        let rewrapped = rewrap(&old, &new, &envelope.encrypted_item_key).unwrap();
        let migrated = Envelope {
            encrypted_data: envelope.encrypted_data.clone(),
            encrypted_item_key: rewrapped,
        };

        let content: Login = read_item(&new, &migrated).unwrap();
        assert_eq!(content, login());
        assert!(read_item::<Login>(&old, &migrated).is_err());
    }

    #[test]
    fn test_arbitrary_json_passes_through() {
        let vault_key = VaultKey::generate();
        let value = serde_json::json!({
            "type": "card",
            "fields": [{"name": "pin", "value": "0000"}],
            "custom": {"nested": [1, 2, 3]},
        });
        let envelope = create_item(&vault_key, &value).unwrap();
        let back: serde_json::Value = read_item(&vault_key, &envelope).unwrap();
        assert_eq!(back, value);
    }
}
