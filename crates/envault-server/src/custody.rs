//! Vault-key custody: each user's vault key at rest, wrapped under the
//! key derived from the server secret.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use envault_core::{VaultError, VaultResult};
use envault_crypto::{decrypt, encrypt, SymmetricKey, KEY_SIZE};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// What the server stores per user in place of the vault key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodyEntry {
    /// AES-256-GCM(custody key, raw vault key), base64
    pub wrapped_vault_key: String,
    /// Opaque client payload stored alongside the key at setup
    #[serde(default)]
    pub blob: Option<String>,
    pub updated_at: u64,
}

/// Wrap a base64 vault key for storage. The key must decode to exactly
/// 32 bytes.
pub fn wrap_vault_key(custody_key: &SymmetricKey, vault_key: &SecretString) -> VaultResult<String> {
    let raw = Zeroizing::new(
        STANDARD
            .decode(vault_key.expose_secret())
            .map_err(|e| VaultError::KeyFormat(format!("vault key base64: {e}")))?,
    );
    if raw.len() != KEY_SIZE {
        return Err(VaultError::KeyFormat(format!(
            "vault key must be {KEY_SIZE} bytes, got {}",
            raw.len()
        )));
    }
    Ok(encrypt(custody_key, &raw)?)
}

/// Unwrap a stored vault key back to its base64 form for an authorized
/// session.
pub fn unwrap_vault_key(custody_key: &SymmetricKey, wrapped: &str) -> VaultResult<SecretString> {
    let raw = decrypt(custody_key, wrapped)?;
    Ok(SecretString::from(STANDARD.encode(raw.as_slice())))
}
