//! Argon2id PHC hashing of the credential submitted with a re-key

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use envault_core::{VaultError, VaultResult};
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};

/// Hash a credential into a self-describing PHC string
/// (`$argon2id$v=19$m=...,t=...,p=...$salt$hash`).
pub fn hash_credential(credential: &SecretString) -> VaultResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(credential.expose_secret().as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| VaultError::Other(anyhow::anyhow!("argon2 hash: {e}")))
}

/// Check a credential against a stored PHC string. A malformed stored hash
/// never verifies.
pub fn verify_credential(credential: &SecretString, phc: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(phc) else {
        tracing::warn!("stored credential hash is not a valid PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(credential.expose_secret().as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_verify() {
        let cred = SecretString::from("hunter2");
        let phc = hash_credential(&cred).unwrap();

        assert!(phc.starts_with("$argon2id$"));
        assert!(verify_credential(&cred, &phc));
        assert!(!verify_credential(&SecretString::from("hunter3"), &phc));
    }

    #[test]
    fn test_salted() {
        let cred = SecretString::from("same");
        assert_ne!(hash_credential(&cred).unwrap(), hash_credential(&cred).unwrap());
    }

    #[test]
    fn test_malformed_hash_never_verifies() {
        assert!(!verify_credential(&SecretString::from("x"), "plaintext"));
    }
}
