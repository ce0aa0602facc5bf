use envault_core::VaultError;
use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Raw key bytes could not be imported (wrong length or bad DER)
    #[error("malformed key material: {0}")]
    KeyFormat(String),

    /// Any failure on the decrypt/unwrap path. Deliberately undifferentiated.
    #[error("decryption failed")]
    Decryption,

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("payload serialization failed: {0}")]
    Serialization(String),
}

impl From<CryptoError> for VaultError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::KeyFormat(msg) => VaultError::KeyFormat(msg),
            CryptoError::Decryption => VaultError::Decryption,
            other => VaultError::Other(anyhow::Error::new(other)),
        }
    }
}
