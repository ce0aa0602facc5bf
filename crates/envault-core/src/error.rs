use thiserror::Error;

use crate::types::RecordId;

pub type VaultResult<T> = Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    /// Raw key material had the wrong length or encoding.
    #[error("malformed key material: {0}")]
    KeyFormat(String),

    /// Authenticated decryption or asymmetric unwrap failed.
    ///
    /// Carries no detail; every cause of failure maps to this variant.
    #[error("decryption failed")]
    Decryption,

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("verification code is expired, already used, or invalid")]
    VerificationExpired,

    #[error(
        "{} record(s) could not be migrated, {} migrated",
        .failed.len(),
        .migrated.len()
    )]
    PartialFailure {
        migrated: Vec<RecordId>,
        failed: Vec<RecordId>,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_failure_message_counts() {
        let err = VaultError::PartialFailure {
            migrated: vec![RecordId::from("a"), RecordId::from("b")],
            failed: vec![RecordId::from("c")],
        };
        assert_eq!(err.to_string(), "1 record(s) could not be migrated, 2 migrated");
    }

    #[test]
    fn test_decryption_message_is_opaque() {
        assert_eq!(VaultError::Decryption.to_string(), "decryption failed");
    }
}
