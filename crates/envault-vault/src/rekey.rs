//! Vault-key rotation.
//!
//! ```text
//! Idle ──▶ CollectingRecords ──▶ RewrappingKeys ──▶ Committing ──▶ Done
//!   │              │                    │                │
//!   └──────────────┴────────────────────┴────────────────┴──────▶ Failed
//! ```
//!
//! Only item-key wrappers and the identity private-key wrapper change;
//! content ciphertexts are never touched. Nothing is persisted before
//! `Committing`, and the commit is a single backend call that applies the
//! whole submission or nothing. Each replacement names the wrapper it was
//! derived from, so a record edited, added or deleted after collection makes
//! the backend refuse the commit with `Conflict`. Once `Committing` starts
//! it runs to completion on its own task even if the caller goes away.

use std::sync::{Arc, PoisonError};

use envault_core::config::RotationPolicy;
use envault_core::store::{RekeySubmission, VaultBackend};
use envault_core::types::{
    now_epoch, CodeIssued, PublishedIdentity, RecordFilter, RecordId, RewrappedKey, SkippedKey,
    VaultRecord,
};
use envault_core::{VaultError, VaultResult};
use envault_crypto::identity::import_private_key;
use envault_crypto::{decrypt, encrypt, envelope, CryptoResult, VaultKey};
use rayon::prelude::*;
use secrecy::SecretString;

use crate::VaultClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RekeyState {
    Idle,
    CollectingRecords,
    RewrappingKeys,
    Committing,
    Done,
    Failed,
}

impl RekeyState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RekeyState::Done | RekeyState::Failed)
    }

    pub fn can_advance_to(self, next: RekeyState) -> bool {
        use RekeyState::*;
        match (self, next) {
            (Idle, CollectingRecords)
            | (CollectingRecords, RewrappingKeys)
            | (RewrappingKeys, Committing)
            | (Committing, Done) => true,
            (from, Failed) => !from.is_terminal(),
            (Done | Failed, Idle) => true,
            _ => false,
        }
    }
}

fn advance(state: &mut RekeyState, next: RekeyState) -> VaultResult<()> {
    if !state.can_advance_to(next) {
        return Err(VaultError::Other(anyhow::anyhow!(
            "illegal re-key transition {state:?} -> {next:?}"
        )));
    }
    tracing::debug!(from = ?*state, to = ?next, "re-key state");
    *state = next;
    Ok(())
}

/// What a finished rotation did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationOutcome {
    pub migrated: Vec<RecordId>,
    /// Records left behind under `skip_failed`. Their old wrappers stay in
    /// place and are unreadable from now on.
    pub failed: Vec<RecordId>,
    pub identity_rewrapped: bool,
}

struct Rewrapped {
    migrated: Vec<RewrappedKey>,
    failed: Vec<SkippedKey>,
    private_key: Option<CryptoResult<String>>,
}

/// Re-wrap every item key and the private key from `old` to `new`.
/// Record order in the output follows the input; work order does not.
fn rewrap_all(
    old: &VaultKey,
    new: &VaultKey,
    records: &[VaultRecord],
    identity: Option<&PublishedIdentity>,
) -> Rewrapped {
    let results: Vec<(&VaultRecord, CryptoResult<String>)> = records
        .par_iter()
        .map(|r| (r, rewrap_item_key(old, new, &r.envelope.encrypted_item_key)))
        .collect();

    let mut migrated = Vec::with_capacity(results.len());
    let mut failed = Vec::new();
    for (record, result) in results {
        let record_id = record.id.clone();
        let previous = record.envelope.encrypted_item_key.clone();
        match result {
            Ok(wrapped_item_key) => migrated.push(RewrappedKey {
                record_id,
                previous_wrapped_item_key: previous,
                wrapped_item_key,
            }),
            Err(_) => failed.push(SkippedKey {
                record_id,
                wrapped_item_key: previous,
            }),
        }
    }

    Rewrapped {
        migrated,
        failed,
        private_key: identity.map(|i| rewrap_private_key(old, new, &i.wrapped_private_key)),
    }
}

fn rewrap_item_key(old: &VaultKey, new: &VaultKey, wrapped: &str) -> CryptoResult<String> {
    let item_key = envelope::unwrap_item_key(old, wrapped)?;
    envelope::wrap_key(new, &item_key)
}

fn rewrap_private_key(old: &VaultKey, new: &VaultKey, wrapped: &str) -> CryptoResult<String> {
    let der = decrypt(old, wrapped)?;
    import_private_key(&der)?;
    encrypt(new, &der)
}

impl<B: VaultBackend + 'static> VaultClient<B> {
    /// Ask the backend to send a verification code out of band.
    pub async fn request_verification_code(&self) -> VaultResult<CodeIssued> {
        let issued = self.backend.request_verification_code(self.user()).await?;
        *self
            .code_expires_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(issued.expires_at);
        tracing::info!(
            user = %self.user(),
            expires_at = issued.expires_at,
            "verification code requested"
        );
        Ok(issued)
    }

    /// State of the last (or current) rotation.
    pub async fn rotation_state(&self) -> RekeyState {
        *self.rotation.lock().await
    }

    /// Rotate the vault key under this client's policy.
    pub async fn rotate_vault_key(
        &self,
        verification_code: SecretString,
        new_credential: SecretString,
    ) -> VaultResult<RotationOutcome> {
        self.rotate_vault_key_with_policy(verification_code, new_credential, self.policy)
            .await
    }

    /// Rotate the vault key: fresh key, every item key and the private key
    /// re-wrapped, one atomic commit, then the session switches keys.
    ///
    /// A second rotation on the same client while one is running fails
    /// with `PreconditionFailed`.
    pub async fn rotate_vault_key_with_policy(
        &self,
        verification_code: SecretString,
        new_credential: SecretString,
        policy: RotationPolicy,
    ) -> VaultResult<RotationOutcome> {
        let mut state = self.rotation.try_lock().map_err(|_| {
            VaultError::PreconditionFailed("a vault key rotation is already in progress".into())
        })?;

        // A rotation abandoned before commit leaves an intermediate state
        if !state.is_terminal() && *state != RekeyState::Idle {
            advance(&mut state, RekeyState::Failed)?;
        }
        if state.is_terminal() {
            advance(&mut state, RekeyState::Idle)?;
        }

        let result = self
            .run_rotation(&mut state, verification_code, new_credential, policy)
            .await;

        if let Err(e) = &result {
            if !state.is_terminal() {
                advance(&mut state, RekeyState::Failed)?;
            }
            tracing::warn!(user = %self.user(), error = %e, "vault key rotation failed");
        }
        result
    }

    async fn run_rotation(
        &self,
        state: &mut RekeyState,
        verification_code: SecretString,
        new_credential: SecretString,
        policy: RotationPolicy,
    ) -> VaultResult<RotationOutcome> {
        let user = self.user().clone();

        // Idle → CollectingRecords
        let old_key = self.session.vault_key().await?;
        let expires_at = *self
            .code_expires_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match expires_at {
            Some(expires_at) if now_epoch() < expires_at => {}
            _ => return Err(VaultError::VerificationExpired),
        }
        advance(state, RekeyState::CollectingRecords)?;

        let records = self.backend.list_records(&user, &RecordFilter::all()).await?;
        let identity = self.backend.own_identity(&user).await?;
        tracing::info!(
            %user,
            records = records.len(),
            identity = identity.is_some(),
            "collected records for rotation"
        );
        advance(state, RekeyState::RewrappingKeys)?;

        let new_key = VaultKey::generate();
        let Rewrapped {
            migrated,
            failed,
            private_key,
        } = {
            let old = old_key.clone();
            let new = new_key.clone();
            tokio::task::spawn_blocking(move || rewrap_all(&old, &new, &records, identity.as_ref()))
                .await
                .map_err(|e| VaultError::Other(anyhow::anyhow!("rewrap task: {e}")))?
        };

        // A corrupt private key aborts under every policy
        let new_wrapped_private_key = match private_key {
            Some(Ok(wrapped)) => Some(wrapped),
            Some(Err(e)) => {
                tracing::warn!(%user, "identity private key failed to rewrap");
                return Err(e.into());
            }
            None => None,
        };
        let identity_rewrapped = new_wrapped_private_key.is_some();

        let migrated_ids: Vec<RecordId> = migrated.iter().map(|r| r.record_id.clone()).collect();
        let failed_ids: Vec<RecordId> = failed.iter().map(|s| s.record_id.clone()).collect();
        for id in &failed_ids {
            tracing::warn!(record = %id, "item key failed to rewrap");
        }
        if !failed.is_empty() && policy == RotationPolicy::Abort {
            return Err(VaultError::PartialFailure {
                migrated: migrated_ids,
                failed: failed_ids,
            });
        }
        advance(state, RekeyState::Committing)?;

        let submission = RekeySubmission {
            verification_code,
            new_credential,
            new_vault_key: new_key.to_base64(),
            new_wrapped_private_key,
            records: migrated,
            skipped: failed,
        };
        let backend = Arc::clone(&self.backend);
        let shared_key = self.session.shared_key();
        let commit_user = user.clone();
        let commit = tokio::spawn(async move {
            backend.submit_rekey(&commit_user, submission).await?;
            // The only point where the session key changes
            *shared_key.write().await = Some(new_key);
            Ok::<_, VaultError>(())
        });
        commit
            .await
            .map_err(|e| VaultError::Other(anyhow::anyhow!("commit task: {e}")))??;
        advance(state, RekeyState::Done)?;

        *self
            .code_expires_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        drop(old_key);

        tracing::info!(
            %user,
            migrated = migrated_ids.len(),
            failed = failed_ids.len(),
            identity_rewrapped,
            "vault key rotated"
        );
        Ok(RotationOutcome {
            migrated: migrated_ids,
            failed: failed_ids,
            identity_rewrapped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envault_core::types::UserId;
    use envault_crypto::{create_item, publish_identity, read_item, IdentityKeyPair};

    #[test]
    fn test_legal_path() {
        let mut state = RekeyState::Idle;
        for next in [
            RekeyState::CollectingRecords,
            RekeyState::RewrappingKeys,
            RekeyState::Committing,
            RekeyState::Done,
            RekeyState::Idle,
        ] {
            advance(&mut state, next).unwrap();
        }
        assert_eq!(state, RekeyState::Idle);
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut state = RekeyState::Idle;
        assert!(advance(&mut state, RekeyState::Committing).is_err());
        assert!(advance(&mut state, RekeyState::Done).is_err());
        assert_eq!(state, RekeyState::Idle);

        let mut done = RekeyState::Done;
        assert!(advance(&mut done, RekeyState::Failed).is_err());
        assert!(advance(&mut done, RekeyState::Committing).is_err());
    }

    #[test]
    fn test_failed_reachable_from_every_non_terminal() {
        for from in [
            RekeyState::Idle,
            RekeyState::CollectingRecords,
            RekeyState::RewrappingKeys,
            RekeyState::Committing,
        ] {
            assert!(from.can_advance_to(RekeyState::Failed), "{from:?}");
        }
        assert!(!RekeyState::Failed.can_advance_to(RekeyState::Failed));
    }

    fn record(vault_key: &VaultKey, n: usize) -> VaultRecord {
        VaultRecord {
            id: RecordId::from(format!("r{n}")),
            owner: UserId::from("alice"),
            folder: None,
            envelope: create_item(vault_key, &n).unwrap(),
            favorite: false,
            trashed_at: None,
            created_at: n as u64,
            updated_at: n as u64,
        }
    }

    #[test]
    fn test_rewrap_all_separates_failures() {
        let old = VaultKey::generate();
        let new = VaultKey::generate();
        let mut records: Vec<VaultRecord> = (0..8).map(|n| record(&old, n)).collect();
        records[3].envelope.encrypted_item_key =
            encrypt(&VaultKey::generate(), &[0u8; 32]).unwrap();

        let out = rewrap_all(&old, &new, &records, None);
        assert_eq!(out.failed.len(), 1);
        assert_eq!(out.failed[0].record_id, RecordId::from("r3"));
        assert_eq!(out.failed[0].wrapped_item_key, records[3].envelope.encrypted_item_key);
        assert_eq!(out.migrated.len(), 7);
        assert!(out.private_key.is_none());

        for rewrapped in &out.migrated {
            let original = records.iter().find(|r| r.id == rewrapped.record_id).unwrap();
            assert_eq!(
                rewrapped.previous_wrapped_item_key,
                original.envelope.encrypted_item_key
            );
            let migrated = envault_core::types::Envelope {
                encrypted_data: original.envelope.encrypted_data.clone(),
                encrypted_item_key: rewrapped.wrapped_item_key.clone(),
            };
            let n: usize = read_item(&new, &migrated).unwrap();
            assert_eq!(RecordId::from(format!("r{n}")), rewrapped.record_id);
        }
    }

    #[test]
    fn test_rewrap_private_key_validates_der() {
        let old = VaultKey::generate();
        let new = VaultKey::generate();
        let keypair = IdentityKeyPair::generate().unwrap();
        let published = publish_identity(&old, &keypair).unwrap();

        let out = rewrap_all(&old, &new, &[], Some(&published));
        let wrapped = out.private_key.unwrap().unwrap();
        let der = decrypt(&new, &wrapped).unwrap();
        assert_eq!(import_private_key(&der).unwrap(), keypair.private);

        let garbage = PublishedIdentity {
            public_key: published.public_key.clone(),
            wrapped_private_key: encrypt(&old, b"not pkcs8").unwrap(),
        };
        let out = rewrap_all(&old, &new, &[], Some(&garbage));
        assert!(out.private_key.unwrap().is_err());
    }
}
