//! Per-user unlocked state: the vault key and the cached identity keypair

use std::sync::Arc;

use envault_core::types::UserId;
use envault_core::{VaultError, VaultResult};
use envault_crypto::{IdentityKeyPair, VaultKey};
use tokio::sync::RwLock;

/// Shared reference to a session's vault key
pub type SharedVaultKey = Arc<RwLock<Option<VaultKey>>>;

pub struct VaultSession {
    user: UserId,
    vault_key: SharedVaultKey,
    identity: RwLock<Option<Arc<IdentityKeyPair>>>,
}

impl VaultSession {
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            vault_key: Arc::new(RwLock::new(None)),
            identity: RwLock::new(None),
        }
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub async fn is_unlocked(&self) -> bool {
        self.vault_key.read().await.is_some()
    }

    /// A copy of the vault key. Fails with `PreconditionFailed` while locked.
    pub async fn vault_key(&self) -> VaultResult<VaultKey> {
        self.vault_key
            .read()
            .await
            .clone()
            .ok_or_else(|| {
                VaultError::PreconditionFailed(format!("vault for {} is locked", self.user))
            })
    }

    /// Drop the vault key and identity. Both are zeroized as they go.
    pub async fn lock(&self) {
        self.vault_key.write().await.take();
        self.identity.write().await.take();
        tracing::info!(user = %self.user, "vault locked");
    }

    pub(crate) async fn install(&self, key: VaultKey) {
        *self.vault_key.write().await = Some(key);
    }

    /// Handle used by the rotation commit, which must outlive its caller.
    pub(crate) fn shared_key(&self) -> SharedVaultKey {
        Arc::clone(&self.vault_key)
    }

    pub(crate) async fn identity(&self) -> Option<Arc<IdentityKeyPair>> {
        self.identity.read().await.clone()
    }

    pub(crate) async fn cache_identity(&self, keypair: Arc<IdentityKeyPair>) {
        *self.identity.write().await = Some(keypair);
    }
}

impl std::fmt::Debug for VaultSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultSession")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}
