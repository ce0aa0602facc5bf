//! Identity keypair and share grants.
//!
//! Sharing never re-encrypts content: the recipient receives the record's
//! existing item key, wrapped either to their RSA public key or under a
//! group key they can unwrap.

use std::collections::HashMap;
use std::sync::Arc;

use envault_core::store::VaultBackend;
use envault_core::types::{
    GroupId, NewShareGrant, RecordId, ShareGrant, ShareTarget, UserId, VaultRecord,
};
use envault_core::{VaultError, VaultResult};
use envault_crypto::identity::import_public_key;
use envault_crypto::{
    envelope, publish_identity, unlock_identity, unwrap_key_with_private, wrap_key_for_recipient,
    GroupKey, IdentityKeyPair, ItemKey,
};
use serde::de::DeserializeOwned;

use crate::VaultClient;

/// An incoming grant with its own decryption result
#[derive(Debug)]
pub struct SharedItem<T> {
    pub grant: ShareGrant,
    pub record: VaultRecord,
    pub content: VaultResult<T>,
}

impl<B: VaultBackend + 'static> VaultClient<B> {
    /// The user's identity keypair, unlocked once per session. Generated and
    /// published on first use.
    pub async fn ensure_identity(&self) -> VaultResult<Arc<IdentityKeyPair>> {
        if let Some(keypair) = self.session.identity().await {
            return Ok(keypair);
        }

        let vault_key = self.session.vault_key().await?;
        let user = self.user();

        let keypair = match self.backend.own_identity(user).await? {
            Some(published) => unlock_identity(&vault_key, &published)?,
            None => {
                let keypair = tokio::task::spawn_blocking(IdentityKeyPair::generate)
                    .await
                    .map_err(|e| VaultError::Other(anyhow::anyhow!("key generation task: {e}")))??;
                let published = publish_identity(&vault_key, &keypair)?;
                match self.backend.publish_identity(user, published).await {
                    Ok(()) => keypair,
                    // Another session of this user published first; use theirs
                    Err(VaultError::Conflict(_)) => {
                        let published = self.backend.own_identity(user).await?.ok_or_else(|| {
                            VaultError::NotFound(format!("identity for {user}"))
                        })?;
                        unlock_identity(&vault_key, &published)?
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        let keypair = Arc::new(keypair);
        self.session.cache_identity(Arc::clone(&keypair)).await;
        Ok(keypair)
    }

    /// Grant `recipient` read access to one record.
    ///
    /// Fails with `PreconditionFailed` before anything is wrapped when the
    /// recipient has no public key visible to this user.
    pub async fn share_with_user(
        &self,
        item: &RecordId,
        recipient: &UserId,
    ) -> VaultResult<ShareGrant> {
        let user = self.user();
        let public_key = self
            .backend
            .public_key_for(user, recipient)
            .await?
            .ok_or_else(|| {
                VaultError::PreconditionFailed(format!(
                    "{recipient} has no public key visible to {user}"
                ))
            })?;
        let public_key = import_public_key(&public_key)?;

        let item_key = self.own_item_key(item).await?;
        let wrapped_item_key = wrap_key_for_recipient(&item_key, &public_key)?;

        self.backend
            .create_grant(NewShareGrant {
                sender: user.clone(),
                target: ShareTarget::User(recipient.clone()),
                item: item.clone(),
                wrapped_item_key,
            })
            .await
    }

    /// Grant every member of `group` read access to one record.
    pub async fn share_with_group(
        &self,
        item: &RecordId,
        group_id: &GroupId,
    ) -> VaultResult<ShareGrant> {
        let group = self
            .backend
            .get_group(group_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("group {group_id}")))?;
        let group_key = self.group_key(&group).await?;

        let item_key = self.own_item_key(item).await?;
        let wrapped_item_key = envelope::wrap_key(&group_key, &item_key)?;

        self.backend
            .create_grant(NewShareGrant {
                sender: self.user().clone(),
                target: ShareTarget::Group(group_id.clone()),
                item: item.clone(),
                wrapped_item_key,
            })
            .await
    }

    /// Resolve every grant addressed to this user. Each grant carries its
    /// own result: a stale or corrupt grant does not hide the others.
    pub async fn incoming_shares<T: DeserializeOwned>(&self) -> VaultResult<Vec<SharedItem<T>>> {
        let identity = self.ensure_identity().await?;
        let incoming = self.backend.incoming_grants(self.user()).await?;
        let mut group_keys: HashMap<GroupId, GroupKey> = HashMap::new();

        let mut resolved = Vec::with_capacity(incoming.len());
        for share in incoming {
            let item_key = match &share.grant.target {
                ShareTarget::User(_) => {
                    unwrap_key_with_private(&share.grant.wrapped_item_key, &identity.private)
                        .map_err(VaultError::from)
                }
                ShareTarget::Group(group_id) => {
                    self.cached_group_key(&mut group_keys, group_id)
                        .await
                        .and_then(|group_key| {
                            let wrapped = &share.grant.wrapped_item_key;
                            Ok(envelope::unwrap_item_key(&group_key, wrapped)?)
                        })
                }
            };
            let content = item_key.and_then(|key| {
                Ok(envelope::read_item_with_key(
                    &key,
                    &share.record.envelope.encrypted_data,
                )?)
            });
            if content.is_err() {
                tracing::warn!(
                    grant = %share.grant.id,
                    item = %share.grant.item,
                    "share failed to resolve"
                );
            }
            resolved.push(SharedItem {
                grant: share.grant,
                record: share.record,
                content,
            });
        }
        Ok(resolved)
    }

    async fn cached_group_key(
        &self,
        cache: &mut HashMap<GroupId, GroupKey>,
        group_id: &GroupId,
    ) -> VaultResult<GroupKey> {
        if let Some(key) = cache.get(group_id) {
            return Ok(key.clone());
        }
        let group = self
            .backend
            .get_group(group_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("group {group_id}")))?;
        let key = self.group_key(&group).await?;
        cache.insert(group_id.clone(), key.clone());
        Ok(key)
    }

    async fn own_item_key(&self, item: &RecordId) -> VaultResult<ItemKey> {
        let record = self.fetch_owned(item).await?;
        let vault_key = self.session.vault_key().await?;
        Ok(envelope::unwrap_item_key(&vault_key, &record.envelope.encrypted_item_key)?)
    }
}
