//! Unlock and record operations

use envault_core::store::VaultBackend;
use envault_core::types::{FolderId, NewRecord, RecordFilter, RecordId, RecordUpdate, VaultRecord};
use envault_core::{VaultError, VaultResult};
use envault_crypto::{envelope, VaultKey};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::VaultClient;

/// One listed record with its own decryption result
#[derive(Debug)]
pub struct ItemEntry<T> {
    pub record: VaultRecord,
    pub content: VaultResult<T>,
}

/// Whether `unlock` found an existing vault or created one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unlocked {
    Opened,
    Initialized,
}

impl<B: VaultBackend + 'static> VaultClient<B> {
    /// Fetch the vault key from custody into the session. On first access a
    /// fresh key is generated and handed to custody.
    pub async fn unlock(&self) -> VaultResult<Unlocked> {
        self.unlock_with_blob(None).await
    }

    /// As [`unlock`](Self::unlock); `blob` is stored alongside the vault key
    /// if this call initializes the vault.
    pub async fn unlock_with_blob(&self, blob: Option<String>) -> VaultResult<Unlocked> {
        let user = self.user();
        match self.backend.fetch_vault_key(user).await? {
            Some(encoded) => {
                let key = VaultKey::from_base64(&encoded)?;
                self.session.install(key).await;
                tracing::info!(%user, "vault unlocked");
                Ok(Unlocked::Opened)
            }
            None => {
                let key = VaultKey::generate();
                self.backend
                    .store_vault_key(user, key.to_base64(), blob)
                    .await?;
                self.session.install(key).await;
                tracing::info!(%user, "vault initialized");
                Ok(Unlocked::Initialized)
            }
        }
    }

    pub async fn lock(&self) {
        self.session.lock().await;
    }

    pub async fn create_item<T: Serialize>(
        &self,
        content: &T,
        folder: Option<FolderId>,
    ) -> VaultResult<VaultRecord> {
        let vault_key = self.session.vault_key().await?;
        let envelope = envelope::create_item(&vault_key, content)?;
        let record = self
            .backend
            .create_record(
                self.user(),
                NewRecord {
                    folder,
                    envelope,
                    favorite: false,
                },
            )
            .await?;
        tracing::debug!(record = %record.id, "item created");
        Ok(record)
    }

    /// Decrypt a record this user owns.
    pub async fn read_item<T: DeserializeOwned>(&self, record: &VaultRecord) -> VaultResult<T> {
        let vault_key = self.session.vault_key().await?;
        Ok(envelope::read_item(&vault_key, &record.envelope)?)
    }

    pub async fn get_item<T: DeserializeOwned>(
        &self,
        id: &RecordId,
    ) -> VaultResult<(VaultRecord, T)> {
        let record = self.fetch_owned(id).await?;
        let content = self.read_item(&record).await?;
        Ok((record, content))
    }

    /// Replace a record's content. The record gets a brand-new item key, so
    /// any earlier share of it no longer decrypts.
    pub async fn edit_item<T: Serialize>(
        &self,
        id: &RecordId,
        content: &T,
    ) -> VaultResult<VaultRecord> {
        let vault_key = self.session.vault_key().await?;
        let envelope = envelope::update_item(&vault_key, content)?;
        let record = self
            .backend
            .update_record(self.user(), id, RecordUpdate::Content(envelope))
            .await?;
        tracing::debug!(record = %record.id, "item re-encrypted");
        Ok(record)
    }

    /// List and decrypt. A record that fails to decrypt is reported in its
    /// own entry and never hides the others.
    pub async fn list_items<T: DeserializeOwned>(
        &self,
        filter: &RecordFilter,
    ) -> VaultResult<Vec<ItemEntry<T>>> {
        let vault_key = self.session.vault_key().await?;
        let records = self.backend.list_records(self.user(), filter).await?;

        Ok(records
            .into_iter()
            .map(|record| {
                let content = envelope::read_item(&vault_key, &record.envelope).map_err(|e| {
                    tracing::warn!(record = %record.id, "record failed to decrypt");
                    VaultError::from(e)
                });
                ItemEntry { record, content }
            })
            .collect())
    }

    pub async fn trash_item(&self, id: &RecordId) -> VaultResult<VaultRecord> {
        self.backend
            .update_record(self.user(), id, RecordUpdate::Trash)
            .await
    }

    pub async fn restore_item(&self, id: &RecordId) -> VaultResult<VaultRecord> {
        self.backend
            .update_record(self.user(), id, RecordUpdate::Restore)
            .await
    }

    pub async fn set_favorite(&self, id: &RecordId, favorite: bool) -> VaultResult<VaultRecord> {
        self.backend
            .update_record(self.user(), id, RecordUpdate::Favorite(favorite))
            .await
    }

    pub async fn move_item(
        &self,
        id: &RecordId,
        folder: Option<FolderId>,
    ) -> VaultResult<VaultRecord> {
        self.backend
            .update_record(self.user(), id, RecordUpdate::Move(folder))
            .await
    }

    /// Permanently delete a record and every grant that refers to it.
    pub async fn delete_item(&self, id: &RecordId) -> VaultResult<()> {
        self.backend.delete_record(self.user(), id).await?;
        tracing::info!(record = %id, "item deleted");
        Ok(())
    }

    pub(crate) async fn fetch_owned(&self, id: &RecordId) -> VaultResult<VaultRecord> {
        self.backend
            .get_record(self.user(), id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("record {id}")))
    }
}
