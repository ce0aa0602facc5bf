//! Server state and its JSON persistence.
//!
//! The whole state is one serde document. It is flushed atomically via
//! temp file + rename, so a reader never observes a half-written file.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use envault_core::types::{
    Group, GroupId, PublishedIdentity, RecordId, ShareGrant, UserId, VaultRecord,
};
use serde::{Deserialize, Serialize};

use crate::custody::CustodyEntry;
use crate::verification::PendingCode;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserEntry {
    #[serde(default)]
    pub custody: Option<CustodyEntry>,
    /// Argon2id PHC string
    #[serde(default)]
    pub credential_hash: Option<String>,
    #[serde(default)]
    pub identity: Option<PublishedIdentity>,
    /// Users this user holds a relationship reference to
    #[serde(default)]
    pub contacts: BTreeSet<UserId>,
    #[serde(default)]
    pub pending_code: Option<PendingCode>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerState {
    #[serde(default)]
    pub users: BTreeMap<UserId, UserEntry>,
    #[serde(default)]
    pub records: BTreeMap<RecordId, VaultRecord>,
    #[serde(default)]
    pub grants: Vec<ShareGrant>,
    #[serde(default)]
    pub groups: BTreeMap<GroupId, Group>,
}

impl ServerState {
    /// Load state from a JSON file. A missing file is an empty state.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading server state: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing server state: {}", path.display()))
    }

    /// Write state to `path` using an atomic write (write then rename).
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating state dir: {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(self).context("serializing server state")?;

        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, json.as_bytes())
            .await
            .with_context(|| format!("writing server state temp: {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .with_context(|| format!("renaming server state: {}", path.display()))?;

        tracing::debug!(path = %path.display(), "server state flushed");
        Ok(())
    }

    pub fn user(&self, user: &UserId) -> Option<&UserEntry> {
        self.users.get(user)
    }

    pub fn user_mut(&mut self, user: &UserId) -> Option<&mut UserEntry> {
        self.users.get_mut(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envault_core::types::Envelope;

    fn sample_state() -> ServerState {
        let mut state = ServerState::default();
        let alice = UserId::from("alice");
        state.users.insert(alice.clone(), UserEntry::default());
        let id = RecordId::from("r1");
        state.records.insert(
            id.clone(),
            VaultRecord {
                id,
                owner: alice,
                folder: None,
                envelope: Envelope {
                    encrypted_data: "d".into(),
                    encrypted_item_key: "k".into(),
                },
                favorite: true,
                trashed_at: None,
                created_at: 1,
                updated_at: 2,
            },
        );
        state
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state.json");

        sample_state().save(&path).await.unwrap();
        assert!(!path.with_extension("tmp").exists());

        let loaded = ServerState::load(&path).unwrap();
        assert_eq!(loaded.records.len(), 1);
        assert!(loaded.records[&RecordId::from("r1")].favorite);
        assert!(loaded.user(&UserId::from("alice")).is_some());
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = ServerState::load(&dir.path().join("none.json")).unwrap();
        assert!(state.users.is_empty());
        assert!(state.records.is_empty());
    }

    #[test]
    fn test_load_corrupt_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(ServerState::load(&path).is_err());
    }
}
