//! Reference backend: every collaborator trait over one in-memory
//! [`ServerState`], optionally persisted to JSON.
//!
//! Mutations run against a clone of the state. The clone is flushed to disk
//! (when persistence is on) and only then swapped in, so a rejected request
//! or a failed write leaves the previous state exactly as it was.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use envault_core::config::ServerConfig;
use envault_core::store::{
    GroupStore, IdentityStore, KeyCustody, RecordStore, RekeyGateway, RekeySubmission, ShareStore,
};
use envault_core::types::{
    now_epoch, CodeIssued, GrantId, Group, GroupId, GroupMember, GroupRole, IncomingShare,
    MemberStatus, NewRecord, NewShareGrant, PublishedIdentity, RecordFilter, RecordId,
    RecordUpdate, RewrappedKey, ShareGrant, ShareTarget, SkippedKey, UserId, VaultRecord,
};
use envault_core::{VaultError, VaultResult};
use envault_crypto::SymmetricKey;
use secrecy::SecretString;
use tokio::sync::Mutex;

use crate::credential::{hash_credential, verify_credential};
use crate::custody::{unwrap_vault_key, wrap_vault_key, CustodyEntry};
use crate::secret::{expand_tilde, ServerSecret};
use crate::state::{ServerState, UserEntry};
use crate::verification::{CodeIssuer, CodeSink};

pub struct LocalServer {
    state: Mutex<ServerState>,
    state_file: Option<PathBuf>,
    custody_key: SymmetricKey,
    codes: CodeIssuer,
    sink: Arc<dyn CodeSink>,
}

impl LocalServer {
    /// A backend that never touches disk.
    pub fn in_memory(secret: &ServerSecret, sink: Arc<dyn CodeSink>) -> VaultResult<Self> {
        Self::build(ServerState::default(), None, secret, sink, 600)
    }

    /// Open the backend described by `config`, loading any existing state
    /// file when persistence is enabled.
    pub fn open(
        config: &ServerConfig,
        secret: &ServerSecret,
        sink: Arc<dyn CodeSink>,
    ) -> VaultResult<Self> {
        let (state, state_file) = if config.persist {
            let path = expand_tilde(&config.state_file);
            let state =
                ServerState::load(&path).map_err(|e| VaultError::Storage(format!("{e:#}")))?;
            tracing::info!(
                path = %path.display(),
                users = state.users.len(),
                records = state.records.len(),
                "server state loaded"
            );
            (state, Some(path))
        } else {
            (ServerState::default(), None)
        };
        Self::build(state, state_file, secret, sink, config.verification_ttl_secs)
    }

    fn build(
        state: ServerState,
        state_file: Option<PathBuf>,
        secret: &ServerSecret,
        sink: Arc<dyn CodeSink>,
        ttl_secs: u64,
    ) -> VaultResult<Self> {
        Ok(Self {
            state: Mutex::new(state),
            state_file,
            custody_key: secret.custody_key()?,
            codes: CodeIssuer::new(secret.code_pepper()?, ttl_secs),
            sink,
        })
    }

    /// Override the verification-code lifetime.
    pub fn with_code_ttl(mut self, ttl_secs: u64) -> Self {
        self.codes = self.codes.with_ttl(ttl_secs);
        self
    }

    /// Create an account. The optional credential is stored as an Argon2id hash.
    pub async fn register_user(
        &self,
        user: &UserId,
        credential: Option<SecretString>,
    ) -> VaultResult<()> {
        let credential_hash = match credential {
            Some(credential) => Some(hash_blocking(credential).await?),
            None => None,
        };
        self.mutate(|state| {
            if state.users.contains_key(user) {
                return Err(VaultError::Conflict(format!("user {user} already exists")));
            }
            state.users.insert(
                user.clone(),
                UserEntry {
                    credential_hash,
                    ..Default::default()
                },
            );
            Ok(())
        })
        .await?;
        tracing::info!(%user, "user registered");
        Ok(())
    }

    /// Record a mutual relationship between two users; each may then look
    /// up the other's public key.
    pub async fn connect(&self, a: &UserId, b: &UserId) -> VaultResult<()> {
        self.mutate(|state| {
            if a == b {
                return Err(VaultError::Conflict("cannot connect a user to itself".into()));
            }
            for user in [a, b] {
                if !state.users.contains_key(user) {
                    return Err(VaultError::NotFound(format!("user {user}")));
                }
            }
            if let Some(entry) = state.user_mut(a) {
                entry.contacts.insert(b.clone());
            }
            if let Some(entry) = state.user_mut(b) {
                entry.contacts.insert(a.clone());
            }
            Ok(())
        })
        .await?;
        tracing::info!(%a, %b, "users connected");
        Ok(())
    }

    /// Check a credential against the stored hash. Users without a stored
    /// credential never verify.
    pub async fn check_credential(
        &self,
        user: &UserId,
        credential: &SecretString,
    ) -> VaultResult<bool> {
        let stored = self
            .read(|state| Ok(existing_user(state, user)?.credential_hash.clone()))
            .await?;
        Ok(stored.is_some_and(|phc| verify_credential(credential, &phc)))
    }

    /// A copy of the current state.
    pub async fn snapshot(&self) -> ServerState {
        self.state.lock().await.clone()
    }

    /// Check a re-key code, persisting a miss. The pending code is dropped
    /// once it runs out of attempts.
    async fn redeem_code_attempt(&self, user: &UserId, code: &SecretString) -> VaultResult<()> {
        let accepted = self
            .mutate(|state| {
                let now = now_epoch();
                let entry = state
                    .user_mut(user)
                    .ok_or_else(|| VaultError::NotFound(format!("user {user}")))?;
                let Some(pending) = entry.pending_code.as_mut() else {
                    return Ok(false);
                };
                if self.codes.verify(pending, user, code, now) {
                    return Ok(true);
                }
                if pending.record_miss() {
                    entry.pending_code = None;
                    tracing::warn!(%user, "verification code exhausted");
                }
                Ok(false)
            })
            .await?;
        if accepted {
            Ok(())
        } else {
            Err(VaultError::VerificationExpired)
        }
    }

    async fn read<R, F>(&self, f: F) -> VaultResult<R>
    where
        F: FnOnce(&ServerState) -> VaultResult<R> + Send,
        R: Send,
    {
        let guard = self.state.lock().await;
        f(&guard)
    }

    async fn mutate<R, F>(&self, f: F) -> VaultResult<R>
    where
        F: FnOnce(&mut ServerState) -> VaultResult<R> + Send,
        R: Send,
    {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        let out = f(&mut next)?;
        if let Some(path) = &self.state_file {
            next.save(path)
                .await
                .map_err(|e| VaultError::Storage(format!("{e:#}")))?;
        }
        *guard = next;
        Ok(out)
    }
}

async fn hash_blocking(credential: SecretString) -> VaultResult<String> {
    tokio::task::spawn_blocking(move || hash_credential(&credential))
        .await
        .map_err(|e| VaultError::Other(anyhow::anyhow!("credential hashing task: {e}")))?
}

fn existing_user<'a>(state: &'a ServerState, user: &UserId) -> VaultResult<&'a UserEntry> {
    state
        .user(user)
        .ok_or_else(|| VaultError::NotFound(format!("user {user}")))
}

fn owned_record_mut<'a>(
    state: &'a mut ServerState,
    owner: &UserId,
    id: &RecordId,
) -> VaultResult<&'a mut VaultRecord> {
    state
        .records
        .get_mut(id)
        .filter(|r| &r.owner == owner)
        .ok_or_else(|| VaultError::NotFound(format!("record {id}")))
}

// ── Custody ──────────────────────────────────────────────────────────────

impl KeyCustody for LocalServer {
    async fn fetch_vault_key(&self, user: &UserId) -> VaultResult<Option<SecretString>> {
        let wrapped = self
            .read(|state| {
                Ok(existing_user(state, user)?
                    .custody
                    .as_ref()
                    .map(|c| c.wrapped_vault_key.clone()))
            })
            .await?;
        wrapped
            .map(|w| unwrap_vault_key(&self.custody_key, &w))
            .transpose()
    }

    async fn store_vault_key(
        &self,
        user: &UserId,
        vault_key: SecretString,
        blob: Option<String>,
    ) -> VaultResult<()> {
        let wrapped_vault_key = wrap_vault_key(&self.custody_key, &vault_key)?;
        self.mutate(|state| {
            let entry = state
                .user_mut(user)
                .ok_or_else(|| VaultError::NotFound(format!("user {user}")))?;
            if entry.custody.is_some() {
                return Err(VaultError::Conflict(format!(
                    "vault key for {user} already initialized"
                )));
            }
            entry.custody = Some(CustodyEntry {
                wrapped_vault_key,
                blob,
                updated_at: now_epoch(),
            });
            Ok(())
        })
        .await?;
        tracing::info!(%user, "vault key taken into custody");
        Ok(())
    }
}

// ── Records ──────────────────────────────────────────────────────────────

impl RecordStore for LocalServer {
    async fn list_records(
        &self,
        owner: &UserId,
        filter: &RecordFilter,
    ) -> VaultResult<Vec<VaultRecord>> {
        self.read(|state| {
            existing_user(state, owner)?;
            let mut records: Vec<VaultRecord> = state
                .records
                .values()
                .filter(|r| &r.owner == owner && filter.matches(r))
                .cloned()
                .collect();
            records.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
            Ok(records)
        })
        .await
    }

    async fn get_record(&self, owner: &UserId, id: &RecordId) -> VaultResult<Option<VaultRecord>> {
        self.read(|state| {
            Ok(state
                .records
                .get(id)
                .filter(|r| &r.owner == owner)
                .cloned())
        })
        .await
    }

    async fn create_record(&self, owner: &UserId, record: NewRecord) -> VaultResult<VaultRecord> {
        self.mutate(|state| {
            existing_user(state, owner)?;
            let now = now_epoch();
            let created = VaultRecord {
                id: RecordId::generate(),
                owner: owner.clone(),
                folder: record.folder,
                envelope: record.envelope,
                favorite: record.favorite,
                trashed_at: None,
                created_at: now,
                updated_at: now,
            };
            state.records.insert(created.id.clone(), created.clone());
            Ok(created)
        })
        .await
    }

    async fn update_record(
        &self,
        owner: &UserId,
        id: &RecordId,
        update: RecordUpdate,
    ) -> VaultResult<VaultRecord> {
        self.mutate(|state| {
            let record = owned_record_mut(state, owner, id)?;
            let now = now_epoch();
            match update {
                RecordUpdate::Content(envelope) => record.envelope = envelope,
                RecordUpdate::Trash => {
                    record.trashed_at.get_or_insert(now);
                }
                RecordUpdate::Restore => record.trashed_at = None,
                RecordUpdate::Favorite(favorite) => record.favorite = favorite,
                RecordUpdate::Move(folder) => record.folder = folder,
            }
            record.updated_at = now;
            Ok(record.clone())
        })
        .await
    }

    async fn delete_record(&self, owner: &UserId, id: &RecordId) -> VaultResult<()> {
        self.mutate(|state| {
            owned_record_mut(state, owner, id)?;
            state.records.remove(id);
            state.grants.retain(|g| &g.item != id);
            Ok(())
        })
        .await
    }
}

// ── Identities ───────────────────────────────────────────────────────────

impl IdentityStore for LocalServer {
    async fn publish_identity(
        &self,
        user: &UserId,
        identity: PublishedIdentity,
    ) -> VaultResult<()> {
        self.mutate(|state| {
            let entry = state
                .user_mut(user)
                .ok_or_else(|| VaultError::NotFound(format!("user {user}")))?;
            if entry.identity.is_some() {
                return Err(VaultError::Conflict(format!(
                    "identity for {user} already published"
                )));
            }
            entry.identity = Some(identity);
            Ok(())
        })
        .await?;
        tracing::info!(%user, "identity published");
        Ok(())
    }

    async fn own_identity(&self, user: &UserId) -> VaultResult<Option<PublishedIdentity>> {
        self.read(|state| Ok(existing_user(state, user)?.identity.clone()))
            .await
    }

    async fn public_key_for(
        &self,
        requester: &UserId,
        owner: &UserId,
    ) -> VaultResult<Option<String>> {
        self.read(|state| {
            let related = requester == owner
                || state
                    .user(requester)
                    .is_some_and(|e| e.contacts.contains(owner));
            if !related {
                return Ok(None);
            }
            Ok(state
                .user(owner)
                .and_then(|e| e.identity.as_ref())
                .map(|i| i.public_key.clone()))
        })
        .await
    }
}

// ── Sharing ──────────────────────────────────────────────────────────────

impl ShareStore for LocalServer {
    async fn create_grant(&self, grant: NewShareGrant) -> VaultResult<ShareGrant> {
        let created = self
            .mutate(|state| {
                match state.records.get(&grant.item) {
                    Some(record) if record.owner == grant.sender => {}
                    Some(_) => {
                        return Err(VaultError::Forbidden(
                            "only the owner can share a record".into(),
                        ))
                    }
                    None => return Err(VaultError::NotFound(format!("record {}", grant.item))),
                }
                match &grant.target {
                    ShareTarget::User(user) => {
                        existing_user(state, user)?;
                    }
                    ShareTarget::Group(group_id) => {
                        let group = state
                            .groups
                            .get(group_id)
                            .ok_or_else(|| VaultError::NotFound(format!("group {group_id}")))?;
                        if group.member(&grant.sender).is_none() {
                            return Err(VaultError::Forbidden(format!(
                                "{} is not a member of group {group_id}",
                                grant.sender
                            )));
                        }
                    }
                }
                let created = ShareGrant {
                    id: GrantId::generate(),
                    sender: grant.sender,
                    target: grant.target,
                    item: grant.item,
                    wrapped_item_key: grant.wrapped_item_key,
                    created_at: now_epoch(),
                };
                state.grants.push(created.clone());
                Ok(created)
            })
            .await?;
        tracing::info!(grant = %created.id, item = %created.item, "share grant created");
        Ok(created)
    }

    async fn incoming_grants(&self, user: &UserId) -> VaultResult<Vec<IncomingShare>> {
        self.read(|state| {
            existing_user(state, user)?;
            let addressed = |grant: &ShareGrant| match &grant.target {
                ShareTarget::User(target) => target == user,
                ShareTarget::Group(group_id) => {
                    &grant.sender != user
                        && state
                            .groups
                            .get(group_id)
                            .is_some_and(|g| g.member(user).is_some())
                }
            };
            Ok(state
                .grants
                .iter()
                .filter(|g| addressed(*g))
                .filter_map(|grant| {
                    state.records.get(&grant.item).map(|record| IncomingShare {
                        grant: grant.clone(),
                        record: record.clone(),
                    })
                })
                .collect())
        })
        .await
    }
}

// ── Groups ───────────────────────────────────────────────────────────────

impl GroupStore for LocalServer {
    async fn create_group(
        &self,
        owner: &UserId,
        name: &str,
        owner_wrapped_group_key: String,
    ) -> VaultResult<Group> {
        let group = self
            .mutate(|state| {
                existing_user(state, owner)?;
                let group = Group {
                    id: GroupId::generate(),
                    name: name.to_string(),
                    owner: owner.clone(),
                    members: vec![GroupMember {
                        user: owner.clone(),
                        role: GroupRole::Admin,
                        status: MemberStatus::Active,
                        wrapped_group_key: owner_wrapped_group_key,
                    }],
                    created_at: now_epoch(),
                };
                state.groups.insert(group.id.clone(), group.clone());
                Ok(group)
            })
            .await?;
        tracing::info!(group = %group.id, %owner, "group created");
        Ok(group)
    }

    async fn get_group(&self, id: &GroupId) -> VaultResult<Option<Group>> {
        self.read(|state| Ok(state.groups.get(id).cloned())).await
    }

    async fn add_group_member(
        &self,
        actor: &UserId,
        group: &GroupId,
        member: GroupMember,
    ) -> VaultResult<Group> {
        self.mutate(|state| {
            existing_user(state, &member.user)?;
            let entry = state
                .groups
                .get_mut(group)
                .ok_or_else(|| VaultError::NotFound(format!("group {group}")))?;
            if !entry.is_admin(actor) {
                return Err(VaultError::Forbidden(format!(
                    "{actor} is not an admin of group {group}"
                )));
            }
            if entry.member(&member.user).is_some() {
                return Err(VaultError::Conflict(format!(
                    "{} is already a member of group {group}",
                    member.user
                )));
            }
            entry.members.push(member);
            Ok(entry.clone())
        })
        .await
    }

    async fn accept_membership(&self, user: &UserId, group: &GroupId) -> VaultResult<Group> {
        let joined = self
            .mutate(|state| {
                existing_user(state, user)?;
                let entry = state
                    .groups
                    .get_mut(group)
                    .ok_or_else(|| VaultError::NotFound(format!("group {group}")))?;
                let member = entry
                    .members
                    .iter_mut()
                    .find(|m| &m.user == user)
                    .ok_or_else(|| {
                        VaultError::Forbidden(format!("{user} is not a member of group {group}"))
                    })?;
                if member.status == MemberStatus::Active {
                    return Err(VaultError::Conflict(format!(
                        "{user} is already active in group {group}"
                    )));
                }
                member.status = MemberStatus::Active;
                Ok(entry.clone())
            })
            .await?;
        tracing::info!(%group, %user, "group membership accepted");
        Ok(joined)
    }
}

// ── Re-keying ────────────────────────────────────────────────────────────

impl RekeyGateway for LocalServer {
    async fn request_verification_code(&self, user: &UserId) -> VaultResult<CodeIssued> {
        let (code, expires_at) = self
            .mutate(|state| {
                let entry = state
                    .user_mut(user)
                    .ok_or_else(|| VaultError::NotFound(format!("user {user}")))?;
                let (code, pending) = self.codes.issue(user, now_epoch());
                let expires_at = pending.expires_at;
                // A new code replaces any outstanding one
                entry.pending_code = Some(pending);
                Ok((code, expires_at))
            })
            .await?;
        self.sink.deliver(user, &code, expires_at);
        Ok(CodeIssued { expires_at })
    }

    async fn submit_rekey(&self, user: &UserId, submission: RekeySubmission) -> VaultResult<()> {
        let RekeySubmission {
            verification_code,
            new_credential,
            new_vault_key,
            new_wrapped_private_key,
            records,
            skipped,
        } = submission;

        // Settle the code before paying for Argon2
        self.redeem_code_attempt(user, &verification_code).await?;

        let wrapped_vault_key = wrap_vault_key(&self.custody_key, &new_vault_key)?;
        let credential_hash = hash_blocking(new_credential).await?;
        let record_count = records.len();

        self.mutate(|state| {
            let now = now_epoch();
            let entry = existing_user(state, user)?;

            // The code may have been replaced while the credential was hashed
            let pending = entry
                .pending_code
                .as_ref()
                .ok_or(VaultError::VerificationExpired)?;
            if !self.codes.verify(pending, user, &verification_code, now) {
                return Err(VaultError::VerificationExpired);
            }
            let blob = match &entry.custody {
                Some(custody) => custody.blob.clone(),
                None => {
                    return Err(VaultError::PreconditionFailed(format!(
                        "vault for {user} was never initialized"
                    )))
                }
            };
            match (entry.identity.is_some(), new_wrapped_private_key.is_some()) {
                (true, false) => {
                    return Err(VaultError::PreconditionFailed(
                        "identity private key must be rewrapped in the same re-key".into(),
                    ))
                }
                (false, true) => {
                    return Err(VaultError::PreconditionFailed(
                        "no published identity to rewrap".into(),
                    ))
                }
                _ => {}
            }
            check_rekey_coverage(state, user, &records, &skipped)?;

            for rewrapped in &records {
                let record = owned_record_mut(state, user, &rewrapped.record_id)?;
                record.envelope.encrypted_item_key = rewrapped.wrapped_item_key.clone();
                record.updated_at = now;
            }

            let entry = state
                .user_mut(user)
                .ok_or_else(|| VaultError::NotFound(format!("user {user}")))?;
            if let (Some(identity), Some(wrapped)) =
                (entry.identity.as_mut(), new_wrapped_private_key)
            {
                identity.wrapped_private_key = wrapped;
            }
            entry.custody = Some(CustodyEntry {
                wrapped_vault_key,
                blob,
                updated_at: now,
            });
            entry.credential_hash = Some(credential_hash);
            entry.pending_code = None;
            Ok(())
        })
        .await?;

        tracing::info!(%user, records = record_count, skipped = skipped.len(), "re-key committed");
        Ok(())
    }
}

/// A re-key must account for every record the user owns, each against the
/// wrapper the client collected. A record edited, created or deleted since
/// collection would otherwise be left under a key nobody holds.
fn check_rekey_coverage(
    state: &ServerState,
    user: &UserId,
    records: &[RewrappedKey],
    skipped: &[SkippedKey],
) -> VaultResult<()> {
    let collected = records
        .iter()
        .map(|r| (&r.record_id, &r.previous_wrapped_item_key))
        .chain(skipped.iter().map(|s| (&s.record_id, &s.wrapped_item_key)));

    let mut covered = BTreeSet::new();
    for (id, seen_wrapper) in collected {
        let record = match state.records.get(id) {
            Some(record) if &record.owner == user => record,
            Some(_) => {
                return Err(VaultError::Forbidden(format!(
                    "record {id} is not owned by {user}"
                )))
            }
            None => {
                return Err(VaultError::Conflict(format!(
                    "record {id} was deleted after collection"
                )))
            }
        };
        if &record.envelope.encrypted_item_key != seen_wrapper {
            return Err(VaultError::Conflict(format!(
                "record {id} changed after collection"
            )));
        }
        if !covered.insert(id) {
            return Err(VaultError::Conflict(format!("record {id} submitted twice")));
        }
    }

    if let Some(missing) = state
        .records
        .values()
        .find(|r| &r.owner == user && !covered.contains(&r.id))
    {
        return Err(VaultError::Conflict(format!(
            "record {} was added after collection",
            missing.id
        )));
    }
    Ok(())
}
