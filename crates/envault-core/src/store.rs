//! Collaborator interfaces consumed by the key-management core.
//!
//! Everything behind these traits (persistence, authentication, the social
//! graph, notification delivery) is outside the core. All key and ciphertext
//! material crosses them base64-encoded.

use std::future::Future;

use secrecy::SecretString;

use crate::error::VaultResult;
use crate::types::{
    CodeIssued, Group, GroupId, GroupMember, IncomingShare, NewRecord, NewShareGrant,
    PublishedIdentity, RecordFilter, RecordId, RecordUpdate, RewrappedKey, ShareGrant, SkippedKey,
    UserId, VaultRecord,
};

/// Server-side custody of each user's vault key.
pub trait KeyCustody: Send + Sync {
    /// Return the user's vault key (base64 raw bytes), or `None` if the vault
    /// has never been initialized.
    fn fetch_vault_key(
        &self,
        user: &UserId,
    ) -> impl Future<Output = VaultResult<Option<SecretString>>> + Send;

    /// Store a vault key, wrapped under the server secret. `blob` is an
    /// optional opaque payload kept alongside it.
    fn store_vault_key(
        &self,
        user: &UserId,
        vault_key: SecretString,
        blob: Option<String>,
    ) -> impl Future<Output = VaultResult<()>> + Send;
}

/// Persistence of encrypted records.
pub trait RecordStore: Send + Sync {
    fn list_records(
        &self,
        owner: &UserId,
        filter: &RecordFilter,
    ) -> impl Future<Output = VaultResult<Vec<VaultRecord>>> + Send;

    fn get_record(
        &self,
        owner: &UserId,
        id: &RecordId,
    ) -> impl Future<Output = VaultResult<Option<VaultRecord>>> + Send;

    fn create_record(
        &self,
        owner: &UserId,
        record: NewRecord,
    ) -> impl Future<Output = VaultResult<VaultRecord>> + Send;

    fn update_record(
        &self,
        owner: &UserId,
        id: &RecordId,
        update: RecordUpdate,
    ) -> impl Future<Output = VaultResult<VaultRecord>> + Send;

    /// Permanently delete a record.
    fn delete_record(
        &self,
        owner: &UserId,
        id: &RecordId,
    ) -> impl Future<Output = VaultResult<()>> + Send;
}

/// Publication and lookup of identity keys.
pub trait IdentityStore: Send + Sync {
    fn publish_identity(
        &self,
        user: &UserId,
        identity: PublishedIdentity,
    ) -> impl Future<Output = VaultResult<()>> + Send;

    fn own_identity(
        &self,
        user: &UserId,
    ) -> impl Future<Output = VaultResult<Option<PublishedIdentity>>> + Send;

    /// The public key of `owner` as visible to `requester`. `None` when the
    /// owner has not published one or the requester holds no relationship
    /// reference to the owner.
    fn public_key_for(
        &self,
        requester: &UserId,
        owner: &UserId,
    ) -> impl Future<Output = VaultResult<Option<String>>> + Send;
}

/// Share grants.
pub trait ShareStore: Send + Sync {
    fn create_grant(
        &self,
        grant: NewShareGrant,
    ) -> impl Future<Output = VaultResult<ShareGrant>> + Send;

    /// Grants addressed to `user` directly or to any group `user` belongs to,
    /// joined with the current ciphertext of the referenced record.
    fn incoming_grants(
        &self,
        user: &UserId,
    ) -> impl Future<Output = VaultResult<Vec<IncomingShare>>> + Send;
}

/// Group membership and per-member group-key wrappers.
pub trait GroupStore: Send + Sync {
    /// Create a group whose only member is `owner` as admin.
    fn create_group(
        &self,
        owner: &UserId,
        name: &str,
        owner_wrapped_group_key: String,
    ) -> impl Future<Output = VaultResult<Group>> + Send;

    fn get_group(&self, id: &GroupId) -> impl Future<Output = VaultResult<Option<Group>>> + Send;

    /// Add a member. `actor` must be an admin of the group.
    fn add_group_member(
        &self,
        actor: &UserId,
        group: &GroupId,
        member: GroupMember,
    ) -> impl Future<Output = VaultResult<Group>> + Send;

    /// Move `user` from invited to active. Fails with `Forbidden` for a
    /// non-member and `Conflict` when already active.
    fn accept_membership(
        &self,
        user: &UserId,
        group: &GroupId,
    ) -> impl Future<Output = VaultResult<Group>> + Send;
}

/// Everything the receiver needs to swap a user's vault key in one step
pub struct RekeySubmission {
    pub verification_code: SecretString,
    pub new_credential: SecretString,
    /// base64 raw bytes of the new vault key (wrapped server-side on receipt)
    pub new_vault_key: SecretString,
    /// Private key rewrapped under the new vault key, if the user has an identity
    pub new_wrapped_private_key: Option<String>,
    /// Must name every record the user owns, either here or in `skipped`
    pub records: Vec<RewrappedKey>,
    /// Records left behind under `skip_failed`
    pub skipped: Vec<SkippedKey>,
}

impl std::fmt::Debug for RekeySubmission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RekeySubmission")
            .field("records", &self.records.len())
            .field("skipped", &self.skipped.len())
            .field(
                "new_wrapped_private_key",
                &self.new_wrapped_private_key.is_some(),
            )
            .finish_non_exhaustive()
    }
}

/// Verification-code issuance and the transactional re-key endpoint.
pub trait RekeyGateway: Send + Sync {
    /// Issue a fresh single-use code to the user's out-of-band channel.
    fn request_verification_code(
        &self,
        user: &UserId,
    ) -> impl Future<Output = VaultResult<CodeIssued>> + Send;

    /// Verify the code and apply the whole submission atomically: either the
    /// new vault key, credential, private-key wrapper and every record wrapper
    /// are committed together, or nothing changes. A submission that no
    /// longer matches the stored records (one edited, created or deleted
    /// since collection) is refused with `Conflict`.
    fn submit_rekey(
        &self,
        user: &UserId,
        submission: RekeySubmission,
    ) -> impl Future<Output = VaultResult<()>> + Send;
}

/// The full set of collaborators a vault client talks to.
pub trait VaultBackend:
    KeyCustody + RecordStore + IdentityStore + ShareStore + GroupStore + RekeyGateway
{
}

impl<T> VaultBackend for T where
    T: KeyCustody + RecordStore + IdentityStore + ShareStore + GroupStore + RekeyGateway
{
}
