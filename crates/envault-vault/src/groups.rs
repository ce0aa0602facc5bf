//! Groups: one symmetric group key per group, RSA-wrapped for each member

use envault_core::store::VaultBackend;
use envault_core::types::{Group, GroupId, GroupMember, GroupRole, MemberStatus, UserId};
use envault_core::{VaultError, VaultResult};
use envault_crypto::identity::import_public_key;
use envault_crypto::{unwrap_key_with_private, wrap_key_for_recipient, GroupKey};

use crate::VaultClient;

impl<B: VaultBackend + 'static> VaultClient<B> {
    /// Create a group with this user as its only (admin) member.
    pub async fn create_group(&self, name: &str) -> VaultResult<Group> {
        let identity = self.ensure_identity().await?;
        let group_key = GroupKey::generate();
        let wrapped = wrap_key_for_recipient(&group_key, &identity.public)?;
        self.backend.create_group(self.user(), name, wrapped).await
    }

    /// Admit `user` to a group this user administers. The group key is
    /// unwrapped from the admin's own member entry and wrapped fresh for
    /// the new member's public key.
    pub async fn add_group_member(
        &self,
        group_id: &GroupId,
        user: &UserId,
        role: GroupRole,
    ) -> VaultResult<Group> {
        let actor = self.user();
        let group = self
            .backend
            .get_group(group_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("group {group_id}")))?;

        if !group.is_admin(actor) {
            return Err(VaultError::Forbidden(format!(
                "{actor} is not an admin of group {group_id}"
            )));
        }
        if group.member(user).is_some() {
            return Err(VaultError::Conflict(format!(
                "{user} is already a member of group {group_id}"
            )));
        }

        let public_key = self
            .backend
            .public_key_for(actor, user)
            .await?
            .ok_or_else(|| {
                VaultError::PreconditionFailed(format!(
                    "{user} has no public key visible to {actor}"
                ))
            })?;
        let public_key = import_public_key(&public_key)?;

        let group_key = self.group_key(&group).await?;
        let member = GroupMember {
            user: user.clone(),
            role,
            status: MemberStatus::Invited,
            wrapped_group_key: wrap_key_for_recipient(&group_key, &public_key)?,
        };

        let group = self.backend.add_group_member(actor, group_id, member).await?;
        tracing::info!(group = %group_id, member = %user, ?role, "group member added");
        Ok(group)
    }

    /// Accept an invitation. The wrapped group key is opened first, so an
    /// invitation this user cannot read is never marked active.
    pub async fn join_group(&self, group_id: &GroupId) -> VaultResult<Group> {
        let group = self
            .backend
            .get_group(group_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("group {group_id}")))?;
        self.group_key(&group).await?;

        let group = self.backend.accept_membership(self.user(), group_id).await?;
        tracing::info!(group = %group_id, user = %self.user(), "joined group");
        Ok(group)
    }

    /// Unwrap the group key from this user's member entry.
    pub(crate) async fn group_key(&self, group: &Group) -> VaultResult<GroupKey> {
        let member = group.member(self.user()).ok_or_else(|| {
            VaultError::Forbidden(format!("{} is not a member of group {}", self.user(), group.id))
        })?;
        let identity = self.ensure_identity().await?;
        Ok(unwrap_key_with_private(&member.wrapped_group_key, &identity.private)?)
    }
}
