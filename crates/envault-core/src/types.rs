use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mint a fresh random (UUID v4) identifier.
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

id_type!(
    /// Reference to a user account (owned by the authentication subsystem)
    UserId
);
id_type!(
    /// Identifier of a single vault record
    RecordId
);
id_type!(FolderId);
id_type!(GroupId);
id_type!(GrantId);

/// The two ciphertext fields of a record.
///
/// Both halves are produced together by the envelope manager and must be
/// persisted together: a content blob is only readable through the item key
/// wrapped next to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// base64(nonce || ciphertext || tag) of the serialized content, under the item key
    pub encrypted_data: String,
    /// base64(nonce || ciphertext || tag) of the raw item key, under the vault key
    pub encrypted_item_key: String,
}

/// A stored vault record as seen by its owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRecord {
    pub id: RecordId,
    pub owner: UserId,
    #[serde(default)]
    pub folder: Option<FolderId>,
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default)]
    pub favorite: bool,
    /// Unix timestamp when the record was moved to trash
    #[serde(default)]
    pub trashed_at: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl VaultRecord {
    pub fn is_trashed(&self) -> bool {
        self.trashed_at.is_some()
    }
}

/// Payload for creating a record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRecord {
    pub folder: Option<FolderId>,
    pub envelope: Envelope,
    pub favorite: bool,
}

/// A single mutation of an existing record.
///
/// Content changes carry a whole `Envelope`, so the ciphertext and its item
/// key can only ever be replaced as a pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecordUpdate {
    Content(Envelope),
    Trash,
    Restore,
    Favorite(bool),
    Move(Option<FolderId>),
}

/// Listing filter: folder scope plus trash state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub folder: Option<FolderId>,
    /// `Some(true)` lists only trashed records, `Some(false)` only live ones,
    /// `None` lists everything (used when re-keying).
    pub trashed: Option<bool>,
}

impl RecordFilter {
    /// Live (non-trashed) records in every folder
    pub fn live() -> Self {
        Self {
            folder: None,
            trashed: Some(false),
        }
    }

    pub fn trash() -> Self {
        Self {
            folder: None,
            trashed: Some(true),
        }
    }

    /// Every record the owner has, trashed or not
    pub fn all() -> Self {
        Self::default()
    }

    pub fn in_folder(folder: FolderId) -> Self {
        Self {
            folder: Some(folder),
            trashed: Some(false),
        }
    }

    pub fn matches(&self, record: &VaultRecord) -> bool {
        if let Some(folder) = &self.folder {
            if record.folder.as_ref() != Some(folder) {
                return false;
            }
        }
        match self.trashed {
            Some(trashed) => record.is_trashed() == trashed,
            None => true,
        }
    }
}

/// A user's published identity: plaintext public key plus the private key
/// wrapped under that user's vault key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedIdentity {
    /// base64 SPKI DER
    pub public_key: String,
    /// base64(nonce || ciphertext || tag) of the PKCS#8 DER private key
    pub wrapped_private_key: String,
}

/// Who a grant is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareTarget {
    User(UserId),
    Group(GroupId),
}

/// An item key made available to someone other than the record owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareGrant {
    pub id: GrantId,
    pub sender: UserId,
    pub target: ShareTarget,
    pub item: RecordId,
    /// For user targets: RSA-OAEP(recipient public key, raw item key), base64.
    /// For group targets: AES-GCM(group key, raw item key), base64.
    pub wrapped_item_key: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewShareGrant {
    pub sender: UserId,
    pub target: ShareTarget,
    pub item: RecordId,
    pub wrapped_item_key: String,
}

/// An incoming grant joined with the record ciphertext it refers to
#[derive(Debug, Clone)]
pub struct IncomingShare {
    pub grant: ShareGrant,
    pub record: VaultRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupRole {
    Admin,
    Editor,
    Viewer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Invited,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub user: UserId,
    pub role: GroupRole,
    pub status: MemberStatus,
    /// RSA-OAEP(member public key, raw group key), base64
    pub wrapped_group_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub owner: UserId,
    pub members: Vec<GroupMember>,
    pub created_at: u64,
}

impl Group {
    pub fn member(&self, user: &UserId) -> Option<&GroupMember> {
        self.members.iter().find(|m| &m.user == user)
    }

    pub fn is_admin(&self, user: &UserId) -> bool {
        self.member(user)
            .is_some_and(|m| m.role == GroupRole::Admin)
    }
}

/// Replacement item-key wrapper for one record during re-keying
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewrappedKey {
    pub record_id: RecordId,
    /// The wrapper this replacement was derived from. The commit is refused
    /// if the stored wrapper no longer matches it.
    pub previous_wrapped_item_key: String,
    pub wrapped_item_key: String,
}

/// A record deliberately left under the old vault key, with the wrapper
/// that failed to unwrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedKey {
    pub record_id: RecordId,
    pub wrapped_item_key: String,
}

/// Acknowledgement that a verification code was issued and delivered
/// out of band
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeIssued {
    /// Unix timestamp after which the code is no longer accepted
    pub expires_at: u64,
}

/// Current Unix time in seconds
pub fn now_epoch() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(folder: Option<&str>, trashed_at: Option<u64>) -> VaultRecord {
        VaultRecord {
            id: RecordId::generate(),
            owner: UserId::from("alice"),
            folder: folder.map(FolderId::from),
            envelope: Envelope {
                encrypted_data: "data".into(),
                encrypted_item_key: "key".into(),
            },
            favorite: false,
            trashed_at,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(RecordId::generate(), RecordId::generate());
    }

    #[test]
    fn test_filter_live_and_trash() {
        let live = record(None, None);
        let trashed = record(None, Some(100));

        assert!(RecordFilter::live().matches(&live));
        assert!(!RecordFilter::live().matches(&trashed));
        assert!(RecordFilter::trash().matches(&trashed));
        assert!(RecordFilter::all().matches(&live));
        assert!(RecordFilter::all().matches(&trashed));
    }

    #[test]
    fn test_filter_folder() {
        let in_work = record(Some("work"), None);
        let unfiled = record(None, None);
        let filter = RecordFilter::in_folder(FolderId::from("work"));

        assert!(filter.matches(&in_work));
        assert!(!filter.matches(&unfiled));
    }

    #[test]
    fn test_record_json_flattens_envelope() {
        let rec = record(None, None);
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["encrypted_data"], "data");
        assert_eq!(json["encrypted_item_key"], "key");

        let back: VaultRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn test_group_admin_lookup() {
        let group = Group {
            id: GroupId::generate(),
            name: "ops".into(),
            owner: UserId::from("alice"),
            members: vec![
                GroupMember {
                    user: UserId::from("alice"),
                    role: GroupRole::Admin,
                    status: MemberStatus::Active,
                    wrapped_group_key: "k1".into(),
                },
                GroupMember {
                    user: UserId::from("bob"),
                    role: GroupRole::Viewer,
                    status: MemberStatus::Invited,
                    wrapped_group_key: "k2".into(),
                },
            ],
            created_at: 0,
        };

        assert!(group.is_admin(&UserId::from("alice")));
        assert!(!group.is_admin(&UserId::from("bob")));
        assert!(!group.is_admin(&UserId::from("carol")));
    }
}
