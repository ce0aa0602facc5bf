//! envault-vault: the client side of the key hierarchy.
//!
//! A [`VaultClient`] acts for one user against any [`VaultBackend`]. All
//! encryption and decryption happens here; the backend only sees
//! ciphertext and wrapped keys.
//!
//! - [`items`]: unlock, record create/read/edit/list and lifecycle
//! - [`sharing`]: identity keypair and per-user share grants
//! - [`groups`]: group keys and group membership
//! - [`rekey`]: vault-key rotation

pub mod groups;
pub mod items;
pub mod rekey;
pub mod session;
pub mod sharing;

use std::sync::{Arc, Mutex as StdMutex};

use envault_core::config::RotationPolicy;
use envault_core::store::VaultBackend;
use envault_core::types::UserId;
use tokio::sync::Mutex;

pub use items::{ItemEntry, Unlocked};
pub use rekey::{RekeyState, RotationOutcome};
pub use session::{SharedVaultKey, VaultSession};
pub use sharing::SharedItem;

pub struct VaultClient<B> {
    backend: Arc<B>,
    session: VaultSession,
    policy: RotationPolicy,
    /// Held for the whole of a rotation; `try_lock` refuses a second one.
    rotation: Mutex<RekeyState>,
    /// Expiry of the last verification code this client requested
    code_expires_at: StdMutex<Option<u64>>,
}

impl<B: VaultBackend + 'static> VaultClient<B> {
    pub fn new(backend: Arc<B>, user: UserId) -> Self {
        Self {
            backend,
            session: VaultSession::new(user),
            policy: RotationPolicy::default(),
            rotation: Mutex::new(RekeyState::Idle),
            code_expires_at: StdMutex::new(None),
        }
    }

    /// Set how a rotation treats records whose item key cannot be unwrapped.
    pub fn with_policy(mut self, policy: RotationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn user(&self) -> &UserId {
        self.session.user()
    }

    pub fn session(&self) -> &VaultSession {
        &self.session
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn policy(&self) -> RotationPolicy {
        self.policy
    }
}
