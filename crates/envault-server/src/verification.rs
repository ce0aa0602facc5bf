//! Single-use verification codes gating a re-key.
//!
//! Codes are 6 decimal digits, delivered out of band through a [`CodeSink`]
//! and stored only as a peppered SHA-256 digest. Comparison is constant time.
//! A code stops verifying after [`MAX_CODE_ATTEMPTS`] wrong guesses.

use std::collections::HashMap;
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use envault_core::types::UserId;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

pub const CODE_DIGITS: usize = 6;
pub const MAX_CODE_ATTEMPTS: u32 = 5;

/// Out-of-band delivery channel for verification codes (mail, SMS, ...).
pub trait CodeSink: Send + Sync {
    fn deliver(&self, user: &UserId, code: &SecretString, expires_at: u64);
}

/// Keeps the last code per user in memory. For tests and local tooling.
#[derive(Default)]
pub struct MemoryCodeSink {
    codes: Mutex<HashMap<UserId, SecretString>>,
}

impl MemoryCodeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self, user: &UserId) -> Option<SecretString> {
        self.codes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(user)
            .cloned()
    }
}

impl CodeSink for MemoryCodeSink {
    fn deliver(&self, user: &UserId, code: &SecretString, _expires_at: u64) {
        self.codes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(user.clone(), code.clone());
    }
}

/// Records that a code was issued without revealing it.
pub struct LogCodeSink;

impl CodeSink for LogCodeSink {
    fn deliver(&self, user: &UserId, _code: &SecretString, expires_at: u64) {
        tracing::info!(%user, expires_at, "verification code issued");
    }
}

/// The stored form of an outstanding code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCode {
    /// base64 SHA-256(pepper || user || code)
    pub digest: String,
    pub expires_at: u64,
    /// Wrong guesses so far
    #[serde(default)]
    pub attempts: u32,
}

impl PendingCode {
    /// Count a wrong guess. Returns true once the code is used up.
    pub fn record_miss(&mut self) -> bool {
        self.attempts = self.attempts.saturating_add(1);
        self.is_exhausted()
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= MAX_CODE_ATTEMPTS
    }
}

/// Mints and checks codes for one server secret.
pub struct CodeIssuer {
    pepper: Zeroizing<[u8; 32]>,
    ttl_secs: u64,
}

impl CodeIssuer {
    pub fn new(pepper: [u8; 32], ttl_secs: u64) -> Self {
        Self {
            pepper: Zeroizing::new(pepper),
            ttl_secs,
        }
    }

    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Mint a fresh code for `user`. Returns the plaintext (for delivery)
    /// and the digest to store.
    pub fn issue(&self, user: &UserId, now: u64) -> (SecretString, PendingCode) {
        let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
        let code = SecretString::from(format!("{n:0width$}", width = CODE_DIGITS));
        let pending = PendingCode {
            digest: self.digest(user, code.expose_secret()),
            expires_at: now.saturating_add(self.ttl_secs),
            attempts: 0,
        };
        (code, pending)
    }

    /// True when `code` matches `pending`, which has neither expired nor
    /// run out of attempts.
    pub fn verify(
        &self,
        pending: &PendingCode,
        user: &UserId,
        code: &SecretString,
        now: u64,
    ) -> bool {
        if now >= pending.expires_at || pending.is_exhausted() {
            return false;
        }
        let candidate = self.digest(user, code.expose_secret().trim());
        candidate
            .as_bytes()
            .ct_eq(pending.digest.as_bytes())
            .into()
    }

    fn digest(&self, user: &UserId, code: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.pepper.as_slice());
        hasher.update(user.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(code.as_bytes());
        STANDARD.encode(hasher.finalize())
    }
}
