//! envault-crypto: client-side envelope encryption for envault
//!
//! All primitives run on the client; the server only ever stores the
//! ciphertext and wrapped keys this crate produces.
//!
//! Key hierarchy:
//! ```text
//! Vault Key (256-bit random, per user, held by server custody)
//!   ├── Item Key (per record, 256-bit random, fresh on every edit)
//!   │   └── Record content: AES-256-GCM (key=item_key, nonce=random_96bit)
//!   ├── Identity private key (RSA-2048, PKCS#8 DER, AES-256-GCM under the vault key)
//!   └── Group Key (per group, RSA-OAEP wrapped for each member)
//!       └── Item keys shared to the group (AES-256-GCM under the group key)
//! ```
//!
//! Sharing to a user: the item key is RSA-OAEP-SHA256 wrapped to the
//! recipient's published public key.

pub mod cipher;
pub mod envelope;
mod error;
pub mod identity;
pub mod keys;

pub use cipher::{decrypt, encrypt};
pub use envelope::{
    create_item, read_item, read_item_with_key, rewrap, unwrap_item_key, update_item, wrap_key,
};
pub use error::{CryptoError, CryptoResult};
pub use identity::{
    publish_identity, unlock_identity, unwrap_key_with_private, wrap_key_for_recipient,
    IdentityKeyPair,
};
pub use keys::{export_key, import_key, GroupKey, ItemKey, SymmetricKey, VaultKey};

/// Size of every symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// RSA modulus size for identity keypairs
pub const RSA_BITS: usize = 2048;
