//! envault-core: shared types, configuration, errors, and the collaborator
//! traits the key-management core consumes.

pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use error::{VaultError, VaultResult};
