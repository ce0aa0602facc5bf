//! envault-server: the server half of vault-key custody.
//!
//! - [`secret`]: server secret discovery and the keys derived from it
//! - [`custody`]: vault keys at rest, wrapped under the custody key
//! - [`credential`]: Argon2id hashing of submitted credentials
//! - [`verification`]: single-use codes gating a re-key
//! - [`local`]: [`LocalServer`], a JSON-backed implementation of every
//!   collaborator trait in `envault_core::store`

pub mod credential;
pub mod custody;
pub mod local;
pub mod secret;
pub mod state;
pub mod verification;

pub use local::LocalServer;
pub use secret::{find_server_secret, generate_server_secret, SecretProvider, ServerSecret};
pub use verification::{CodeSink, LogCodeSink, MemoryCodeSink, MAX_CODE_ATTEMPTS};
