//! Shared fixtures: an in-memory `LocalServer` with a memory code sink and
//! a few registered users.

#![allow(dead_code)]

use std::sync::Arc;

use envault_core::store::RecordStore;
use envault_core::types::{Envelope, RecordId, RecordUpdate, UserId};
use envault_crypto::{encrypt, VaultKey};
use envault_server::{generate_server_secret, LocalServer, MemoryCodeSink, ServerSecret};
use envault_vault::VaultClient;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

pub struct World {
    pub server: Arc<LocalServer>,
    pub sink: Arc<MemoryCodeSink>,
}

impl World {
    pub fn client(&self, name: &str) -> VaultClient<LocalServer> {
        VaultClient::new(Arc::clone(&self.server), UserId::from(name))
    }

    pub async fn unlocked(&self, name: &str) -> VaultClient<LocalServer> {
        let client = self.client(name);
        client.unlock().await.unwrap();
        client
    }

    /// Request a code through `client` and read it back from the sink.
    pub async fn fresh_code(&self, client: &VaultClient<LocalServer>) -> SecretString {
        client.request_verification_code().await.unwrap();
        self.sink.latest(client.user()).unwrap()
    }

    /// Replace a record's item-key wrapper with one under an unrelated key.
    pub async fn corrupt_item_key(&self, owner: &str, id: &RecordId) {
        let owner = UserId::from(owner);
        let record = self.server.get_record(&owner, id).await.unwrap().unwrap();
        let bogus = encrypt(&VaultKey::generate(), &[0u8; 32]).unwrap();
        self.server
            .update_record(
                &owner,
                id,
                RecordUpdate::Content(Envelope {
                    encrypted_data: record.envelope.encrypted_data,
                    encrypted_item_key: bogus,
                }),
            )
            .await
            .unwrap();
    }
}

pub fn server_secret() -> ServerSecret {
    ServerSecret::from_base64(generate_server_secret().expose_secret()).unwrap()
}

pub async fn world(users: &[&str]) -> World {
    let sink = Arc::new(MemoryCodeSink::new());
    let server = LocalServer::in_memory(&server_secret(), sink.clone()).unwrap();
    populate(server, sink, users).await
}

pub async fn populate(server: LocalServer, sink: Arc<MemoryCodeSink>, users: &[&str]) -> World {
    for name in users {
        server
            .register_user(&UserId::from(*name), Some(SecretString::from("initial")))
            .await
            .unwrap();
    }
    World {
        server: Arc::new(server),
        sink,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Login {
    pub title: String,
    pub username: String,
    pub password: String,
}

pub fn login(title: &str) -> Login {
    Login {
        title: title.to_string(),
        username: format!("{title}@example.com"),
        password: format!("pw-{title}"),
    }
}
