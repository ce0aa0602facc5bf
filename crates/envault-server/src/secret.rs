//! Server custody secret: discovery chain and derived keys

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use envault_core::config::ServerConfig;
use envault_core::{VaultError, VaultResult};
use envault_crypto::{SymmetricKey, KEY_SIZE};
use hkdf::Hkdf;
use rand::RngCore;
use secrecy::SecretString;
use sha2::Sha256;
use zeroize::Zeroizing;

/// Minimum decoded length of a server secret
pub const MIN_SECRET_LEN: usize = 32;

const CUSTODY_INFO: &[u8] = b"envault-custody-v1";
const CODE_INFO: &[u8] = b"envault-code-v1";

/// Raw server secret bytes. Zeroized on drop.
pub struct ServerSecret {
    bytes: Zeroizing<Vec<u8>>,
}

impl ServerSecret {
    pub fn from_base64(encoded: &str) -> VaultResult<Self> {
        let bytes = Zeroizing::new(
            STANDARD
                .decode(encoded.trim())
                .map_err(|e| VaultError::KeyFormat(format!("server secret base64: {e}")))?,
        );
        if bytes.len() < MIN_SECRET_LEN {
            return Err(VaultError::KeyFormat(format!(
                "server secret must be at least {MIN_SECRET_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self { bytes })
    }

    /// Key that wraps every custodied vault key.
    pub fn custody_key(&self) -> VaultResult<SymmetricKey> {
        self.derive(CUSTODY_INFO).map(SymmetricKey::from_bytes)
    }

    /// Pepper mixed into stored verification-code hashes.
    pub fn code_pepper(&self) -> VaultResult<[u8; KEY_SIZE]> {
        self.derive(CODE_INFO)
    }

    fn derive(&self, info: &[u8]) -> VaultResult<[u8; KEY_SIZE]> {
        let hkdf = Hkdf::<Sha256>::new(None, &self.bytes);
        let mut okm = [0u8; KEY_SIZE];
        hkdf.expand(info, &mut okm)
            .map_err(|e| VaultError::Other(anyhow::anyhow!("HKDF expand failed: {e}")))?;
        Ok(okm)
    }
}

impl std::fmt::Debug for ServerSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSecret")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a new base64 server secret for bootstrapping a deployment.
pub fn generate_server_secret() -> SecretString {
    let mut bytes = Zeroizing::new([0u8; MIN_SECRET_LEN]);
    rand::thread_rng().fill_bytes(&mut bytes[..]);
    SecretString::from(STANDARD.encode(&bytes[..]))
}

/// A loaded server secret and where it came from
#[derive(Debug)]
pub struct SecretProvider {
    pub secret: ServerSecret,
    pub source: String,
}

/// Discover and load the server secret using the priority chain:
///   1. $CREDENTIALS_DIRECTORY/envault-server-secret  (systemd credential injection)
///   2. $ENVAULT_SERVER_SECRET_FILE  (explicit path env var)
///   3. $ENVAULT_SERVER_SECRET  (literal base64 in env var)
///   4. config.secret_file path (from envault.toml)
pub async fn find_server_secret(config: &ServerConfig) -> Result<SecretProvider> {
    find_server_secret_with(config, |name| std::env::var(name).ok()).await
}

async fn find_server_secret_with<F>(config: &ServerConfig, env: F) -> Result<SecretProvider>
where
    F: Fn(&str) -> Option<String>,
{
    // 1. systemd credentials directory
    if let Some(cred_dir) = env("CREDENTIALS_DIRECTORY") {
        let path = PathBuf::from(&cred_dir).join("envault-server-secret");
        if path.exists() {
            return load_file(&path, format!("systemd:{}", path.display())).await;
        }
    }

    // 2. ENVAULT_SERVER_SECRET_FILE env var
    if let Some(secret_file) = env("ENVAULT_SERVER_SECRET_FILE") {
        let path = PathBuf::from(&secret_file);
        if path.exists() {
            return load_file(&path, format!("ENVAULT_SERVER_SECRET_FILE:{}", path.display()))
                .await;
        }
    }

    // 3. ENVAULT_SERVER_SECRET env var (literal content)
    if let Some(content) = env("ENVAULT_SERVER_SECRET") {
        if !content.is_empty() {
            let secret = ServerSecret::from_base64(&content)
                .context("parsing $ENVAULT_SERVER_SECRET")?;
            return Ok(SecretProvider {
                secret,
                source: "ENVAULT_SERVER_SECRET (env)".into(),
            });
        }
    }

    // 4. Explicit config path
    if let Some(secret_path) = &config.secret_file {
        let expanded = expand_tilde(secret_path);
        if expanded.exists() {
            return load_file(&expanded, format!("config:{}", expanded.display())).await;
        }
    }

    anyhow::bail!(
        "no server secret found. Tried: $CREDENTIALS_DIRECTORY/envault-server-secret, \
         $ENVAULT_SERVER_SECRET_FILE, $ENVAULT_SERVER_SECRET, and server.secret_file. \
         Run: envault secret generate"
    )
}

async fn load_file(path: &Path, source: String) -> Result<SecretProvider> {
    let content = Zeroizing::new(
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading server secret: {}", path.display()))?,
    );
    let secret = ServerSecret::from_base64(&content)
        .with_context(|| format!("parsing server secret: {}", path.display()))?;
    tracing::debug!(%source, "server secret loaded");
    Ok(SecretProvider { secret, source })
}

pub(crate) fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(rest) = path.to_str().and_then(|s| s.strip_prefix("~/")) {
        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"));
        return home.join(rest);
    }
    path.to_path_buf()
}
