use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{VaultError, VaultResult};

/// Top-level configuration (loaded from envault.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvaultConfig {
    pub log: LogConfig,
    pub server: ServerConfig,
    pub rekey: RekeyConfig,
    pub client: ClientConfig,
}

impl EnvaultConfig {
    /// Load configuration from a TOML file, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> VaultResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| VaultError::Config(format!("parsing {}: {e}", path.display())))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// JSON state file for the local backend
    pub state_file: PathBuf,
    /// File holding the base64 server custody secret
    pub secret_file: Option<PathBuf>,
    /// Lifetime of a re-key verification code in seconds (default: 600)
    pub verification_ttl_secs: u64,
    /// Write state to `state_file` after every mutation (default: true)
    pub persist: bool,
}

/// What to do when some item keys cannot be unwrapped during re-keying
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationPolicy {
    /// Refuse to commit anything if a single record fails
    #[default]
    Abort,
    /// Commit the records that migrated; the failed ones become unreadable
    SkipFailed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RekeyConfig {
    pub policy: RotationPolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Acting user for CLI commands
    pub user: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("~/.local/share/envault/state.json"),
            secret_file: None,
            verification_ttl_secs: 600,
            persist: true,
        }
    }
}
