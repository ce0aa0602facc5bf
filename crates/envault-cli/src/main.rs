//! envault: password vault CLI over the local reference backend
//!
//! Account commands:
//!   secret generate        - print a fresh base64 server secret
//!   register               - create an account and initialize its vault
//!   connect <user>         - make two users visible to each other for sharing
//!   rotate                 - rotate the vault key (verification code + new credential)
//!
//! Item commands:
//!   add / list / show / edit / trash / restore / rm
//!
//! Sharing commands:
//!   share <id> --to <user> | --group <id>
//!   inbox                  - list and decrypt items shared with you
//!   group create|add|join

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use envault_core::config::{EnvaultConfig, RotationPolicy};
use envault_core::types::{FolderId, GroupId, GroupRole, RecordFilter, RecordId, UserId};
use envault_server::{find_server_secret, generate_server_secret, CodeSink, LocalServer};
use envault_vault::{Unlocked, VaultClient};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "envault",
    version,
    about = "envault password vault",
    long_about = "envault: client-side encrypted password vault with sharing and key rotation"
)]
struct Cli {
    /// Path to envault.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "ENVAULT_CONFIG",
        default_value = "/etc/envault/envault.toml"
    )]
    config: PathBuf,

    /// Acting user (overrides [client] user)
    #[arg(long, short = 'u', env = "ENVAULT_USER")]
    user: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "ENVAULT_LOG")]
    log: Option<String>,

    /// Log format (json, text)
    #[arg(long, env = "ENVAULT_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Server secret management
    Secret {
        #[command(subcommand)]
        action: SecretAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Create an account for the acting user and initialize its vault
    Register {
        /// Do not set a credential (it is set on the first rotation)
        #[arg(long)]
        no_credential: bool,
    },

    /// Connect with another user so each can share with the other
    Connect { other: String },

    // ── Items ──────────────────────────────────────────────────────────────────

    /// Add a login entry (the password is prompted)
    Add {
        title: String,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long, short = 'f')]
        folder: Option<String>,
        /// Store the entry without a password
        #[arg(long)]
        no_password: bool,
    },

    /// List entries
    List {
        /// List trashed entries instead of live ones
        #[arg(long)]
        trash: bool,
        #[arg(long, short = 'f')]
        folder: Option<String>,
    },

    /// Show one entry
    Show {
        id: String,
        /// Print the password instead of masking it
        #[arg(long)]
        reveal: bool,
    },

    /// Change an entry. The entry is re-encrypted under a new item key, so
    /// earlier shares of it stop working.
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        /// Prompt for a new password
        #[arg(long)]
        password: bool,
        /// Mark or unmark as favorite
        #[arg(long)]
        favorite: Option<bool>,
        /// Move to a folder
        #[arg(long)]
        folder: Option<String>,
    },

    /// Move an entry to the trash
    Trash { id: String },

    /// Restore an entry from the trash
    Restore { id: String },

    /// Permanently delete an entry and every share of it
    Rm { id: String },

    // ── Sharing ────────────────────────────────────────────────────────────────

    /// Share an entry with a user or a group
    Share {
        id: String,
        /// Recipient user
        #[arg(long, conflicts_with = "group", required_unless_present = "group")]
        to: Option<String>,
        /// Recipient group id
        #[arg(long)]
        group: Option<String>,
    },

    /// List and decrypt entries shared with the acting user
    Inbox {
        #[arg(long)]
        reveal: bool,
    },

    /// Group management
    Group {
        #[command(subcommand)]
        action: GroupAction,
    },

    // ── Key rotation ───────────────────────────────────────────────────────────

    /// Rotate the vault key. A verification code is issued first and must be
    /// entered together with a new credential.
    Rotate {
        /// Commit the entries that re-wrap and leave the rest unreadable
        #[arg(long)]
        skip_failed: bool,
    },
}

#[derive(Subcommand, Debug)]
enum SecretAction {
    /// Print a fresh random server secret (base64)
    Generate,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Subcommand, Debug)]
enum GroupAction {
    /// Create a group with the acting user as admin
    Create { name: String },
    /// Add a member to a group the acting user administers
    Add {
        group: String,
        member: String,
        #[arg(long, default_value = "viewer")]
        role: RoleArg,
    },
    /// Accept an invitation to a group
    Join { group: String },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RoleArg {
    Admin,
    Editor,
    Viewer,
}

impl From<RoleArg> for GroupRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Admin => GroupRole::Admin,
            RoleArg::Editor => GroupRole::Editor,
            RoleArg::Viewer => GroupRole::Viewer,
        }
    }
}

/// The plaintext of one vault entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Entry {
    title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    notes: Option<String>,
}

impl Entry {
    fn masked(&self, reveal: bool) -> Entry {
        let mut shown = self.clone();
        if !reveal && shown.password.is_some() {
            shown.password = Some("********".into());
        }
        shown
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = EnvaultConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    init_logging(&cli, &config);
    if !cli.config.exists() {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "envault starting"
    );

    let user = cli.user.clone().or_else(|| config.client.user.clone());

    match cli.command {
        Commands::Secret { action: SecretAction::Generate } => cmd_secret_generate(),
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
        Commands::Register { no_credential } => {
            cmd_register(&config, acting_user(user)?, no_credential).await
        }
        Commands::Connect { other } => cmd_connect(&config, acting_user(user)?, &other).await,
        Commands::Add {
            title,
            username,
            url,
            notes,
            folder,
            no_password,
        } => {
            let password = if no_password {
                None
            } else {
                Some(prompt_secret("Password: ")?.expose_secret().to_string())
            };
            let entry = Entry {
                title,
                username,
                password,
                url,
                notes,
            };
            cmd_add(&config, acting_user(user)?, entry, folder).await
        }
        Commands::List { trash, folder } => {
            cmd_list(&config, acting_user(user)?, trash, folder).await
        }
        Commands::Show { id, reveal } => cmd_show(&config, acting_user(user)?, &id, reveal).await,
        Commands::Edit {
            id,
            title,
            username,
            url,
            notes,
            password,
            favorite,
            folder,
        } => {
            let edit = EntryEdit {
                title,
                username,
                url,
                notes,
                password: if password {
                    Some(prompt_secret("New password: ")?)
                } else {
                    None
                },
                favorite,
                folder,
            };
            cmd_edit(&config, acting_user(user)?, &id, edit).await
        }
        Commands::Trash { id } => cmd_trash(&config, acting_user(user)?, &id).await,
        Commands::Restore { id } => cmd_restore(&config, acting_user(user)?, &id).await,
        Commands::Rm { id } => cmd_rm(&config, acting_user(user)?, &id).await,
        Commands::Share { id, to, group } => {
            cmd_share(&config, acting_user(user)?, &id, to, group).await
        }
        Commands::Inbox { reveal } => cmd_inbox(&config, acting_user(user)?, reveal).await,
        Commands::Group { action: GroupAction::Create { name } } => {
            cmd_group_create(&config, acting_user(user)?, &name).await
        }
        Commands::Group { action: GroupAction::Add { group, member, role } } => {
            cmd_group_add(&config, acting_user(user)?, &group, &member, role.into()).await
        }
        Commands::Group { action: GroupAction::Join { group } } => {
            cmd_group_join(&config, acting_user(user)?, &group).await
        }
        Commands::Rotate { skip_failed } => {
            let policy = if skip_failed {
                RotationPolicy::SkipFailed
            } else {
                config.rekey.policy
            };
            cmd_rotate(&config, acting_user(user)?, policy).await
        }
    }
}

fn init_logging(cli: &Cli, config: &EnvaultConfig) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = cli.log.as_deref().unwrap_or(&config.log.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let format = cli.log_format.clone().unwrap_or_else(|| {
        match config.log.format.as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        }
    });

    // Logs go to stderr; stdout carries command output
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Backend and client helpers ────────────────────────────────────────────────

/// Delivers verification codes to the person at the terminal.
struct TerminalCodeSink;

impl CodeSink for TerminalCodeSink {
    fn deliver(&self, user: &UserId, code: &SecretString, expires_at: u64) {
        eprintln!(
            "verification code for {user}: {}  (expires at unix time {expires_at})",
            code.expose_secret()
        );
    }
}

fn acting_user(user: Option<String>) -> Result<UserId> {
    match user {
        Some(user) if !user.is_empty() => Ok(UserId::from(user)),
        _ => bail!(
            "no acting user\n\
             Pass --user, set ENVAULT_USER, or set [client] user in envault.toml"
        ),
    }
}

async fn open_server(config: &EnvaultConfig) -> Result<Arc<LocalServer>> {
    let provider = find_server_secret(&config.server)
        .await
        .context("loading server secret")?;
    info!(source = %provider.source, "server secret loaded");

    let server = LocalServer::open(&config.server, &provider.secret, Arc::new(TerminalCodeSink))
        .context("opening server state")?;
    Ok(Arc::new(server))
}

async fn unlocked_client(config: &EnvaultConfig, user: UserId) -> Result<VaultClient<LocalServer>> {
    let server = open_server(config).await?;
    let client = VaultClient::new(server, user).with_policy(config.rekey.policy);
    client.unlock().await.context("unlocking vault")?;
    Ok(client)
}

fn prompt_secret(prompt: &str) -> Result<SecretString> {
    let value = rpassword::prompt_password(prompt).context("reading from terminal")?;
    Ok(SecretString::from(value))
}

/// Prompt twice and require both entries to match.
fn prompt_new_credential() -> Result<SecretString> {
    let first = prompt_secret("New credential: ")?;
    let second = prompt_secret("Repeat credential: ")?;
    if first.expose_secret() != second.expose_secret() {
        bail!("credentials do not match");
    }
    if first.expose_secret().is_empty() {
        bail!("credential must not be empty");
    }
    Ok(first)
}

// ── `envault secret generate` ─────────────────────────────────────────────────

fn cmd_secret_generate() -> Result<()> {
    let secret = generate_server_secret();
    println!("{}", secret.expose_secret());
    eprintln!(
        "Store this in a file and point ENVAULT_SERVER_SECRET_FILE or [server] secret_file at it."
    );
    Ok(())
}

// ── `envault config show` ─────────────────────────────────────────────────────

fn cmd_config_show(config: &EnvaultConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── Account ───────────────────────────────────────────────────────────────────

async fn cmd_register(config: &EnvaultConfig, user: UserId, no_credential: bool) -> Result<()> {
    let credential = if no_credential {
        None
    } else {
        Some(prompt_new_credential()?)
    };

    let server = open_server(config).await?;
    server
        .register_user(&user, credential)
        .await
        .with_context(|| format!("registering {user}"))?;

    let client = VaultClient::new(server, user.clone());
    match client.unlock().await.context("initializing vault")? {
        Unlocked::Initialized => println!("Vault initialized for {user}"),
        Unlocked::Opened => println!("Vault for {user} already existed"),
    }
    client
        .ensure_identity()
        .await
        .context("publishing identity key")?;
    println!("Identity key published");
    Ok(())
}

async fn cmd_connect(config: &EnvaultConfig, user: UserId, other: &str) -> Result<()> {
    let other = UserId::from(other);
    let server = open_server(config).await?;
    server
        .connect(&user, &other)
        .await
        .with_context(|| format!("connecting {user} and {other}"))?;
    println!("{user} and {other} are connected");
    Ok(())
}

// ── Items ─────────────────────────────────────────────────────────────────────

async fn cmd_add(
    config: &EnvaultConfig,
    user: UserId,
    entry: Entry,
    folder: Option<String>,
) -> Result<()> {
    let client = unlocked_client(config, user).await?;
    let record = client
        .create_item(&entry, folder.map(FolderId::from))
        .await
        .context("creating entry")?;
    println!("{}", record.id);
    Ok(())
}

async fn cmd_list(
    config: &EnvaultConfig,
    user: UserId,
    trash: bool,
    folder: Option<String>,
) -> Result<()> {
    let client = unlocked_client(config, user).await?;
    let filter = RecordFilter {
        folder: folder.map(FolderId::from),
        trashed: Some(trash),
    };
    let entries = client
        .list_items::<Entry>(&filter)
        .await
        .context("listing entries")?;

    if entries.is_empty() {
        println!("(no entries)");
        return Ok(());
    }
    for item in entries {
        let star = if item.record.favorite { "*" } else { " " };
        let folder = item
            .record
            .folder
            .as_ref()
            .map(|f| format!("  [{f}]"))
            .unwrap_or_default();
        match item.content {
            Ok(entry) => println!("{star} {}  {}{folder}", item.record.id, entry.title),
            Err(e) => println!("{star} {}  <unreadable: {e}>{folder}", item.record.id),
        }
    }
    Ok(())
}

async fn cmd_show(config: &EnvaultConfig, user: UserId, id: &str, reveal: bool) -> Result<()> {
    let client = unlocked_client(config, user).await?;
    let (record, entry) = client
        .get_item::<Entry>(&RecordId::from(id))
        .await
        .with_context(|| format!("reading entry {id}"))?;

    let rendered = serde_json::to_string_pretty(&entry.masked(reveal)).context("rendering entry")?;
    println!("{rendered}");
    if record.is_trashed() {
        println!("(in trash)");
    }
    Ok(())
}

struct EntryEdit {
    title: Option<String>,
    username: Option<String>,
    url: Option<String>,
    notes: Option<String>,
    password: Option<SecretString>,
    favorite: Option<bool>,
    folder: Option<String>,
}

impl EntryEdit {
    fn changes_content(&self) -> bool {
        self.title.is_some()
            || self.username.is_some()
            || self.url.is_some()
            || self.notes.is_some()
            || self.password.is_some()
    }
}

async fn cmd_edit(config: &EnvaultConfig, user: UserId, id: &str, edit: EntryEdit) -> Result<()> {
    let client = unlocked_client(config, user).await?;
    let id = RecordId::from(id);

    if edit.changes_content() {
        let (_, mut entry) = client
            .get_item::<Entry>(&id)
            .await
            .with_context(|| format!("reading entry {id}"))?;
        if let Some(title) = edit.title {
            entry.title = title;
        }
        if let Some(username) = edit.username {
            entry.username = Some(username);
        }
        if let Some(url) = edit.url {
            entry.url = Some(url);
        }
        if let Some(notes) = edit.notes {
            entry.notes = Some(notes);
        }
        if let Some(password) = edit.password {
            entry.password = Some(password.expose_secret().to_string());
        }
        client
            .edit_item(&id, &entry)
            .await
            .with_context(|| format!("re-encrypting entry {id}"))?;
        println!("Entry {id} updated (earlier shares of it no longer decrypt)");
    }
    if let Some(favorite) = edit.favorite {
        client.set_favorite(&id, favorite).await?;
        println!("Entry {id} favorite: {favorite}");
    }
    if let Some(folder) = edit.folder {
        let folder = (!folder.is_empty()).then(|| FolderId::from(folder));
        client.move_item(&id, folder).await?;
        println!("Entry {id} moved");
    }
    Ok(())
}

async fn cmd_trash(config: &EnvaultConfig, user: UserId, id: &str) -> Result<()> {
    let client = unlocked_client(config, user).await?;
    client.trash_item(&RecordId::from(id)).await?;
    println!("Entry {id} moved to trash");
    Ok(())
}

async fn cmd_restore(config: &EnvaultConfig, user: UserId, id: &str) -> Result<()> {
    let client = unlocked_client(config, user).await?;
    client.restore_item(&RecordId::from(id)).await?;
    println!("Entry {id} restored");
    Ok(())
}

async fn cmd_rm(config: &EnvaultConfig, user: UserId, id: &str) -> Result<()> {
    let client = unlocked_client(config, user).await?;
    client.delete_item(&RecordId::from(id)).await?;
    println!("Entry {id} deleted");
    Ok(())
}

// ── Sharing ───────────────────────────────────────────────────────────────────

async fn cmd_share(
    config: &EnvaultConfig,
    user: UserId,
    id: &str,
    to: Option<String>,
    group: Option<String>,
) -> Result<()> {
    let client = unlocked_client(config, user).await?;
    let id = RecordId::from(id);

    let grant = match (to, group) {
        (Some(recipient), None) => client
            .share_with_user(&id, &UserId::from(recipient))
            .await
            .context("sharing with user")?,
        (None, Some(group)) => client
            .share_with_group(&id, &GroupId::from(group))
            .await
            .context("sharing with group")?,
        _ => bail!("pass exactly one of --to or --group"),
    };
    println!("Shared {id} (grant {})", grant.id);
    Ok(())
}

async fn cmd_inbox(config: &EnvaultConfig, user: UserId, reveal: bool) -> Result<()> {
    let client = unlocked_client(config, user).await?;
    let shares = client
        .incoming_shares::<Entry>()
        .await
        .context("reading incoming shares")?;

    if shares.is_empty() {
        println!("(nothing shared with you)");
        return Ok(());
    }
    for share in shares {
        println!("── {} from {} (grant {})", share.record.id, share.grant.sender, share.grant.id);
        match share.content {
            Ok(entry) => {
                let rendered = serde_json::to_string_pretty(&entry.masked(reveal))
                    .context("rendering entry")?;
                println!("{rendered}");
            }
            Err(e) => println!("<unreadable: {e}; ask the sender to share it again>"),
        }
    }
    Ok(())
}

async fn cmd_group_create(config: &EnvaultConfig, user: UserId, name: &str) -> Result<()> {
    let client = unlocked_client(config, user).await?;
    let group = client.create_group(name).await.context("creating group")?;
    println!("{}", group.id);
    Ok(())
}

async fn cmd_group_add(
    config: &EnvaultConfig,
    user: UserId,
    group: &str,
    member: &str,
    role: GroupRole,
) -> Result<()> {
    let client = unlocked_client(config, user).await?;
    let group = client
        .add_group_member(&GroupId::from(group), &UserId::from(member), role)
        .await
        .context("adding group member")?;
    println!("{member} added to {} ({} members)", group.name, group.members.len());
    Ok(())
}

async fn cmd_group_join(config: &EnvaultConfig, user: UserId, group: &str) -> Result<()> {
    let client = unlocked_client(config, user).await?;
    let group = client
        .join_group(&GroupId::from(group))
        .await
        .context("joining group")?;
    println!("joined {}", group.name);
    Ok(())
}

// ── `envault rotate` ──────────────────────────────────────────────────────────

async fn cmd_rotate(config: &EnvaultConfig, user: UserId, policy: RotationPolicy) -> Result<()> {
    let client = unlocked_client(config, user).await?;

    client
        .request_verification_code()
        .await
        .context("requesting verification code")?;
    let code = prompt_secret("Verification code: ")?;
    let credential = prompt_new_credential()?;

    let outcome = client
        .rotate_vault_key_with_policy(code, credential, policy)
        .await
        .context("rotating vault key")?;

    println!(
        "Vault key rotated: {} entries re-wrapped{}",
        outcome.migrated.len(),
        if outcome.identity_rewrapped {
            ", identity key re-wrapped"
        } else {
            ""
        }
    );
    if !outcome.failed.is_empty() {
        println!(
            "{} entries could not be re-wrapped and are now unreadable:",
            outcome.failed.len()
        );
        for id in &outcome.failed {
            println!("  {id}");
        }
    }
    Ok(())
}
