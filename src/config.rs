use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Flashcard study server with likes, training history and statistics.
#[derive(Parser, Debug, Clone)]
#[command(name = "flashcards")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "FLASHCARDS_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the server (default if no command given).
    Serve {
        /// Address to bind the server to.
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// User management commands.
    User {
        /// User subcommand action.
        #[command(subcommand)]
        action: UserCommand,
    },

    /// Initialize database, storage and default config.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },
}

/// User management subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum UserCommand {
    /// Add a new user.
    Add {
        /// Username.
        username: String,
        /// Login email.
        email: String,
        /// Password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
    },

    /// List all users.
    List,
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Picture storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Request limits.
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)),
        8080,
    )
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/flashcards.db")
}

/// Picture storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory holding one subdirectory per bucket.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data/blobs")
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Registration mode: "open", "disabled".
    #[serde(default = "default_registration")]
    pub registration: String,

    /// Secret signing access tokens (random per process when empty).
    #[serde(default)]
    pub access_secret: String,

    /// Secret signing refresh tokens (random per process when empty).
    #[serde(default)]
    pub refresh_secret: String,

    /// Access token lifetime in hours.
    #[serde(default = "default_access_expiry_hours")]
    pub access_expiry_hours: u32,

    /// Refresh token lifetime in hours.
    #[serde(default = "default_refresh_expiry_hours")]
    pub refresh_expiry_hours: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            registration: default_registration(),
            access_secret: String::new(),
            refresh_secret: String::new(),
            access_expiry_hours: default_access_expiry_hours(),
            refresh_expiry_hours: default_refresh_expiry_hours(),
        }
    }
}

fn default_registration() -> String {
    "open".to_string()
}

fn default_access_expiry_hours() -> u32 {
    2
}

fn default_refresh_expiry_hours() -> u32 {
    168
}

impl AuthConfig {
    /// Check if registration is enabled.
    pub fn registration_enabled(&self) -> bool {
        self.registration == "open"
    }
}

/// Request limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Deadline applied to every storage operation.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Largest accepted picture upload in bytes.
    #[serde(default = "default_max_picture_bytes")]
    pub max_picture_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_request_timeout(),
            max_picture_bytes: default_max_picture_bytes(),
        }
    }
}

fn default_request_timeout() -> u64 {
    10
}

fn default_max_picture_bytes() -> usize {
    5 * 1024 * 1024
}

impl LimitsConfig {
    /// Per-operation timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &PathBuf) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        toml::from_str(&content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("flashcards.toml"),
            dirs::config_dir()
                .map(|p| p.join("flashcards").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/flashcards/config.toml"),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# flashcards configuration

[server]
bind = "0.0.0.0:8080"

[database]
# path = "/var/lib/flashcards/flashcards.db"

[storage]
# Card and profile pictures, one directory per bucket
# root = "/var/lib/flashcards/blobs"

[auth]
# Registration mode: "open" or "disabled"
registration = "open"
# Token signing secrets (a random secret is used per run when empty)
access_secret = ""
refresh_secret = ""
access_expiry_hours = 2
refresh_expiry_hours = 168

[limits]
request_timeout_seconds = 10
# Largest picture upload in bytes
max_picture_bytes = 5242880
"#
        .to_string()
    }
}
