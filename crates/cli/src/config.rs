//! Configuration loading and management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub mastodon: MastodonConfig,

    #[serde(default)]
    pub bluesky: BlueskyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory holding the sync ledger and the media staging area
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Tick interval in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Posts created before this epoch second are never synced.
    /// Unset means process start time.
    #[serde(default)]
    pub cutoff_epoch: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_base_url")]
    pub base_url: String,

    /// Handle of the watched account
    #[serde(default)]
    pub user_handle: String,

    /// Numeric id of the watched account
    #[serde(default)]
    pub user_id: String,

    /// Env var holding the session token obtained out of band
    #[serde(default = "default_source_token_env")]
    pub session_token_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MastodonConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub instance_url: String,

    #[serde(default = "default_mastodon_token_env")]
    pub access_token_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueskyConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_bluesky_service_url")]
    pub service_url: String,

    /// Account identifier (handle or email)
    #[serde(default)]
    pub identifier: String,

    #[serde(default = "default_bluesky_password_env")]
    pub app_password_env: String,
}

// Default value functions
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_interval_ms() -> u64 {
    // 15 minutes
    15 * 60 * 1000
}

fn default_source_base_url() -> String {
    "https://twitter.com".to_string()
}

fn default_source_token_env() -> String {
    "SOURCE_SESSION_TOKEN".to_string()
}

fn default_mastodon_token_env() -> String {
    "MASTODON_ACCESS_TOKEN".to_string()
}

fn default_bluesky_service_url() -> String {
    "https://bsky.social".to_string()
}

fn default_bluesky_password_env() -> String {
    "BLUESKY_APP_PASSWORD".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            cutoff_epoch: None,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_source_base_url(),
            user_handle: String::new(),
            user_id: String::new(),
            session_token_env: default_source_token_env(),
        }
    }
}

impl Default for MastodonConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            instance_url: String::new(),
            access_token_env: default_mastodon_token_env(),
        }
    }
}

impl Default for BlueskyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            service_url: default_bluesky_service_url(),
            identifier: String::new(),
            app_password_env: default_bluesky_password_env(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Try default config path if none specified
        let default_path = PathBuf::from("./config.toml");
        let path = config_path.unwrap_or(&default_path);

        if path.exists() {
            builder = builder.add_source(config::File::from(path));
        } else if config_path.is_some() {
            // User specified a path that doesn't exist
            anyhow::bail!("Config file not found: {}", path.display());
        }

        // Add environment variable overrides
        builder = builder.add_source(
            config::Environment::with_prefix("MIRRORPOST")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Generate example configuration as TOML string
    pub fn example_toml() -> String {
        r#"# mirrorpost configuration

[general]
data_dir = "./data"
log_level = "info"

[sync]
# Tick interval in milliseconds
interval_ms = 900000
# Posts created before this epoch second are never synced.
# Defaults to process start time when unset.
# cutoff_epoch = 1700000000

[source]
base_url = "https://twitter.com"
user_handle = "your_handle"
user_id = "12345678"
session_token_env = "SOURCE_SESSION_TOKEN"

[mastodon]
enabled = false
instance_url = "https://mastodon.example"
access_token_env = "MASTODON_ACCESS_TOKEN"

[bluesky]
enabled = false
service_url = "https://bsky.social"
identifier = "you.bsky.social"
app_password_env = "BLUESKY_APP_PASSWORD"
"#
        .to_string()
    }
}
