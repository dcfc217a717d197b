//! Configuration and settings management
//!
//! Loads the YAML settings document (with environment overrides) and writes
//! the linked account back after a successful authorization.

use crate::twitter::Credentials;
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

/// Default location of the settings document.
pub const DEFAULT_SETTINGS_FILE: &str = "./settings.yml";
/// Environment variable overriding the settings document location.
pub const SETTINGS_PATH_ENV: &str = "TELETWEET_SETTINGS";
/// Prefix for per-key environment overrides (`TELETWEET__TWITTER__USER`).
pub const ENV_PREFIX: &str = "TELETWEET";

/// Maximum characters in a tweet.
pub const TWEET_CHAR_LIMIT: usize = 280;
/// Reply text that approves a pending tweet.
pub const APPROVAL_EMOJI: &str = "👍";
/// Largest file the Telegram bot API lets us download (20 MB).
pub const MAX_MEDIA_FILE_SIZE: u32 = 20 * 1024 * 1024;
/// Raw bytes per chunked-upload segment (before base64).
pub const MEDIA_CHUNK_SIZE: usize = 1024 * 1024;
/// Upper bound on `STATUS` polls while the platform processes media.
pub const MEDIA_STATUS_MAX_POLLS: usize = 30;
/// Alt text used when the media message has no caption.
pub const DEFAULT_ALT_TEXT: &str = "Media shared via TeleTweet";
/// Longest alt text `media/metadata/create` accepts.
pub const ALT_TEXT_CHAR_LIMIT: usize = 1000;

/// Twitter REST API base URL.
pub const TWITTER_API_BASE: &str = "https://api.twitter.com";
/// Twitter media upload base URL.
pub const TWITTER_UPLOAD_BASE: &str = "https://upload.twitter.com";
/// Twitter streaming API base URL.
pub const TWITTER_STREAM_BASE: &str = "https://stream.twitter.com";
/// Public web URL used for status links.
pub const TWITTER_WEB_BASE: &str = "https://twitter.com";
/// Timeout for regular Twitter HTTP calls.
pub const TWITTER_HTTP_TIMEOUT_SECS: u64 = 60;
/// Connect timeout for the long-lived stream connection.
pub const TWITTER_STREAM_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Initial backoff for retried Telegram operations.
pub const TRANSPORT_INITIAL_BACKOFF_MS: u64 = 500;
/// Maximum backoff for retried Telegram operations.
pub const TRANSPORT_MAX_BACKOFF_MS: u64 = 4000;
/// Maximum attempts for retried Telegram operations.
pub const TRANSPORT_MAX_RETRIES: usize = 3;

/// Errors raised while loading or persisting settings
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings document does not exist
    #[error("settings file {0} doesn't exist, please read the README.md file first")]
    Missing(PathBuf),
    /// The document exists but could not be parsed
    #[error("invalid settings: {0}")]
    Invalid(#[from] ConfigError),
    /// Serializing the document failed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// Writing the document failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// `telegram:` section
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct TelegramSection {
    /// Bot API token
    pub token: String,
    /// Approval group chat. When set, `/tweet` routes drafts through the group.
    #[serde(default, alias = "chatid", skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
}

/// `twitter:` section
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct TwitterSection {
    /// Application consumer key
    #[serde(alias = "consumerkey")]
    pub consumer_key: String,
    /// Application consumer secret
    #[serde(alias = "consumersecret")]
    pub consumer_secret: String,
    /// Linked account access token
    #[serde(default, alias = "accesstoken", skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Linked account access token secret
    #[serde(
        default,
        alias = "accesstokensecret",
        skip_serializing_if = "Option::is_none"
    )]
    pub access_token_secret: Option<String>,
    /// Screen name of the linked account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Stream track terms; defaults to `@<user>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<Vec<String>>,
}

/// `log:` section
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct LogSection {
    /// Additional log file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// Default filter directive (overridden by `RUST_LOG`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

/// The settings document
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Settings {
    /// Telegram transport settings
    pub telegram: TelegramSection,
    /// Twitter application and linked account
    pub twitter: TwitterSection,
    /// Logging
    #[serde(default)]
    pub log: LogSection,
}

impl Settings {
    /// Load the settings document at `path`, applying `TELETWEET__*` overrides.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::Missing` if the file does not exist and
    /// `SettingsError::Invalid` if it cannot be parsed.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Err(SettingsError::Missing(path.to_path_buf()));
        }

        let source = path.to_string_lossy();
        let settings = Config::builder()
            .add_source(File::new(&source, FileFormat::Yaml).required(true))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .ignore_empty(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }

    /// Resolve the settings path from `TELETWEET_SETTINGS` or the default.
    #[must_use]
    pub fn default_path() -> PathBuf {
        std::env::var(SETTINGS_PATH_ENV)
            .ok()
            .filter(|p| !p.is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE), PathBuf::from)
    }

    /// Linked account credentials, if both halves are present.
    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        let token = self.twitter.access_token.as_deref()?;
        let secret = self.twitter.access_token_secret.as_deref()?;
        Credentials::new(token, secret)
    }
}

/// Owns the settings document and persists updates to it
pub struct SettingsStore {
    path: Option<PathBuf>,
    settings: RwLock<Settings>,
    linked: watch::Sender<Option<Credentials>>,
}

impl SettingsStore {
    /// Create a store backed by the file at `path`.
    #[must_use]
    pub fn new(path: PathBuf, settings: Settings) -> Self {
        Self {
            path: Some(path),
            linked: watch::Sender::new(settings.credentials()),
            settings: RwLock::new(settings),
        }
    }

    /// Create a store that never touches the filesystem.
    #[must_use]
    pub fn in_memory(settings: Settings) -> Self {
        Self {
            path: None,
            linked: watch::Sender::new(settings.credentials()),
            settings: RwLock::new(settings),
        }
    }

    /// Snapshot of the current document.
    pub async fn snapshot(&self) -> Settings {
        self.settings.read().await.clone()
    }

    /// Follow the linked account credentials as they change.
    #[must_use]
    pub fn watch_credentials(&self) -> watch::Receiver<Option<Credentials>> {
        self.linked.subscribe()
    }

    /// Approval group chat, if configured.
    pub async fn approval_chat(&self) -> Option<i64> {
        self.settings.read().await.telegram.chat_id
    }

    /// Stream track terms for the given screen name.
    pub async fn track_terms(&self, screen_name: &str) -> Vec<String> {
        self.settings
            .read()
            .await
            .twitter
            .track
            .clone()
            .filter(|terms| !terms.is_empty())
            .unwrap_or_else(|| vec![format!("@{screen_name}")])
    }

    /// Record the linked account credentials and persist the document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be written.
    pub async fn save_credentials(&self, credentials: &Credentials) -> Result<(), SettingsError> {
        let mut settings = self.settings.write().await;
        settings.twitter.access_token = Some(credentials.access_token().to_string());
        settings.twitter.access_token_secret = Some(credentials.access_token_secret().to_string());
        self.linked.send_replace(Some(credentials.clone()));
        self.persist(&settings).await
    }

    /// Record the linked account screen name and persist the document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be written.
    pub async fn save_user(&self, screen_name: &str) -> Result<(), SettingsError> {
        let mut settings = self.settings.write().await;
        if settings.twitter.user.as_deref() == Some(screen_name) {
            return Ok(());
        }
        settings.twitter.user = Some(screen_name.to_string());
        self.persist(&settings).await
    }

    async fn persist(&self, settings: &Settings) -> Result<(), SettingsError> {
        let Some(path) = &self.path else {
            debug!("In-memory settings, skipping write");
            return Ok(());
        };
        let body = serde_yaml::to_string(settings)?;
        tokio::fs::write(path, body).await?;
        info!("Settings written to {}", path.display());
        Ok(())
    }
}
