//! Twitter API client
//!
//! The relay talks to Twitter through two traits: [`SocialPlatform`] covers
//! the application-level OAuth dance, [`SocialClient`] is bound to one linked
//! account and covers posting, media upload and streaming.

mod client;
pub mod oauth;
pub mod stream;

pub use client::{Endpoints, TwitterApi, TwitterClient};
pub use stream::{EventStream, StreamEvent, Tweet, TweetUser};

use crate::config::TWITTER_WEB_BASE;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during Twitter API operations
#[derive(Debug, Error)]
pub enum TwitterError {
    /// Error returned by the API
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message from the response
        message: String,
    },
    /// Error during network communication
    #[error("Network error: {0}")]
    Network(String),
    /// Response did not have the expected shape
    #[error("Unexpected response: {0}")]
    Response(String),
    /// Request signing failed
    #[error("Signing error: {0}")]
    Signing(String),
}

impl From<reqwest::Error> for TwitterError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

/// Application consumer key pair
#[derive(Debug, Clone)]
pub struct Consumer {
    /// Consumer key
    pub key: String,
    /// Consumer secret
    pub secret: String,
}

/// Temporary OAuth token pair from the request-token leg
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    /// `oauth_token`
    pub token: String,
    /// `oauth_token_secret`
    pub secret: String,
}

/// Long-lived access credentials. Both halves are always non-empty.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    access_token: String,
    access_token_secret: String,
}

impl Credentials {
    /// Build credentials, rejecting empty halves.
    #[must_use]
    pub fn new(access_token: &str, access_token_secret: &str) -> Option<Self> {
        let access_token = access_token.trim();
        let access_token_secret = access_token_secret.trim();
        if access_token.is_empty() || access_token_secret.is_empty() {
            return None;
        }
        Some(Self {
            access_token: access_token.to_string(),
            access_token_secret: access_token_secret.to_string(),
        })
    }

    /// Access token
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Access token secret
    #[must_use]
    pub fn access_token_secret(&self) -> &str {
        &self.access_token_secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"[MASKED]")
            .field("access_token_secret", &"[MASKED]")
            .finish()
    }
}

/// Account returned by `verify_credentials`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Account {
    /// Numeric id as string
    pub id_str: String,
    /// Handle without the `@`
    pub screen_name: String,
}

/// Platform media handle
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct MediaId(pub String);

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parameters of `statuses/update`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    /// Tweet text
    pub status: String,
    /// Attached media, in attachment order
    pub media_ids: Vec<MediaId>,
}

/// A successfully posted status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedStatus {
    /// Status id
    pub id_str: String,
    /// Author handle
    pub screen_name: String,
}

impl PostedStatus {
    /// Direct link to the status.
    #[must_use]
    pub fn url(&self) -> String {
        status_url(&self.screen_name, &self.id_str)
    }
}

/// Build a status link from an author handle and a status id.
#[must_use]
pub fn status_url(screen_name: &str, id_str: &str) -> String {
    format!("{TWITTER_WEB_BASE}/{screen_name}/status/{id_str}")
}

/// `INIT` parameters of a chunked upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadInit {
    /// Size of the whole file
    pub total_bytes: u64,
    /// MIME type
    pub media_type: String,
    /// `tweet_image`, `tweet_gif` or `tweet_video`
    pub media_category: String,
}

/// Server-side processing state of uploaded media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    /// Queued
    Pending,
    /// Running
    InProgress,
    /// Ready to attach
    Succeeded,
    /// Rejected
    Failed,
}

/// `processing_info` object of `FINALIZE`/`STATUS`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProcessingInfo {
    /// Current state
    pub state: ProcessingState,
    /// Seconds to wait before polling again
    #[serde(default)]
    pub check_after_secs: Option<u64>,
    /// Failure details
    #[serde(default)]
    pub error: Option<ProcessingError>,
}

/// Failure details of media processing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProcessingError {
    /// Error name
    #[serde(default)]
    pub name: Option<String>,
    /// Human readable message
    #[serde(default)]
    pub message: Option<String>,
}

/// Application-level OAuth operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SocialPlatform: Send + Sync {
    /// Obtain a temporary token pair (PIN-based, `oauth_callback=oob`).
    async fn request_token(&self) -> Result<TokenPair, TwitterError>;

    /// URL the user opens to authorize the temporary token.
    fn authorize_url(&self, request: &TokenPair) -> String;

    /// Exchange the temporary pair and the user's verifier for credentials.
    async fn access_token(
        &self,
        request: &TokenPair,
        verifier: &str,
    ) -> Result<Credentials, TwitterError>;

    /// Build a client bound to the given credentials.
    fn connect(&self, credentials: &Credentials) -> Arc<dyn SocialClient>;
}

/// Account-level operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SocialClient: Send + Sync {
    /// `account/verify_credentials`
    async fn verify_credentials(&self) -> Result<Account, TwitterError>;

    /// `statuses/update`
    async fn post_status(&self, update: &StatusUpdate) -> Result<PostedStatus, TwitterError>;

    /// Chunked upload `INIT`
    async fn upload_init(&self, init: &UploadInit) -> Result<MediaId, TwitterError>;

    /// Chunked upload `APPEND`
    async fn upload_append(
        &self,
        media_id: &MediaId,
        segment_index: u32,
        chunk: &[u8],
    ) -> Result<(), TwitterError>;

    /// Chunked upload `FINALIZE`; returns processing info for async media
    async fn upload_finalize(
        &self,
        media_id: &MediaId,
    ) -> Result<Option<ProcessingInfo>, TwitterError>;

    /// Chunked upload `STATUS`
    async fn upload_status(&self, media_id: &MediaId) -> Result<ProcessingInfo, TwitterError>;

    /// `media/metadata/create` with alt text
    async fn create_metadata(&self, media_id: &MediaId, alt_text: &str)
        -> Result<(), TwitterError>;

    /// `statuses/filter`. The stream yields `Connect` first and ends after `Disconnect`.
    fn stream_filter(&self, track: &[String]) -> EventStream;
}
