//! Error taxonomy for the relay flows.
//!
//! Every external-call failure is caught at its call site, converted into a
//! [`FlowError`], logged, and reported to the chat as a single message.

use crate::config::SettingsError;
use crate::media::RelayStage;
use crate::messages;
use std::fmt;
use thiserror::Error;

/// Which leg of the OAuth handshake failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    /// Requesting the temporary token pair
    RequestToken,
    /// Exchanging the verifier for an access token
    AccessToken,
    /// The exchange finished for a token pair that is no longer pending
    Stale,
}

impl fmt::Display for AuthStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RequestToken => "request token",
            Self::AccessToken => "access token",
            Self::Stale => "stale verifier",
        };
        f.write_str(name)
    }
}

/// Failures surfaced to users
#[derive(Debug, Error)]
pub enum FlowError {
    /// Settings could not be loaded; fatal at startup
    #[error("configuration unavailable: {0}")]
    ConfigMissing(#[from] SettingsError),
    /// The OAuth handshake failed; authorization stays retryable
    #[error("authorization failed at {stage}: {reason}")]
    AuthExchangeFailed {
        /// Failing leg
        stage: AuthStage,
        /// Underlying cause
        reason: String,
    },
    /// `verify_credentials` failed; publishing stays disabled
    #[error("credential verification failed: {0}")]
    CredentialVerificationFailed(String),
    /// Draft text over the character ceiling
    #[error("message exceeds the character limit by {overflow}")]
    MessageTooLong {
        /// Characters over the ceiling
        overflow: usize,
    },
    /// A media relay stage failed; the draft is unaffected
    #[error("media relay failed during {stage}: {reason}")]
    MediaRelayFailed {
        /// Failing stage
        stage: RelayStage,
        /// Underlying cause
        reason: String,
    },
    /// Posting failed; the draft is kept for a retry
    #[error("publishing failed: {0}")]
    PublishFailed(String),
    /// The keyword stream ended
    #[error("stream disconnected: {0}")]
    StreamDisconnected(String),
}

impl FlowError {
    /// Text sent to the chat for this failure.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::ConfigMissing(_) => messages::CONFIG_UNAVAILABLE.to_string(),
            Self::AuthExchangeFailed {
                stage: AuthStage::RequestToken,
                ..
            } => messages::AUTH_REQUEST_FAILED.to_string(),
            Self::AuthExchangeFailed {
                stage: AuthStage::AccessToken,
                ..
            } => messages::AUTH_VERIFIER_FAILED.to_string(),
            Self::AuthExchangeFailed {
                stage: AuthStage::Stale,
                ..
            } => messages::AUTH_STALE.to_string(),
            Self::CredentialVerificationFailed(_) => messages::VERIFY_FAILED.to_string(),
            Self::MessageTooLong { overflow } => messages::too_long(*overflow),
            Self::MediaRelayFailed { stage, .. } => messages::media_failed(*stage),
            Self::PublishFailed(_) => messages::PUBLISH_FAILED.to_string(),
            Self::StreamDisconnected(_) => messages::STREAM_DISCONNECTED.to_string(),
        }
    }
}
