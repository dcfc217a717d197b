//! Chat transport collaborator interface.
//!
//! The core never talks to a messaging API directly. Adapters convert their
//! updates into [`InboundEvent`]s and implement [`ChatTransport`] for the
//! outbound side.

use async_trait::async_trait;
use thiserror::Error;

/// Errors reported by a chat transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// The messaging API rejected the call
    #[error("API error: {0}")]
    Api(String),
    /// Network failure talking to the messaging API
    #[error("Network error: {0}")]
    Network(String),
    /// Payload exceeds what the transport can deliver
    #[error("File too large: {size} bytes")]
    TooLarge {
        /// Reported size in bytes
        size: u32,
    },
}

/// Kind of conversation an event arrived in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    /// One-to-one chat with the bot
    Private,
    /// Group or supergroup
    Group,
    /// Channels and anything else
    Other,
}

/// Conversation an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatRef {
    /// Chat identifier
    pub id: i64,
    /// Conversation kind
    pub kind: ChatKind,
}

/// Author of an inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    /// User identifier
    pub id: u64,
    /// Public handle, if the user has one
    pub username: Option<String>,
}

impl Sender {
    /// Handle used in attributions; falls back to the numeric id.
    #[must_use]
    pub fn handle(&self) -> String {
        self.username
            .as_deref()
            .filter(|u| !u.is_empty())
            .map_or_else(|| self.id.to_string(), ToString::to_string)
    }
}

/// Supported attachment kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Photo (largest size)
    Photo,
    /// GIF or silent MP4 animation
    Animation,
    /// Video
    Video,
    /// Generic file
    Document,
}

/// Opaque media reference carried by an inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMedia {
    /// Attachment kind
    pub kind: MediaKind,
    /// Transport file reference
    pub file_id: String,
    /// MIME type reported by the transport
    pub mime_type: Option<String>,
    /// Size reported by the transport
    pub file_size: Option<u32>,
}

/// Message an inbound event replies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTo {
    /// Message identifier within the chat
    pub message_id: i32,
    /// Author of the replied-to message
    pub from_id: Option<u64>,
}

/// One inbound message, transport-agnostic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Conversation
    pub chat: ChatRef,
    /// Author
    pub from: Option<Sender>,
    /// Message identifier
    pub message_id: i32,
    /// Message text
    pub text: Option<String>,
    /// Caption of a media message
    pub caption: Option<String>,
    /// Attached media
    pub media: Option<ChatMedia>,
    /// Replied-to message
    pub reply_to: Option<ReplyTo>,
}

/// Role of a chat member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    /// Chat owner
    Creator,
    /// Administrator
    Administrator,
    /// Regular member
    Member,
    /// Restricted member
    Restricted,
    /// No longer in the chat
    Left,
    /// Banned
    Banned,
}

impl MemberRole {
    /// Whether this role may approve drafts.
    #[must_use]
    pub const fn is_privileged(self) -> bool {
        matches!(self, Self::Creator | Self::Administrator)
    }
}

/// Identifier of a message the transport sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    /// Chat identifier
    pub chat_id: i64,
    /// Message identifier
    pub message_id: i32,
}

/// Formatting of outgoing text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    /// Sent verbatim
    Plain,
    /// Parsed as HTML
    Html,
}

/// A resolved file reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Download path on the transport's file server
    pub path: String,
    /// Size in bytes
    pub size: u32,
}

/// Outbound operations the core needs from a messaging platform
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a text message.
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        format: TextFormat,
    ) -> Result<SentMessage, TransportError>;

    /// Re-send an existing attachment with a caption.
    async fn send_media(
        &self,
        chat_id: i64,
        media: &ChatMedia,
        caption: &str,
    ) -> Result<SentMessage, TransportError>;

    /// Replace the text of a sent message.
    async fn edit_text(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
    ) -> Result<(), TransportError>;

    /// Replace the caption of a sent media message.
    async fn edit_caption(
        &self,
        chat_id: i64,
        message_id: i32,
        caption: &str,
    ) -> Result<(), TransportError>;

    /// Role of `user_id` in `chat_id`.
    async fn member_role(&self, chat_id: i64, user_id: u64) -> Result<MemberRole, TransportError>;

    /// The bot's own user id.
    async fn own_id(&self) -> Result<u64, TransportError>;

    /// Resolve a file reference to a downloadable path.
    async fn resolve_file(&self, file_id: &str) -> Result<RemoteFile, TransportError>;

    /// Download a resolved file.
    async fn download_file(&self, path: &str) -> Result<Vec<u8>, TransportError>;
}
