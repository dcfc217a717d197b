//! Top-level inbound event dispatcher.
//!
//! [`Relay`] owns every piece of shared state (sessions, the approval board,
//! settings) and routes each [`InboundEvent`] to the flow that handles it.

use crate::approval::ApprovalBoard;
use crate::config::SettingsStore;
use crate::error::FlowError;
use crate::media::MediaRelay;
use crate::mirror::StreamHub;
use crate::session::SessionStore;
use crate::transport::{ChatKind, ChatTransport, InboundEvent, SentMessage, TextFormat};
use crate::twitter::SocialPlatform;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// The relay between one chat transport and Twitter
pub struct Relay {
    pub(crate) transport: Arc<dyn ChatTransport>,
    pub(crate) platform: Arc<dyn SocialPlatform>,
    pub(crate) settings: Arc<SettingsStore>,
    pub(crate) sessions: SessionStore,
    pub(crate) approvals: ApprovalBoard,
    pub(crate) media: MediaRelay,
    pub(crate) streams: StreamHub,
}

impl Relay {
    /// Build a relay. Sessions are seeded with the credentials stored in
    /// the settings document, if any.
    pub async fn new(
        transport: Arc<dyn ChatTransport>,
        platform: Arc<dyn SocialPlatform>,
        settings: Arc<SettingsStore>,
    ) -> Self {
        let seed = settings.snapshot().await.credentials();
        Self {
            streams: StreamHub::new(transport.clone()),
            transport,
            platform,
            settings,
            sessions: SessionStore::new(seed),
            approvals: ApprovalBoard::default(),
            media: MediaRelay::new(),
        }
    }

    /// Replace the media relay (staging directory, poll limits).
    #[must_use]
    pub fn with_media_relay(mut self, media: MediaRelay) -> Self {
        self.media = media;
        self
    }

    /// Sessions, for inspection by adapters and tests
    #[must_use]
    pub const fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// The account's stream subscription
    #[must_use]
    pub const fn streams(&self) -> &StreamHub {
        &self.streams
    }

    /// Pending approvals
    #[must_use]
    pub const fn approvals(&self) -> &ApprovalBoard {
        &self.approvals
    }

    /// Handle one inbound event. Failures are reported to the chat and
    /// logged; nothing propagates to the caller.
    pub async fn handle_event(&self, event: InboundEvent) {
        match event.chat.kind {
            ChatKind::Private => self.handle_private(event).await,
            ChatKind::Group => {
                if self.settings.approval_chat().await == Some(event.chat.id) {
                    self.handle_approval_reply(event).await;
                } else {
                    debug!(chat_id = event.chat.id, "Ignoring message from unrelated group");
                }
            }
            ChatKind::Other => debug!(chat_id = event.chat.id, "Ignoring unsupported chat kind"),
        }
    }

    async fn handle_private(&self, event: InboundEvent) {
        let chat_id = event.chat.id;
        let session = self.sessions.get_or_create(chat_id).await;

        if !self.ensure_authorized(&session, &event).await {
            return;
        }
        if !self.ensure_publisher(&session, chat_id).await {
            return;
        }
        self.handle_draft_event(&session, event).await;
    }

    /// Send a plain text message; failures are logged.
    pub(crate) async fn say(&self, chat_id: i64, text: &str) -> Option<SentMessage> {
        self.send(chat_id, text, TextFormat::Plain).await
    }

    pub(crate) async fn send(
        &self,
        chat_id: i64,
        text: &str,
        format: TextFormat,
    ) -> Option<SentMessage> {
        match self.transport.send_text(chat_id, text, format).await {
            Ok(sent) => Some(sent),
            Err(e) => {
                error!(chat_id, "Failed to send message: {e}");
                None
            }
        }
    }

    /// Log a flow failure and report it to the chat.
    pub(crate) async fn report(&self, chat_id: i64, err: &FlowError) {
        warn!(chat_id, "{err}");
        self.say(chat_id, &err.user_message()).await;
    }
}
