//! Draft/publish flow
//!
//! Accumulates the text body and attached media of a chat's next tweet and
//! publishes it, either directly or through the approval chat.

// lazy_regex! statics are once_cell based
#![allow(clippy::non_std_lazy_statics)]

use crate::approval::PendingApproval;
use crate::dispatcher::Relay;
use crate::error::FlowError;
use crate::messages;
use crate::session::{DraftSnapshot, SessionHandle};
use crate::transport::{ChatMedia, InboundEvent, Sender, TextFormat};
use crate::twitter::{SocialClient, StatusUpdate};
use lazy_regex::lazy_regex;
use std::sync::Arc;
use tracing::{info, warn};

/// Leading `/token`, with an optional `@botname` suffix
static RE_COMMAND: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"^/([^\s@]+)(?:@\S*)?");

/// Commands understood in private chats
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Reset the draft
    Start,
    /// Publish or submit the draft
    Tweet,
    /// Usage instructions
    Help,
    /// (Re)start the OAuth handshake
    Authorize,
    /// Anything else starting with `/`
    Unknown(String),
}

/// Parse a leading command token; `None` for plain text.
#[must_use]
pub fn parse_command(text: &str) -> Option<Command> {
    let captures = RE_COMMAND.captures(text.trim_start())?;
    let name = captures.get(1)?.as_str().to_ascii_lowercase();
    Some(match name.as_str() {
        "start" => Command::Start,
        "tweet" => Command::Tweet,
        "help" => Command::Help,
        "authorize" => Command::Authorize,
        _ => Command::Unknown(name),
    })
}

impl Relay {
    /// Handle an event for a verified session.
    pub(crate) async fn handle_draft_event(&self, session: &SessionHandle, event: InboundEvent) {
        let chat_id = event.chat.id;

        if let Some(text) = event.text.as_deref() {
            match parse_command(text) {
                Some(Command::Start) => {
                    session.lock().await.draft.reset();
                    self.say(chat_id, messages::START).await;
                }
                Some(Command::Help) => {
                    let approval = self.settings.approval_chat().await.is_some();
                    self.say(chat_id, &messages::help(approval)).await;
                }
                Some(Command::Tweet) => self.tweet(session, chat_id, event.from.as_ref()).await,
                Some(Command::Authorize) => {
                    self.say(chat_id, messages::ALREADY_AUTHORIZED).await;
                }
                Some(Command::Unknown(name)) => {
                    info!(chat_id, command = %name, "Unknown command");
                    self.say(chat_id, messages::SUPPORTED_COMMANDS).await;
                }
                None => self.accept_text(session, chat_id, text).await,
            }
            return;
        }

        match event.media {
            Some(media) => {
                self.attach_media(session, chat_id, media, event.caption.as_deref())
                    .await;
            }
            None => {
                self.say(chat_id, messages::UNSUPPORTED_MEDIA).await;
            }
        }
    }

    async fn accept_text(&self, session: &SessionHandle, chat_id: i64, text: &str) {
        let result = {
            let mut session = session.lock().await;
            session
                .draft
                .accept_text(text)
                .map(|()| session.draft.has_media())
        };
        match result {
            Ok(true) => {
                self.say(chat_id, messages::TEXT_UPDATED).await;
            }
            Ok(false) => {
                self.say(chat_id, messages::TEXT_STORED).await;
            }
            Err(err) => self.report(chat_id, &err).await,
        }
    }

    async fn attach_media(
        &self,
        session: &SessionHandle,
        chat_id: i64,
        media: ChatMedia,
        caption: Option<&str>,
    ) {
        let Some(client) = session.lock().await.publisher() else {
            warn!(chat_id, "Media received without a publish client");
            return;
        };

        let media_id = match self
            .media
            .relay(self.transport.as_ref(), client.as_ref(), &media, caption)
            .await
        {
            Ok(media_id) => media_id,
            Err(e) => {
                self.report(chat_id, &FlowError::from(e)).await;
                return;
            }
        };

        let has_text = {
            let mut session = session.lock().await;
            session.draft.attach(media_id, media);
            if let Some(caption) = caption.map(str::trim).filter(|c| !c.is_empty()) {
                if !session.draft.has_text() && session.draft.accept_text(caption).is_err() {
                    info!(chat_id, "Caption too long to become the draft text");
                }
            }
            session.draft.has_text()
        };

        let reply = if has_text {
            messages::MEDIA_ATTACHED
        } else {
            messages::MEDIA_NEEDS_TEXT
        };
        self.say(chat_id, reply).await;
    }

    async fn tweet(&self, session: &SessionHandle, chat_id: i64, sender: Option<&Sender>) {
        let (snapshot, client) = {
            let session = session.lock().await;
            (session.draft.snapshot(), session.publisher())
        };
        if snapshot.text.is_empty() {
            self.say(chat_id, messages::HELP_REMINDER).await;
            return;
        }
        let Some(client) = client else {
            warn!(chat_id, "Tweet requested without a publish client");
            return;
        };

        match self.settings.approval_chat().await {
            Some(group) => {
                self.route_for_approval(session, chat_id, group, sender, snapshot)
                    .await;
            }
            None => self.publish_direct(session, chat_id, client, snapshot).await,
        }
    }

    /// Post the draft and confirm with the status link.
    async fn publish_direct(
        &self,
        session: &SessionHandle,
        chat_id: i64,
        client: Arc<dyn SocialClient>,
        snapshot: DraftSnapshot,
    ) {
        let update = StatusUpdate {
            status: snapshot.text,
            media_ids: snapshot.media_ids,
        };
        match client.post_status(&update).await {
            Ok(posted) => {
                info!(chat_id, status_id = %posted.id_str, "Tweet posted");
                session
                    .lock()
                    .await
                    .draft
                    .reset_if_unchanged(snapshot.revision);
                self.say(chat_id, &messages::posted(&posted.url())).await;
            }
            Err(e) => {
                self.report(chat_id, &FlowError::PublishFailed(e.to_string()))
                    .await;
            }
        }
    }

    /// Hand the draft to the approval chat as a pending approval.
    async fn route_for_approval(
        &self,
        session: &SessionHandle,
        chat_id: i64,
        group: i64,
        sender: Option<&Sender>,
        snapshot: DraftSnapshot,
    ) {
        let author = sender.map_or_else(|| chat_id.to_string(), Sender::handle);
        let body = messages::waiting_for_approval(&snapshot.text, &author);
        let preview = snapshot.media_files.first().cloned();

        let sent = match &preview {
            Some(media) => self.transport.send_media(group, media, &body).await,
            None => self.transport.send_text(group, &body, TextFormat::Plain).await,
        };
        let message = match sent {
            Ok(message) => message,
            Err(e) => {
                warn!(chat_id, group, "Failed to send draft for approval: {e}");
                self.say(chat_id, messages::APPROVAL_SEND_FAILED).await;
                return;
            }
        };

        self.approvals
            .insert(
                message,
                PendingApproval {
                    origin_chat: chat_id,
                    author,
                    text: snapshot.text,
                    media_ids: snapshot.media_ids,
                    has_preview: preview.is_some(),
                    approver: None,
                },
            )
            .await;
        {
            let mut session = session.lock().await;
            session.draft.reset_if_unchanged(snapshot.revision);
            session.approval_requested();
        }
        info!(chat_id, group, message_id = message.message_id, "Draft sent for approval");
        self.say(chat_id, messages::SENT_FOR_APPROVAL).await;
    }
}
