//! Group-approval gate
//!
//! Drafts submitted with `/tweet` while an approval chat is configured are
//! posted there and kept as [`PendingApproval`] records, keyed by the
//! message the bot sent. A 👍 reply from the chat owner or an administrator
//! publishes the stored draft.

use crate::config::APPROVAL_EMOJI;
use crate::dispatcher::Relay;
use crate::error::FlowError;
use crate::messages;
use crate::transport::{InboundEvent, SentMessage};
use crate::twitter::{MediaId, StatusUpdate};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A draft waiting in the approval chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingApproval {
    /// Chat the draft came from
    pub origin_chat: i64,
    /// Requester handle
    pub author: String,
    /// Tweet text
    pub text: String,
    /// Media already uploaded for this draft
    pub media_ids: Vec<MediaId>,
    /// Whether the approval message carries a media preview (caption edits)
    pub has_preview: bool,
    /// Approving admin, once resolved
    pub approver: Option<String>,
}

/// Pending approvals keyed by (approval chat, message id)
#[derive(Default)]
pub struct ApprovalBoard {
    entries: Mutex<HashMap<(i64, i32), PendingApproval>>,
}

impl ApprovalBoard {
    /// Track a pending approval under the message that shows it.
    pub async fn insert(&self, message: SentMessage, pending: PendingApproval) {
        self.entries
            .lock()
            .await
            .insert((message.chat_id, message.message_id), pending);
    }

    /// Whether a message is a pending approval.
    pub async fn contains(&self, chat_id: i64, message_id: i32) -> bool {
        self.entries
            .lock()
            .await
            .contains_key(&(chat_id, message_id))
    }

    /// Remove and return a pending approval. At most one caller wins.
    pub async fn take(&self, chat_id: i64, message_id: i32) -> Option<PendingApproval> {
        self.entries.lock().await.remove(&(chat_id, message_id))
    }

    /// Number of pending approvals
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether nothing is pending
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl Relay {
    /// Handle a message in the approval chat.
    pub(crate) async fn handle_approval_reply(&self, event: InboundEvent) {
        let chat_id = event.chat.id;
        let (Some(reply_to), Some(admin)) = (event.reply_to.as_ref(), event.from.as_ref()) else {
            return;
        };
        if event.text.as_deref().map(str::trim) != Some(APPROVAL_EMOJI) {
            return;
        }
        if !self.approvals.contains(chat_id, reply_to.message_id).await {
            debug!(chat_id, message_id = reply_to.message_id, "Reply to a message that is not pending");
            return;
        }
        match self.transport.own_id().await {
            Ok(own_id) if reply_to.from_id == Some(own_id) => {}
            Ok(_) => return,
            Err(e) => {
                warn!("Failed to fetch own identity: {e}");
                return;
            }
        }

        match self.transport.member_role(chat_id, admin.id).await {
            Ok(role) if role.is_privileged() => {}
            Ok(role) => {
                debug!(chat_id, user_id = admin.id, ?role, "Approval from unprivileged member ignored");
                return;
            }
            Err(e) => {
                warn!(chat_id, user_id = admin.id, "Failed to fetch member role: {e}");
                return;
            }
        }

        let Some(mut pending) = self.approvals.take(chat_id, reply_to.message_id).await else {
            return;
        };
        let admin = admin.handle();
        pending.approver = Some(admin.clone());
        let message = SentMessage {
            chat_id,
            message_id: reply_to.message_id,
        };
        self.publish_approved(message, pending).await;
    }

    /// Mark the approval message as being tweeted, then post. A failed post
    /// restores the message and the pending approval for another 👍.
    async fn publish_approved(&self, message: SentMessage, pending: PendingApproval) {
        let chat_id = message.chat_id;
        let admin = pending.approver.clone().unwrap_or_default();

        let approved = messages::being_tweeted(&pending.text, &pending.author, &admin);
        self.edit_approval(message, pending.has_preview, &approved).await;

        let client = match self.sessions.get(pending.origin_chat).await {
            Some(session) => session.lock().await.publisher(),
            None => None,
        };
        let update = StatusUpdate {
            status: pending.text.clone(),
            media_ids: pending.media_ids.clone(),
        };
        let result = match client {
            Some(client) => client
                .post_status(&update)
                .await
                .map_err(|e| FlowError::PublishFailed(e.to_string())),
            None => Err(FlowError::PublishFailed(
                "no publish client for the requesting chat".to_string(),
            )),
        };
        let posted = match result {
            Ok(posted) => posted,
            Err(err) => {
                warn!(chat_id, origin = pending.origin_chat, "{err}");
                let waiting = messages::waiting_for_approval(&pending.text, &pending.author);
                self.edit_approval(message, pending.has_preview, &waiting).await;
                self.approvals.insert(message, pending).await;
                self.say(chat_id, &err.user_message()).await;
                return;
            }
        };
        let link = posted.url();
        info!(
            origin = pending.origin_chat,
            author = %pending.author,
            admin = %admin,
            status_id = %posted.id_str,
            "Approved tweet posted"
        );

        self.say(chat_id, &messages::tweeted_by(&pending.author, &admin, &link))
            .await;

        if let Some(session) = self.sessions.get(pending.origin_chat).await {
            session.lock().await.approval_resolved();
        }
        self.say(pending.origin_chat, &messages::approved_notice(&admin, &link))
            .await;
    }

    async fn edit_approval(&self, message: SentMessage, has_preview: bool, text: &str) {
        let edit = if has_preview {
            self.transport
                .edit_caption(message.chat_id, message.message_id, text)
                .await
        } else {
            self.transport
                .edit_text(message.chat_id, message.message_id, text)
                .await
        };
        if let Err(e) = edit {
            warn!(chat_id = message.chat_id, "Failed to edit approval message: {e}");
        }
    }
}
