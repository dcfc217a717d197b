use crate::bot::resilient::{
    edit_caption_resilient, edit_message_resilient, send_media_resilient, send_message_resilient,
};
use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{ChatId, ChatMemberKind, FileId, Message, MessageId, ParseMode, UserId};
use teloxide::RequestError;
use teletweet_core::transport::{
    ChatMedia, ChatTransport, MemberRole, RemoteFile, SentMessage, TextFormat, TransportError,
};
use tokio::sync::OnceCell;
use tracing::debug;

/// Chat transport backed by the Telegram Bot API
pub struct TelegramTransport {
    bot: Bot,
    own_id: OnceCell<u64>,
}

impl TelegramTransport {
    /// Wrap a bot handle.
    #[must_use]
    pub fn new(bot: Bot) -> Self {
        Self {
            bot,
            own_id: OnceCell::new(),
        }
    }
}

fn sent(msg: &Message) -> SentMessage {
    SentMessage {
        chat_id: msg.chat.id.0,
        message_id: msg.id.0,
    }
}

fn parse_mode(format: TextFormat) -> Option<ParseMode> {
    match format {
        TextFormat::Plain => None,
        TextFormat::Html => Some(ParseMode::Html),
    }
}

fn transport_error(e: &RequestError) -> TransportError {
    match e {
        RequestError::Network(_) | RequestError::Io(_) => TransportError::Network(e.to_string()),
        _ => TransportError::Api(e.to_string()),
    }
}

fn member_role(kind: &ChatMemberKind) -> MemberRole {
    if kind.is_owner() {
        MemberRole::Creator
    } else if kind.is_administrator() {
        MemberRole::Administrator
    } else if kind.is_restricted() {
        MemberRole::Restricted
    } else if kind.is_left() {
        MemberRole::Left
    } else if kind.is_banned() {
        MemberRole::Banned
    } else {
        MemberRole::Member
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        format: TextFormat,
    ) -> Result<SentMessage, TransportError> {
        send_message_resilient(&self.bot, ChatId(chat_id), text, parse_mode(format))
            .await
            .map(|msg| sent(&msg))
            .map_err(|e| transport_error(&e))
    }

    async fn send_media(
        &self,
        chat_id: i64,
        media: &ChatMedia,
        caption: &str,
    ) -> Result<SentMessage, TransportError> {
        send_media_resilient(&self.bot, ChatId(chat_id), media, caption)
            .await
            .map(|msg| sent(&msg))
            .map_err(|e| transport_error(&e))
    }

    async fn edit_text(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
    ) -> Result<(), TransportError> {
        edit_message_resilient(&self.bot, ChatId(chat_id), MessageId(message_id), text)
            .await
            .map_err(|e| transport_error(&e))
    }

    async fn edit_caption(
        &self,
        chat_id: i64,
        message_id: i32,
        caption: &str,
    ) -> Result<(), TransportError> {
        edit_caption_resilient(&self.bot, ChatId(chat_id), MessageId(message_id), caption)
            .await
            .map_err(|e| transport_error(&e))
    }

    async fn member_role(&self, chat_id: i64, user_id: u64) -> Result<MemberRole, TransportError> {
        let member = self
            .bot
            .get_chat_member(ChatId(chat_id), UserId(user_id))
            .await
            .map_err(|e| transport_error(&e))?;
        let role = member_role(&member.kind);
        debug!(chat_id, user_id, ?role, "Resolved chat member role");
        Ok(role)
    }

    async fn own_id(&self) -> Result<u64, TransportError> {
        self.own_id
            .get_or_try_init(|| async {
                let me = self.bot.get_me().await.map_err(|e| transport_error(&e))?;
                Ok(me.user.id.0)
            })
            .await
            .copied()
    }

    async fn resolve_file(&self, file_id: &str) -> Result<RemoteFile, TransportError> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .map_err(|e| transport_error(&e))?;
        let size = file.size;
        Ok(RemoteFile {
            path: file.path,
            size,
        })
    }

    async fn download_file(&self, path: &str) -> Result<Vec<u8>, TransportError> {
        let mut buf = Vec::new();
        self.bot
            .download_file(path, &mut buf)
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(buf)
    }
}
