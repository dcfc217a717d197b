use teloxide::types::{Chat, Message, User};
use teloxide::utils::command::BotCommands;
use teletweet_core::transport::{
    ChatKind, ChatMedia, ChatRef, InboundEvent, MediaKind, ReplyTo, Sender,
};

/// Commands advertised in the Telegram command menu.
///
/// Parsing happens in the core; this enum only feeds `set_my_commands`.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Start a new draft
    #[command(description = "Start a new tweet draft.")]
    Start,
    /// Publish or submit the draft
    #[command(description = "Publish the current draft.")]
    Tweet,
    /// Show usage
    #[command(description = "Show help.")]
    Help,
    /// Link a Twitter account
    #[command(description = "Link a Twitter account.")]
    Authorize,
}

fn chat_kind(chat: &Chat) -> ChatKind {
    if chat.is_private() {
        ChatKind::Private
    } else if chat.is_group() || chat.is_supergroup() {
        ChatKind::Group
    } else {
        ChatKind::Other
    }
}

fn sender(user: &User) -> Sender {
    Sender {
        id: user.id.0,
        username: user.username.clone(),
    }
}

/// Extract the attachment of a message, if it carries a supported one.
/// Photos use the largest available size.
#[must_use]
pub fn extract_media(msg: &Message) -> Option<ChatMedia> {
    if let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) {
        return Some(ChatMedia {
            kind: MediaKind::Photo,
            file_id: photo.file.id.0.clone(),
            mime_type: None,
            file_size: Some(photo.file.size),
        });
    }
    if let Some(animation) = msg.animation() {
        return Some(ChatMedia {
            kind: MediaKind::Animation,
            file_id: animation.file.id.0.clone(),
            mime_type: animation.mime_type.as_ref().map(ToString::to_string),
            file_size: Some(animation.file.size),
        });
    }
    if let Some(video) = msg.video() {
        return Some(ChatMedia {
            kind: MediaKind::Video,
            file_id: video.file.id.0.clone(),
            mime_type: video.mime_type.as_ref().map(ToString::to_string),
            file_size: Some(video.file.size),
        });
    }
    msg.document().map(|document| ChatMedia {
        kind: MediaKind::Document,
        file_id: document.file.id.0.clone(),
        mime_type: document.mime_type.as_ref().map(ToString::to_string),
        file_size: Some(document.file.size),
    })
}

/// Convert a Telegram message into a transport-agnostic inbound event.
#[must_use]
pub fn message_to_event(msg: &Message) -> InboundEvent {
    InboundEvent {
        chat: ChatRef {
            id: msg.chat.id.0,
            kind: chat_kind(&msg.chat),
        },
        from: msg.from.as_ref().map(sender),
        message_id: msg.id.0,
        text: msg.text().map(ToString::to_string),
        caption: msg.caption().map(ToString::to_string),
        media: extract_media(msg),
        reply_to: msg.reply_to_message().map(|reply| ReplyTo {
            message_id: reply.id.0,
            from_id: reply.from.as_ref().map(|u| u.id.0),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(json: &str) -> Message {
        serde_json::from_str(json).unwrap_or_else(|e| panic!("bad fixture: {e}"))
    }

    #[test]
    fn test_private_text_message() {
        let msg = message(
            r#"{
                "message_id": 5,
                "date": 1700000000,
                "chat": {"id": 42, "type": "private", "first_name": "Alice"},
                "from": {"id": 42, "is_bot": false, "first_name": "Alice", "username": "alice"},
                "text": "hello world"
            }"#,
        );
        let event = message_to_event(&msg);
        assert_eq!(event.chat.id, 42);
        assert_eq!(event.chat.kind, ChatKind::Private);
        assert_eq!(event.message_id, 5);
        assert_eq!(event.text.as_deref(), Some("hello world"));
        assert_eq!(
            event.from,
            Some(Sender {
                id: 42,
                username: Some("alice".to_string()),
            })
        );
        assert!(event.media.is_none());
        assert!(event.reply_to.is_none());
    }

    #[test]
    fn test_photo_uses_largest_size_and_caption() {
        let msg = message(
            r#"{
                "message_id": 6,
                "date": 1700000000,
                "chat": {"id": 42, "type": "private", "first_name": "Alice"},
                "from": {"id": 42, "is_bot": false, "first_name": "Alice"},
                "caption": "sunset",
                "photo": [
                    {"file_id": "small", "file_unique_id": "s", "width": 90, "height": 90, "file_size": 100},
                    {"file_id": "large", "file_unique_id": "l", "width": 800, "height": 800, "file_size": 5000}
                ]
            }"#,
        );
        let event = message_to_event(&msg);
        let Some(media) = event.media else {
            panic!("photo should be extracted");
        };
        assert_eq!(media.kind, MediaKind::Photo);
        assert_eq!(media.file_id, "large");
        assert_eq!(media.file_size, Some(5000));
        assert_eq!(event.caption.as_deref(), Some("sunset"));
        assert!(event.text.is_none());
    }

    #[test]
    fn test_group_reply_to_bot_message() {
        let msg = message(
            r#"{
                "message_id": 20,
                "date": 1700000000,
                "chat": {"id": -100123, "type": "supergroup", "title": "Editors"},
                "from": {"id": 7, "is_bot": false, "first_name": "Bob"},
                "text": "👍",
                "reply_to_message": {
                    "message_id": 11,
                    "date": 1699999999,
                    "chat": {"id": -100123, "type": "supergroup", "title": "Editors"},
                    "from": {"id": 4242, "is_bot": true, "first_name": "Relay", "username": "relay_bot"},
                    "text": "draft"
                }
            }"#,
        );
        let event = message_to_event(&msg);
        assert_eq!(event.chat.kind, ChatKind::Group);
        assert_eq!(
            event.reply_to,
            Some(ReplyTo {
                message_id: 11,
                from_id: Some(4242),
            })
        );
        assert_eq!(event.from.map(|s| s.handle()), Some("7".to_string()));
    }

    #[test]
    fn test_document_carries_mime_type() {
        let msg = message(
            r#"{
                "message_id": 7,
                "date": 1700000000,
                "chat": {"id": 42, "type": "private", "first_name": "Alice"},
                "from": {"id": 42, "is_bot": false, "first_name": "Alice"},
                "document": {"file_id": "doc", "file_unique_id": "d", "file_size": 300, "mime_type": "image/png"}
            }"#,
        );
        let Some(media) = extract_media(&msg) else {
            panic!("document should be extracted");
        };
        assert_eq!(media.kind, MediaKind::Document);
        assert_eq!(media.mime_type.as_deref(), Some("image/png"));
    }
}
