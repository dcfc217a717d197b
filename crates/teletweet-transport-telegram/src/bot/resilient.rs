//! Resilient messaging utilities with automatic retry for Telegram API operations.
//!
//! Sends are wrapped in [`teletweet_core::utils::retry_transport_operation`],
//! so transient network failures are retried with exponential backoff and
//! jitter. Edits degrade gracefully when Telegram reports that nothing changed.

use teloxide::prelude::*;
use teloxide::types::{ChatId, FileId, InputFile, Message, MessageId, ParseMode};
use teloxide::RequestError;
use teletweet_core::transport::{ChatMedia, MediaKind};
use teletweet_core::utils::retry_transport_operation;
use tracing::debug;

const ERROR_NOT_MODIFIED: &str = "message is not modified";

/// Send a message with automatic retry on network failures.
///
/// # Errors
///
/// Returns the last [`RequestError`] after all retries are exhausted.
pub async fn send_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    text: &str,
    parse_mode: Option<ParseMode>,
) -> Result<Message, RequestError> {
    retry_transport_operation(|| async {
        let mut req = bot.send_message(chat_id, text.to_string());
        if let Some(pm) = parse_mode {
            req = req.parse_mode(pm);
        }
        req.await
    })
    .await
}

/// Re-send an already uploaded attachment by its file id, with a caption.
///
/// # Errors
///
/// Returns the last [`RequestError`] after all retries are exhausted.
pub async fn send_media_resilient(
    bot: &Bot,
    chat_id: ChatId,
    media: &ChatMedia,
    caption: &str,
) -> Result<Message, RequestError> {
    retry_transport_operation(|| async {
        let file = InputFile::file_id(FileId(media.file_id.clone()));
        let caption = caption.to_string();
        match media.kind {
            MediaKind::Photo => bot.send_photo(chat_id, file).caption(caption).await,
            MediaKind::Animation => bot.send_animation(chat_id, file).caption(caption).await,
            MediaKind::Video => bot.send_video(chat_id, file).caption(caption).await,
            MediaKind::Document => bot.send_document(chat_id, file).caption(caption).await,
        }
    })
    .await
}

/// Edit the text of a message. An unchanged message is not an error.
///
/// # Errors
///
/// Returns the last [`RequestError`] after all retries are exhausted.
pub async fn edit_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    text: &str,
) -> Result<(), RequestError> {
    retry_transport_operation(|| async {
        tolerate_not_modified(bot.edit_message_text(chat_id, msg_id, text.to_string()).await)
    })
    .await
}

/// Edit the caption of a media message. An unchanged caption is not an error.
///
/// # Errors
///
/// Returns the last [`RequestError`] after all retries are exhausted.
pub async fn edit_caption_resilient(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    caption: &str,
) -> Result<(), RequestError> {
    retry_transport_operation(|| async {
        tolerate_not_modified(
            bot.edit_message_caption(chat_id, msg_id)
                .caption(caption.to_string())
                .await,
        )
    })
    .await
}

fn tolerate_not_modified(result: Result<Message, RequestError>) -> Result<(), RequestError> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.to_string().contains(ERROR_NOT_MODIFIED) => {
            debug!("Message update skipped: {ERROR_NOT_MODIFIED}");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
