//! User-facing message texts.
//!
//! Approval messages are rendered from structured records; nothing here is
//! ever parsed back.

use crate::config::TWEET_CHAR_LIMIT;
use crate::media::RelayStage;

/// Sent before the authorization URL.
pub const AUTH_REQUIRED: &str = "Please first authorize the app in order to be able to tweet.";
/// Request-token leg failed.
pub const AUTH_REQUEST_FAILED: &str =
    "Couldn't authenticate using your credentials. Type /authorize to try again.";
/// Verifier exchange failed.
pub const AUTH_VERIFIER_FAILED: &str = "The verification step was not completed. Paste the PIN again or type /authorize to get a new link.";
/// The verifier answered a token pair that is no longer pending.
pub const AUTH_STALE: &str =
    "That PIN belongs to an expired authorization request. Type /authorize to get a new link.";
/// Authorization finished.
pub const AUTH_SUCCESS: &str = "The app has been authorized successfully.";
/// Another chat linked the shared account while this one was unlinked.
pub const ACCOUNT_LINKED: &str =
    "The app has been authorized from another chat, you can start tweeting now.";
/// A non-text message arrived while waiting for the PIN.
pub const AUTH_AWAITING_PIN: &str =
    "Please paste the PIN number from the authorization page, or type /authorize to get a new link.";
/// Credential verification is running.
pub const VERIFYING: &str = "Verifying your Twitter credentials...";
/// Credential verification failed.
pub const VERIFY_FAILED: &str = "Couldn't verify your Twitter credentials...";
/// Reply to `/start`.
pub const START: &str =
    "Type any message that you want to be tweeted, the most recent message is the one used for the tweet.";
/// Text stored, no media yet.
pub const TEXT_STORED: &str =
    "Upload a media file to attach to your tweet, or type /tweet to send it as is.";
/// Text stored, media already attached.
pub const TEXT_UPDATED: &str = "Your message has been updated, type /tweet to send it.";
/// Media attached, text already present.
pub const MEDIA_ATTACHED: &str =
    "Your media file has been attached to the tweet, type /tweet to send it.";
/// Media attached, text still missing.
pub const MEDIA_NEEDS_TEXT: &str = "Now type the message you want to send with your tweet.";
/// Unsupported inbound content.
pub const UNSUPPORTED_MEDIA: &str = "I'm sorry, this type of file is not supported.";
/// `/tweet` without text.
pub const HELP_REMINDER: &str = "Type /help to see how to use this bot.";
/// Unknown command.
pub const SUPPORTED_COMMANDS: &str =
    "The list of supported commands is /start, /tweet, /authorize and /help";
/// `/tweet` routed to the approval chat.
pub const SENT_FOR_APPROVAL: &str =
    "Your tweet has been sent to the group, an admin has to approve it before it is posted.";
/// `/tweet` could not reach the approval chat.
pub const APPROVAL_SEND_FAILED: &str =
    "Couldn't send your tweet to the group for approval, type /tweet to try again.";
/// Posting failed.
pub const PUBLISH_FAILED: &str = "Couldn't post your tweet, type /tweet to try again.";
/// `/authorize` on an already linked chat.
pub const ALREADY_AUTHORIZED: &str = "This chat is already linked to a Twitter account.";
/// Stream ended.
pub const STREAM_DISCONNECTED: &str = "Disconnected from Twitter";
/// Settings unavailable.
pub const CONFIG_UNAVAILABLE: &str = "The bot configuration is unavailable.";

/// Authorization URL message.
#[must_use]
pub fn authorization_url(url: &str) -> String {
    format!(
        "Your authorization url is\n{url}\nPlease authorize the app on the link above and paste the PIN number in the chat, then hit Enter."
    )
}

/// Overflow rejection.
#[must_use]
pub fn too_long(overflow: usize) -> String {
    format!(
        "The message surpasses {TWEET_CHAR_LIMIT} characters by {overflow}, please type a shortened message"
    )
}

/// Media relay failure.
#[must_use]
pub fn media_failed(stage: RelayStage) -> String {
    format!("Couldn't attach your media file ({stage} failed), please send it again.")
}

/// Usage instructions.
#[must_use]
pub fn help(approval_enabled: bool) -> String {
    let last_step = if approval_enabled {
        "3) Type the command /tweet to post your message to the group so that an admin can authorize your tweet."
    } else {
        "3) Type the command /tweet to post your message."
    };
    format!(
        "1) Type the message you want to tweet.\n2) Upload the media file you want to post to your tweet (optional).\n{last_step}"
    )
}

/// Confirmation for a directly published tweet.
#[must_use]
pub fn posted(link: &str) -> String {
    format!("Your tweet has been posted.\nVisit the link below to check it out:\n{link}")
}

/// Body of the message posted to the approval chat.
#[must_use]
pub fn waiting_for_approval(text: &str, author: &str) -> String {
    format!(
        "{text}\n\n@{author} wants to tweet the message above, if you are an admin you can approve it by replying to this message with 👍"
    )
}

/// Approval message after an admin approved it.
#[must_use]
pub fn being_tweeted(text: &str, author: &str, admin: &str) -> String {
    format!(
        "{text}\n\n@{author} wanted to tweet the message above and it's been approved by @{admin}"
    )
}

/// Confirmation posted to the approval chat.
#[must_use]
pub fn tweeted_by(author: &str, admin: &str, link: &str) -> String {
    format!(
        "This tweet was requested by @{author} and tweeted by @{admin}.\nVisit the link below to check it out:\n{link}"
    )
}

/// Notice for the requester once their tweet was approved.
#[must_use]
pub fn approved_notice(admin: &str, link: &str) -> String {
    format!("Your tweet has been approved by @{admin}:\n{link}")
}

/// Stream connected notice (HTML).
#[must_use]
pub fn stream_connected(screen_name: &str) -> String {
    let name = html_escape::encode_text(screen_name);
    format!(
        "Connected to the Twitter account <a href=\"https://twitter.com/{name}\">@{name}</a>, /start tweeting or ask for /help to see the instructions."
    )
}

/// Mirrored tweet (HTML).
#[must_use]
pub fn mirrored_tweet(author: &str, text: &str, link: &str) -> String {
    format!(
        "<b>@{}</b>: {}\n{}",
        html_escape::encode_text(author),
        html_escape::encode_text(text),
        html_escape::encode_text(link)
    )
}
