#![deny(missing_docs)]
//! Telegram transport adapter for TeleTweet.

/// Telegram-specific bot/transport implementation.
pub mod bot;
/// Telegram runtime entrypoint.
pub mod runner;
