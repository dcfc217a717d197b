#![deny(missing_docs)]
//! TeleTweet core library.
//!
//! Per-chat session state, the authorization and draft/publish flows, the
//! media relay and the Twitter client. Transport adapters plug in through
//! [`transport::ChatTransport`].

/// Group-approval gate for drafts.
pub mod approval;
/// Authorization flow (three-legged OAuth with PIN).
mod auth;
/// Settings document and constants.
pub mod config;
/// Top-level inbound event dispatcher.
pub mod dispatcher;
/// Draft/publish flow.
pub mod draft;
/// Error taxonomy reported to chats.
pub mod error;
/// Media relay pipeline.
pub mod media;
/// User-facing message texts.
pub mod messages;
/// Shared stream subscription mirrored into the verified chats.
pub mod mirror;
/// Chat sessions and the session store.
pub mod session;
/// Chat transport collaborator interface.
pub mod transport;
/// Twitter API client.
pub mod twitter;
/// Utility functions.
pub mod utils;

pub use dispatcher::Relay;

#[cfg(test)]
pub mod testing;
