//! Small helpers shared by the flows and the transport adapters.

use std::fmt::Display;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::warn;

/// Truncate a string to at most `max_chars` characters (not bytes).
#[must_use]
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Retry a chat transport operation with exponential backoff.
///
/// Used for file resolution, downloads and outgoing messages, which fail
/// transiently on flaky connections:
/// - Initial delay: 500ms
/// - Max delay: 4s
/// - Max attempts: 3 (see `config.rs`)
///
/// Returns the last error if every attempt fails.
///
/// # Errors
///
/// Propagates the final error of `operation`.
pub async fn retry_transport_operation<F, Fut, T, E>(operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Display,
{
    use crate::config::{
        TRANSPORT_INITIAL_BACKOFF_MS, TRANSPORT_MAX_BACKOFF_MS, TRANSPORT_MAX_RETRIES,
    };

    let retry_strategy = ExponentialBackoff::from_millis(TRANSPORT_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TRANSPORT_MAX_BACKOFF_MS))
        .map(jitter)
        .take(TRANSPORT_MAX_RETRIES);

    Retry::spawn(retry_strategy, operation).await.map_err(|e| {
        warn!(
            "Transport operation failed after {} attempts: {}",
            TRANSPORT_MAX_RETRIES, e
        );
        e
    })
}
