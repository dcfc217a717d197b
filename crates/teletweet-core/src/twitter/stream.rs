//! Keyword-filtered status stream.
//!
//! The streaming endpoint delivers newline-delimited JSON over a long-lived
//! HTTP response. [`LineDecoder`] turns raw chunks into [`StreamEvent`]s and
//! [`open`] wraps a pending request into an event stream.

use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use std::collections::VecDeque;
use std::pin::Pin;
use tracing::{debug, trace};

/// Boxed stream of [`StreamEvent`]s.
pub type EventStream = Pin<Box<dyn futures_util::Stream<Item = StreamEvent> + Send>>;

/// Author of a streamed tweet
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TweetUser {
    /// Handle without the `@`
    pub screen_name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ExtendedTweet {
    full_text: String,
}

/// A tweet delivered by the stream
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawTweet")]
pub struct Tweet {
    /// Status id
    pub id_str: String,
    /// Full text (extended text when the tweet was truncated)
    pub text: String,
    /// Author
    pub user: TweetUser,
}

#[derive(Deserialize)]
struct RawTweet {
    id_str: String,
    text: String,
    user: TweetUser,
    #[serde(default)]
    extended_tweet: Option<ExtendedTweet>,
}

impl From<RawTweet> for Tweet {
    fn from(raw: RawTweet) -> Self {
        Self {
            id_str: raw.id_str,
            text: raw.extended_tweet.map_or(raw.text, |ext| ext.full_text),
            user: raw.user,
        }
    }
}

impl Tweet {
    /// Direct link to the tweet.
    #[must_use]
    pub fn url(&self) -> String {
        super::status_url(&self.user.screen_name, &self.id_str)
    }
}

/// Events emitted by a stream subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The connection attempt started
    Connect,
    /// The server accepted the subscription
    Connected,
    /// A matching tweet
    Tweet(Tweet),
    /// A recoverable or terminal error
    Error(String),
    /// The stream ended; no further events follow
    Disconnect(String),
}

#[derive(Deserialize)]
struct DisconnectNotice {
    disconnect: DisconnectBody,
}

#[derive(Deserialize)]
struct DisconnectBody {
    #[serde(default)]
    reason: Option<String>,
}

/// Incremental newline-delimited JSON decoder
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the events of every completed line.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_line(line: &[u8]) -> Option<StreamEvent> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        trace!("Stream keep-alive");
        return None;
    }

    if let Ok(tweet) = serde_json::from_str::<Tweet>(text) {
        return Some(StreamEvent::Tweet(tweet));
    }
    if let Ok(notice) = serde_json::from_str::<DisconnectNotice>(text) {
        let reason = notice
            .disconnect
            .reason
            .unwrap_or_else(|| "disconnected by server".to_string());
        return Some(StreamEvent::Disconnect(reason));
    }

    debug!("Ignoring stream message: {}", crate::utils::truncate_str(text, 120));
    None
}

enum Phase {
    Pending(reqwest::RequestBuilder),
    Reading {
        body: BoxStream<'static, reqwest::Result<Bytes>>,
        decoder: LineDecoder,
    },
    Finished,
}

struct State {
    phase: Phase,
    queued: VecDeque<StreamEvent>,
}

/// Turn a prepared streaming request into an event stream.
///
/// The request is only sent when the stream is first polled.
pub(crate) fn open(request: reqwest::RequestBuilder) -> EventStream {
    let state = State {
        phase: Phase::Pending(request),
        queued: VecDeque::from([StreamEvent::Connect]),
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.queued.pop_front() {
                return Some((event, state));
            }

            match std::mem::replace(&mut state.phase, Phase::Finished) {
                Phase::Pending(request) => match request.send().await {
                    Ok(response) if response.status().is_success() => {
                        state.queued.push_back(StreamEvent::Connected);
                        state.phase = Phase::Reading {
                            body: response.bytes_stream().boxed(),
                            decoder: LineDecoder::new(),
                        };
                    }
                    Ok(response) => {
                        let status = response.status();
                        let body = response.text().await.unwrap_or_default();
                        state
                            .queued
                            .push_back(StreamEvent::Error(format!("HTTP {status}: {body}")));
                        state
                            .queued
                            .push_back(StreamEvent::Disconnect(format!("HTTP {status}")));
                    }
                    Err(e) => {
                        state.queued.push_back(StreamEvent::Error(e.to_string()));
                        state
                            .queued
                            .push_back(StreamEvent::Disconnect("connection failed".to_string()));
                    }
                },
                Phase::Reading { mut body, mut decoder } => match body.next().await {
                    Some(Ok(chunk)) => {
                        let events = decoder.push(&chunk);
                        let ended = events
                            .iter()
                            .any(|e| matches!(e, StreamEvent::Disconnect(_)));
                        state.queued.extend(events);
                        if !ended {
                            state.phase = Phase::Reading { body, decoder };
                        }
                    }
                    Some(Err(e)) => {
                        state.queued.push_back(StreamEvent::Error(e.to_string()));
                        state
                            .queued
                            .push_back(StreamEvent::Disconnect("read error".to_string()));
                    }
                    None => {
                        state
                            .queued
                            .push_back(StreamEvent::Disconnect("stream closed".to_string()));
                    }
                },
                Phase::Finished => return None,
            }
        }
    }))
}

/// Event stream for a subscription that could not even be prepared.
pub(crate) fn failed(reason: String) -> EventStream {
    Box::pin(stream::iter([
        StreamEvent::Connect,
        StreamEvent::Error(reason),
        StreamEvent::Disconnect("connection failed".to_string()),
    ]))
}
