//! Stream mirror
//!
//! One `statuses/filter` subscription per linked account, shared by every
//! verified chat. Twitter drops an older connection when the same account
//! opens a second one, so chats join the running subscription instead of
//! opening their own.

use crate::error::FlowError;
use crate::messages;
use crate::transport::{ChatTransport, TextFormat};
use crate::twitter::{Account, Credentials, EventStream, SocialClient, StreamEvent};
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

/// Chats fed by one subscription and its connection state
#[derive(Debug, Default)]
pub struct MirrorState {
    chats: RwLock<Vec<i64>>,
    connected: AtomicBool,
    finished: AtomicBool,
}

impl MirrorState {
    /// State feeding a single chat.
    #[must_use]
    pub fn new(chat_id: i64) -> Self {
        Self {
            chats: RwLock::new(vec![chat_id]),
            ..Self::default()
        }
    }

    /// Add a chat; `false` when it was already subscribed.
    pub async fn add_chat(&self, chat_id: i64) -> bool {
        let mut chats = self.chats.write().await;
        if chats.contains(&chat_id) {
            return false;
        }
        chats.push(chat_id);
        true
    }

    /// Subscribed chats in subscription order
    pub async fn chats(&self) -> Vec<i64> {
        self.chats.read().await.clone()
    }

    /// Whether the stream reported `connected`
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Whether the stream ended
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

struct Subscription {
    credentials: Credentials,
    state: Arc<MirrorState>,
    _guard: DropGuard,
}

/// The account's stream subscription, if one is open
pub struct StreamHub {
    transport: Arc<dyn ChatTransport>,
    current: Mutex<Option<Subscription>>,
}

impl StreamHub {
    /// Hub delivering stream events through `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            transport,
            current: Mutex::new(None),
        }
    }

    /// Feed `chat_id` from the stream of `credentials`.
    ///
    /// Joins the running subscription when it belongs to the same account
    /// and has not ended; otherwise opens a new one, cancelling the old.
    pub async fn subscribe(
        &self,
        chat_id: i64,
        credentials: &Credentials,
        account: &Account,
        client: &dyn SocialClient,
        track: &[String],
    ) {
        let joined = {
            let mut current = self.current.lock().await;
            let running = current
                .as_ref()
                .filter(|sub| sub.credentials == *credentials && !sub.state.is_finished())
                .map(|sub| sub.state.clone());
            match running {
                Some(state) => Some(state.add_chat(chat_id).await && state.is_connected()),
                None => {
                    if current.take().is_some() {
                        info!("Stream subscription replaced");
                    }
                    let state = Arc::new(MirrorState::new(chat_id));
                    let guard = spawn_mirror(
                        self.transport.clone(),
                        state.clone(),
                        account.screen_name.clone(),
                        client.stream_filter(track),
                    );
                    *current = Some(Subscription {
                        credentials: credentials.clone(),
                        state,
                        _guard: guard,
                    });
                    None
                }
            }
        };

        match joined {
            Some(true) => {
                debug!(chat_id, "Joined connected stream");
                let text = messages::stream_connected(&account.screen_name);
                if let Err(e) = self.transport.send_text(chat_id, &text, TextFormat::Html).await {
                    error!(chat_id, "Failed to mirror stream event: {e}");
                }
            }
            Some(false) => debug!(chat_id, "Joined stream"),
            None => info!(chat_id, screen_name = %account.screen_name, "Stream subscription opened"),
        }
    }

    /// Chats fed by the open subscription
    pub async fn subscribers(&self) -> Vec<i64> {
        let state = self.current.lock().await.as_ref().map(|sub| sub.state.clone());
        match state {
            Some(state) => state.chats().await,
            None => Vec::new(),
        }
    }
}

/// Spawn the mirror task. Dropping the returned guard stops it.
pub fn spawn_mirror(
    transport: Arc<dyn ChatTransport>,
    state: Arc<MirrorState>,
    screen_name: String,
    events: EventStream,
) -> DropGuard {
    let token = CancellationToken::new();
    let cancelled = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = cancelled.cancelled() => debug!("Stream mirror cancelled"),
            () = run_mirror(transport, &state, &screen_name, events) => {}
        }
        state.finished.store(true, Ordering::SeqCst);
    });
    token.drop_guard()
}

async fn broadcast(
    transport: &dyn ChatTransport,
    state: &MirrorState,
    text: &str,
    format: TextFormat,
) {
    for chat_id in state.chats().await {
        if let Err(e) = transport.send_text(chat_id, text, format).await {
            error!(chat_id, "Failed to mirror stream event: {e}");
        }
    }
}

async fn run_mirror(
    transport: Arc<dyn ChatTransport>,
    state: &MirrorState,
    screen_name: &str,
    mut events: EventStream,
) {
    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Connect => info!("Connecting to Twitter..."),
            StreamEvent::Connected => {
                info!(%screen_name, "Connected to Twitter stream");
                state.connected.store(true, Ordering::SeqCst);
                let text = messages::stream_connected(screen_name);
                broadcast(transport.as_ref(), state, &text, TextFormat::Html).await;
            }
            StreamEvent::Tweet(tweet) => {
                debug!(status_id = %tweet.id_str, "Mirroring tweet");
                let text = messages::mirrored_tweet(&tweet.user.screen_name, &tweet.text, &tweet.url());
                broadcast(transport.as_ref(), state, &text, TextFormat::Html).await;
            }
            StreamEvent::Error(reason) => warn!("Stream error: {reason}"),
            StreamEvent::Disconnect(reason) => {
                warn!("{}", FlowError::StreamDisconnected(reason));
                state.connected.store(false, Ordering::SeqCst);
                broadcast(
                    transport.as_ref(),
                    state,
                    messages::STREAM_DISCONNECTED,
                    TextFormat::Plain,
                )
                .await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeClient, RecordingTransport};
    use crate::twitter::{Tweet, TweetUser};
    use futures_util::stream;
    use std::time::Duration;

    fn tweet() -> Tweet {
        Tweet {
            id_str: "9".to_string(),
            text: "hey @relay_bot <3".to_string(),
            user: TweetUser {
                screen_name: "carol".to_string(),
            },
        }
    }

    async fn wait_for(transport: &RecordingTransport, count: usize) {
        for _ in 0..100 {
            if transport.sent().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_events_are_mirrored_until_disconnect() {
        let transport = Arc::new(RecordingTransport::new());
        let events: EventStream = Box::pin(stream::iter(vec![
            StreamEvent::Connect,
            StreamEvent::Connected,
            StreamEvent::Tweet(tweet()),
            StreamEvent::Error("hiccup".to_string()),
            StreamEvent::Disconnect("closed".to_string()),
            StreamEvent::Tweet(tweet()),
        ]));

        let state = Arc::new(MirrorState::new(5));
        let _guard = spawn_mirror(transport.clone(), state.clone(), "relay_bot".to_string(), events);
        wait_for(&transport, 3).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let texts = transport.texts_to(5);
        assert_eq!(texts.len(), 3);
        assert!(texts[0].contains("@relay_bot</a>"));
        assert!(texts[1].contains("<b>@carol</b>: hey @relay_bot &lt;3"));
        assert!(texts[1].contains("https://twitter.com/carol/status/9"));
        assert_eq!(texts[2], messages::STREAM_DISCONNECTED);
        assert!(state.is_finished());
    }

    #[tokio::test]
    async fn test_dropping_guard_stops_mirror() {
        let transport = Arc::new(RecordingTransport::new());
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let events: EventStream = Box::pin(receiver_stream(rx));

        let state = Arc::new(MirrorState::new(5));
        let guard = spawn_mirror(transport.clone(), state, "relay_bot".to_string(), events);
        let _ = tx.send(StreamEvent::Connected);
        wait_for(&transport, 1).await;

        drop(guard);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = tx.send(StreamEvent::Tweet(tweet()));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(transport.texts_to(5).len(), 1);
    }

    fn account() -> Account {
        Account {
            id_str: "100".to_string(),
            screen_name: "relay_bot".to_string(),
        }
    }

    fn creds(token: &str) -> Credentials {
        Credentials::new(token, "secret").unwrap_or_else(|| panic!("valid credentials"))
    }

    #[tokio::test]
    async fn test_chats_share_one_subscription_per_account() {
        let transport = Arc::new(RecordingTransport::new());
        let client = FakeClient::new("relay_bot");
        let hub = StreamHub::new(transport.clone());
        let track = vec!["@relay_bot".to_string()];

        hub.subscribe(1, &creds("at"), &account(), &client, &track).await;
        hub.subscribe(2, &creds("at"), &account(), &client, &track).await;
        hub.subscribe(2, &creds("at"), &account(), &client, &track).await;

        assert_eq!(client.stream_opens(), 1);
        assert_eq!(hub.subscribers().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_new_account_replaces_subscription() {
        let transport = Arc::new(RecordingTransport::new());
        let client = FakeClient::new("relay_bot");
        let hub = StreamHub::new(transport.clone());
        let track = vec!["@relay_bot".to_string()];

        hub.subscribe(1, &creds("old"), &account(), &client, &track).await;
        hub.subscribe(2, &creds("new"), &account(), &client, &track).await;

        assert_eq!(client.stream_opens(), 2);
        assert_eq!(hub.subscribers().await, vec![2]);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_connected_notice() {
        let transport = Arc::new(RecordingTransport::new());
        let hub = StreamHub::new(transport.clone());
        let state = Arc::new(MirrorState::new(1));
        state.connected.store(true, Ordering::SeqCst);
        *hub.current.lock().await = Some(Subscription {
            credentials: creds("at"),
            state: state.clone(),
            _guard: CancellationToken::new().drop_guard(),
        });

        let client = FakeClient::new("relay_bot");
        hub.subscribe(2, &creds("at"), &account(), &client, &[]).await;

        assert_eq!(client.stream_opens(), 0);
        let texts = transport.texts_to(2);
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("@relay_bot</a>"));
    }

    fn receiver_stream(
        rx: tokio::sync::mpsc::UnboundedReceiver<StreamEvent>,
    ) -> impl futures_util::Stream<Item = StreamEvent> + Send {
        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|e| (e, rx)) })
    }
}
