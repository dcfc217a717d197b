//! Testing helpers and fakes.
//!
//! Recording fakes for the chat transport and the Twitter collaborators,
//! inbound event builders and a [`harness`] that wires them into a
//! [`Relay`]. Call-count checks on single collaborators use the mockall
//! mocks generated next to each trait.

use crate::config::{Settings, SettingsStore, TWITTER_API_BASE};
use crate::dispatcher::Relay;
use crate::media::MediaRelay;
use crate::transport::{
    ChatKind, ChatMedia, ChatRef, ChatTransport, InboundEvent, MediaKind, MemberRole, RemoteFile,
    ReplyTo, Sender, SentMessage, TextFormat, TransportError,
};
use crate::twitter::{
    Account, Credentials, EventStream, MediaId, PostedStatus, ProcessingInfo, ProcessingState,
    SocialClient, SocialPlatform, StatusUpdate, TokenPair, TwitterError, UploadInit,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// User id of the bot in every fake transport.
pub const BOT_ID: u64 = 4242;
/// The only verifier the fake platform accepts.
pub const GOOD_PIN: &str = "1234567";

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A message sent through [`RecordingTransport`]
#[derive(Debug, Clone)]
pub struct SentRecord {
    /// Target chat
    pub chat_id: i64,
    /// Assigned message id
    pub message_id: i32,
    /// Text or caption
    pub text: String,
    /// Text format
    pub format: TextFormat,
    /// Re-sent attachment, for media messages
    pub media: Option<ChatMedia>,
}

/// An edit made through [`RecordingTransport`]
#[derive(Debug, Clone)]
pub struct EditRecord {
    /// Chat of the edited message
    pub chat_id: i64,
    /// Edited message
    pub message_id: i32,
    /// New text
    pub text: String,
    /// Whether the caption was edited
    pub caption: bool,
}

#[derive(Default)]
struct TransportState {
    sent: Vec<SentRecord>,
    edits: Vec<EditRecord>,
    roles: HashMap<(i64, u64), MemberRole>,
    files: HashMap<String, Vec<u8>>,
    downloads: usize,
    role_lookups: usize,
    next_message_id: i32,
}

/// Chat transport that records everything it is asked to do
#[derive(Default)]
pub struct RecordingTransport {
    state: Mutex<TransportState>,
}

impl RecordingTransport {
    /// Empty transport
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a file downloadable under `file_id`.
    pub fn add_file(&self, file_id: &str, bytes: Vec<u8>) {
        locked(&self.state).files.insert(file_id.to_string(), bytes);
    }

    /// Set the role of `user_id` in `chat_id`.
    pub fn set_role(&self, chat_id: i64, user_id: u64, role: MemberRole) {
        locked(&self.state).roles.insert((chat_id, user_id), role);
    }

    /// Everything sent so far
    #[must_use]
    pub fn sent(&self) -> Vec<SentRecord> {
        locked(&self.state).sent.clone()
    }

    /// Texts sent to one chat, oldest first
    #[must_use]
    pub fn texts_to(&self, chat_id: i64) -> Vec<String> {
        locked(&self.state)
            .sent
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .map(|m| m.text.clone())
            .collect()
    }

    /// Most recent message sent to one chat
    #[must_use]
    pub fn last_sent_to(&self, chat_id: i64) -> Option<SentRecord> {
        locked(&self.state)
            .sent
            .iter()
            .rev()
            .find(|m| m.chat_id == chat_id)
            .cloned()
    }

    /// Edits so far
    #[must_use]
    pub fn edits(&self) -> Vec<EditRecord> {
        locked(&self.state).edits.clone()
    }

    /// Number of downloads
    #[must_use]
    pub fn downloads(&self) -> usize {
        locked(&self.state).downloads
    }

    /// Number of role lookups
    #[must_use]
    pub fn role_lookups(&self) -> usize {
        locked(&self.state).role_lookups
    }

    fn record(
        &self,
        chat_id: i64,
        text: &str,
        format: TextFormat,
        media: Option<ChatMedia>,
    ) -> SentMessage {
        let mut state = locked(&self.state);
        state.next_message_id += 1;
        let message_id = state.next_message_id;
        state.sent.push(SentRecord {
            chat_id,
            message_id,
            text: text.to_string(),
            format,
            media,
        });
        SentMessage {
            chat_id,
            message_id,
        }
    }

    fn record_edit(&self, chat_id: i64, message_id: i32, text: &str, caption: bool) {
        locked(&self.state).edits.push(EditRecord {
            chat_id,
            message_id,
            text: text.to_string(),
            caption,
        });
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        format: TextFormat,
    ) -> Result<SentMessage, TransportError> {
        Ok(self.record(chat_id, text, format, None))
    }

    async fn send_media(
        &self,
        chat_id: i64,
        media: &ChatMedia,
        caption: &str,
    ) -> Result<SentMessage, TransportError> {
        Ok(self.record(chat_id, caption, TextFormat::Plain, Some(media.clone())))
    }

    async fn edit_text(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
    ) -> Result<(), TransportError> {
        self.record_edit(chat_id, message_id, text, false);
        Ok(())
    }

    async fn edit_caption(
        &self,
        chat_id: i64,
        message_id: i32,
        caption: &str,
    ) -> Result<(), TransportError> {
        self.record_edit(chat_id, message_id, caption, true);
        Ok(())
    }

    async fn member_role(&self, chat_id: i64, user_id: u64) -> Result<MemberRole, TransportError> {
        let mut state = locked(&self.state);
        state.role_lookups += 1;
        Ok(state
            .roles
            .get(&(chat_id, user_id))
            .copied()
            .unwrap_or(MemberRole::Member))
    }

    async fn own_id(&self) -> Result<u64, TransportError> {
        Ok(BOT_ID)
    }

    async fn resolve_file(&self, file_id: &str) -> Result<RemoteFile, TransportError> {
        let state = locked(&self.state);
        let bytes = state
            .files
            .get(file_id)
            .ok_or_else(|| TransportError::Api(format!("unknown file {file_id}")))?;
        Ok(RemoteFile {
            path: format!("files/{file_id}"),
            size: u32::try_from(bytes.len()).unwrap_or(u32::MAX),
        })
    }

    async fn download_file(&self, path: &str) -> Result<Vec<u8>, TransportError> {
        let mut state = locked(&self.state);
        state.downloads += 1;
        let file_id = path.trim_start_matches("files/");
        state
            .files
            .get(file_id)
            .cloned()
            .ok_or_else(|| TransportError::Network(format!("download of {path} failed")))
    }
}

/// One chunked upload seen by [`FakeClient`]
#[derive(Debug, Clone)]
pub struct UploadRecord {
    /// Assigned handle
    pub media_id: MediaId,
    /// `INIT` parameters
    pub init: UploadInit,
    /// Raw byte length of every `APPEND` segment
    pub segments: Vec<usize>,
    /// Alt text set through metadata
    pub alt_text: Option<String>,
}

#[derive(Default)]
struct ClientState {
    posted: Vec<StatusUpdate>,
    uploads: Vec<UploadRecord>,
    processing: VecDeque<ProcessingInfo>,
    status_polls: usize,
    stream_opens: usize,
    fail_uploads: bool,
    fail_posts: bool,
    fail_verification: bool,
}

/// Twitter account client that records posts and uploads
pub struct FakeClient {
    screen_name: String,
    state: Mutex<ClientState>,
}

impl FakeClient {
    /// Client for the account `screen_name`
    #[must_use]
    pub fn new(screen_name: &str) -> Self {
        Self {
            screen_name: screen_name.to_string(),
            state: Mutex::new(ClientState::default()),
        }
    }

    /// Posted status updates
    #[must_use]
    pub fn posted(&self) -> Vec<StatusUpdate> {
        locked(&self.state).posted.clone()
    }

    /// Uploads, in `INIT` order
    #[must_use]
    pub fn uploads(&self) -> Vec<UploadRecord> {
        locked(&self.state).uploads.clone()
    }

    /// Number of `STATUS` polls
    #[must_use]
    pub fn status_polls(&self) -> usize {
        locked(&self.state).status_polls
    }

    /// Number of `statuses/filter` subscriptions opened
    #[must_use]
    pub fn stream_opens(&self) -> usize {
        locked(&self.state).stream_opens
    }

    /// Processing info returned by `FINALIZE` and the following polls
    pub fn set_processing(&self, infos: Vec<ProcessingInfo>) {
        locked(&self.state).processing = infos.into();
    }

    /// Make every `INIT` fail.
    pub fn fail_uploads(&self) {
        locked(&self.state).fail_uploads = true;
    }

    /// Make `statuses/update` fail.
    pub fn fail_posts(&self, fail: bool) {
        locked(&self.state).fail_posts = fail;
    }

    /// Make `verify_credentials` fail.
    pub fn fail_verification(&self, fail: bool) {
        locked(&self.state).fail_verification = fail;
    }
}

fn api_error(message: &str) -> TwitterError {
    TwitterError::Api {
        status: 400,
        message: message.to_string(),
    }
}

#[async_trait]
impl SocialClient for FakeClient {
    async fn verify_credentials(&self) -> Result<Account, TwitterError> {
        if locked(&self.state).fail_verification {
            return Err(api_error("Invalid or expired token"));
        }
        Ok(Account {
            id_str: "100".to_string(),
            screen_name: self.screen_name.clone(),
        })
    }

    async fn post_status(&self, update: &StatusUpdate) -> Result<PostedStatus, TwitterError> {
        let mut state = locked(&self.state);
        if state.fail_posts {
            return Err(api_error("Status is a duplicate"));
        }
        state.posted.push(update.clone());
        Ok(PostedStatus {
            id_str: state.posted.len().to_string(),
            screen_name: self.screen_name.clone(),
        })
    }

    async fn upload_init(&self, init: &UploadInit) -> Result<MediaId, TwitterError> {
        let mut state = locked(&self.state);
        if state.fail_uploads {
            return Err(api_error("media type unrecognized"));
        }
        let media_id = MediaId(format!("m{}", state.uploads.len() + 1));
        state.uploads.push(UploadRecord {
            media_id: media_id.clone(),
            init: init.clone(),
            segments: Vec::new(),
            alt_text: None,
        });
        Ok(media_id)
    }

    async fn upload_append(
        &self,
        media_id: &MediaId,
        segment_index: u32,
        chunk: &[u8],
    ) -> Result<(), TwitterError> {
        let mut state = locked(&self.state);
        let upload = state
            .uploads
            .iter_mut()
            .find(|u| &u.media_id == media_id)
            .ok_or_else(|| api_error("unknown media"))?;
        if usize::try_from(segment_index).ok() != Some(upload.segments.len()) {
            return Err(api_error("segment out of order"));
        }
        upload.segments.push(chunk.len());
        Ok(())
    }

    async fn upload_finalize(
        &self,
        _media_id: &MediaId,
    ) -> Result<Option<ProcessingInfo>, TwitterError> {
        Ok(locked(&self.state).processing.pop_front())
    }

    async fn upload_status(&self, _media_id: &MediaId) -> Result<ProcessingInfo, TwitterError> {
        let mut state = locked(&self.state);
        state.status_polls += 1;
        Ok(state.processing.pop_front().unwrap_or(ProcessingInfo {
            state: ProcessingState::Succeeded,
            check_after_secs: None,
            error: None,
        }))
    }

    async fn create_metadata(
        &self,
        media_id: &MediaId,
        alt_text: &str,
    ) -> Result<(), TwitterError> {
        let mut state = locked(&self.state);
        let upload = state
            .uploads
            .iter_mut()
            .find(|u| &u.media_id == media_id)
            .ok_or_else(|| api_error("unknown media"))?;
        upload.alt_text = Some(alt_text.to_string());
        Ok(())
    }

    fn stream_filter(&self, _track: &[String]) -> EventStream {
        locked(&self.state).stream_opens += 1;
        Box::pin(futures_util::stream::pending())
    }
}

#[derive(Default)]
struct PlatformState {
    request_tokens: usize,
    verifiers: Vec<String>,
    fail_request_token: bool,
}

/// OAuth platform that accepts [`GOOD_PIN`] and hands out one shared client
pub struct FakePlatform {
    client: Arc<FakeClient>,
    state: Mutex<PlatformState>,
}

impl FakePlatform {
    /// Platform whose `connect` returns `client`
    #[must_use]
    pub fn new(client: Arc<FakeClient>) -> Self {
        Self {
            client,
            state: Mutex::new(PlatformState::default()),
        }
    }

    /// Number of request tokens issued
    #[must_use]
    pub fn request_tokens(&self) -> usize {
        locked(&self.state).request_tokens
    }

    /// Verifiers submitted, in order
    #[must_use]
    pub fn verifiers(&self) -> Vec<String> {
        locked(&self.state).verifiers.clone()
    }

    /// Make the request-token leg fail.
    pub fn fail_request_token(&self) {
        locked(&self.state).fail_request_token = true;
    }
}

#[async_trait]
impl SocialPlatform for FakePlatform {
    async fn request_token(&self) -> Result<TokenPair, TwitterError> {
        let mut state = locked(&self.state);
        if state.fail_request_token {
            return Err(api_error("Could not authenticate you"));
        }
        state.request_tokens += 1;
        let n = state.request_tokens;
        Ok(TokenPair {
            token: format!("req-{n}"),
            secret: format!("req-secret-{n}"),
        })
    }

    fn authorize_url(&self, request: &TokenPair) -> String {
        format!("{TWITTER_API_BASE}/oauth/authorize?oauth_token={}", request.token)
    }

    async fn access_token(
        &self,
        _request: &TokenPair,
        verifier: &str,
    ) -> Result<Credentials, TwitterError> {
        locked(&self.state).verifiers.push(verifier.to_string());
        if verifier != GOOD_PIN {
            return Err(TwitterError::Api {
                status: 401,
                message: "Invalid oauth_verifier parameter".to_string(),
            });
        }
        Credentials::new("access-token", "access-secret")
            .ok_or_else(|| TwitterError::Response("empty credentials".to_string()))
    }

    fn connect(&self, _credentials: &Credentials) -> Arc<dyn SocialClient> {
        self.client.clone()
    }
}

/// A photo attachment
#[must_use]
pub fn photo(file_id: &str) -> ChatMedia {
    ChatMedia {
        kind: MediaKind::Photo,
        file_id: file_id.to_string(),
        mime_type: None,
        file_size: None,
    }
}

fn user(id: u64) -> Sender {
    Sender {
        id,
        username: Some(format!("user{id}")),
    }
}

fn chat_user(chat_id: i64) -> Sender {
    user(chat_id.unsigned_abs())
}

/// Plain text in a private chat (the user id equals the chat id)
#[must_use]
pub fn private_text(chat_id: i64, text: &str) -> InboundEvent {
    InboundEvent {
        chat: ChatRef {
            id: chat_id,
            kind: ChatKind::Private,
        },
        from: Some(chat_user(chat_id)),
        message_id: 1,
        text: Some(text.to_string()),
        caption: None,
        media: None,
        reply_to: None,
    }
}

/// Photo in a private chat
#[must_use]
pub fn private_photo(chat_id: i64, file_id: &str, caption: Option<&str>) -> InboundEvent {
    InboundEvent {
        chat: ChatRef {
            id: chat_id,
            kind: ChatKind::Private,
        },
        from: Some(chat_user(chat_id)),
        message_id: 1,
        text: None,
        caption: caption.map(ToString::to_string),
        media: Some(photo(file_id)),
        reply_to: None,
    }
}

/// Plain text in a group
#[must_use]
pub fn group_text(chat_id: i64, user_id: u64, text: &str) -> InboundEvent {
    InboundEvent {
        chat: ChatRef {
            id: chat_id,
            kind: ChatKind::Group,
        },
        from: Some(user(user_id)),
        message_id: 1,
        text: Some(text.to_string()),
        caption: None,
        media: None,
        reply_to: None,
    }
}

/// Reply in a group to `reply_to` authored by `reply_from`
#[must_use]
pub fn group_reply(
    chat_id: i64,
    user_id: u64,
    text: &str,
    reply_to: i32,
    reply_from: u64,
) -> InboundEvent {
    InboundEvent {
        reply_to: Some(ReplyTo {
            message_id: reply_to,
            from_id: Some(reply_from),
        }),
        ..group_text(chat_id, user_id, text)
    }
}

/// Harness configuration
#[derive(Debug, Clone, Default)]
pub struct HarnessOptions {
    linked: bool,
    approval_chat: Option<i64>,
}

impl HarnessOptions {
    /// Settings already carry credentials.
    #[must_use]
    pub fn linked() -> Self {
        Self {
            linked: true,
            approval_chat: None,
        }
    }

    /// No credentials; sessions start unauthenticated.
    #[must_use]
    pub fn unlinked() -> Self {
        Self::default()
    }

    /// Route `/tweet` through `chat_id`.
    #[must_use]
    pub const fn with_approval_chat(mut self, chat_id: i64) -> Self {
        self.approval_chat = Some(chat_id);
        self
    }
}

/// A relay wired to fakes
pub struct Harness {
    /// The relay under test
    pub relay: Relay,
    /// Recording transport
    pub transport: Arc<RecordingTransport>,
    /// Fake OAuth platform
    pub platform: Arc<FakePlatform>,
    /// Shared fake account client
    pub client: Arc<FakeClient>,
    /// In-memory settings
    pub settings: Arc<SettingsStore>,
}

/// Build a relay over fakes.
pub async fn harness(options: HarnessOptions) -> Harness {
    let mut settings = Settings::default();
    settings.telegram.token = "123:abc".to_string();
    settings.telegram.chat_id = options.approval_chat;
    settings.twitter.consumer_key = "ck".to_string();
    settings.twitter.consumer_secret = "cs".to_string();
    if options.linked {
        settings.twitter.access_token = Some("seed-token".to_string());
        settings.twitter.access_token_secret = Some("seed-secret".to_string());
    }
    let settings = Arc::new(SettingsStore::in_memory(settings));

    let transport = Arc::new(RecordingTransport::new());
    let client = Arc::new(FakeClient::new("relay_bot"));
    let platform = Arc::new(FakePlatform::new(client.clone()));
    let relay = Relay::new(transport.clone(), platform.clone(), settings.clone())
        .await
        .with_media_relay(MediaRelay::new().with_max_poll_wait(Duration::from_millis(1)));

    Harness {
        relay,
        transport,
        platform,
        client,
        settings,
    }
}
