//! Chat sessions
//!
//! One [`ChatSession`] per chat identifier, created on the first inbound
//! event and kept for the lifetime of the process. Handlers lock a session
//! only for short synchronous mutations and never across a network call.

use crate::config::TWEET_CHAR_LIMIT;
use crate::error::{AuthStage, FlowError};
use crate::transport::ChatMedia;
use crate::twitter::{Account, Credentials, MediaId, SocialClient, TokenPair};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Authorization state of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// No account linked and no handshake in progress
    Unauthenticated,
    /// Waiting for the user to paste the PIN for this request token
    AwaitingVerifier(TokenPair),
    /// Linked to an account
    Authenticated(Credentials),
}

/// Observable phase of the draft/publish flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftPhase {
    /// Nothing stored
    Empty,
    /// Media stored, text still missing
    Composing,
    /// Text stored; `/tweet` will publish
    ReadyToPublish,
    /// Draft handed to the approval chat
    AwaitingApproval,
}

/// Check a text against the character ceiling (Unicode scalar values).
///
/// # Errors
///
/// Returns `FlowError::MessageTooLong` with the exact overflow.
pub fn check_length(text: &str) -> Result<(), FlowError> {
    let count = text.chars().count();
    if count > TWEET_CHAR_LIMIT {
        return Err(FlowError::MessageTooLong {
            overflow: count - TWEET_CHAR_LIMIT,
        });
    }
    Ok(())
}

/// Immutable copy of a draft taken before a network call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftSnapshot {
    /// Text body
    pub text: String,
    /// Uploaded media handles in attachment order
    pub media_ids: Vec<MediaId>,
    /// Chat-side media the handles were built from
    pub media_files: Vec<ChatMedia>,
    /// Revision at snapshot time
    pub revision: u64,
}

/// The in-progress, unpublished text and media bundle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    text: String,
    media_ids: Vec<MediaId>,
    media_files: Vec<ChatMedia>,
    revision: u64,
}

impl Draft {
    /// Replace the text; the most recent message wins.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::MessageTooLong` and leaves the draft unchanged
    /// when the text exceeds the ceiling.
    pub fn accept_text(&mut self, text: &str) -> Result<(), FlowError> {
        check_length(text)?;
        self.text = text.to_string();
        self.revision += 1;
        Ok(())
    }

    /// Append a relayed media handle.
    pub fn attach(&mut self, media_id: MediaId, file: ChatMedia) {
        self.media_ids.push(media_id);
        self.media_files.push(file);
        self.revision += 1;
    }

    /// Clear text and media. Resetting an empty draft is a no-op.
    pub fn reset(&mut self) {
        if self.is_empty() {
            return;
        }
        self.text.clear();
        self.media_ids.clear();
        self.media_files.clear();
        self.revision += 1;
    }

    /// Reset only if nothing changed since `revision` was observed.
    pub fn reset_if_unchanged(&mut self, revision: u64) -> bool {
        if self.revision != revision {
            debug!(
                "Draft changed while a call was in flight ({} -> {}), keeping it",
                revision, self.revision
            );
            return false;
        }
        self.reset();
        true
    }

    /// Copy the current draft.
    #[must_use]
    pub fn snapshot(&self) -> DraftSnapshot {
        DraftSnapshot {
            text: self.text.clone(),
            media_ids: self.media_ids.clone(),
            media_files: self.media_files.clone(),
            revision: self.revision,
        }
    }

    /// Current text
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Uploaded media handles
    #[must_use]
    pub fn media_ids(&self) -> &[MediaId] {
        &self.media_ids
    }

    /// Change counter
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether text and media are both empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.media_ids.is_empty()
    }

    /// Whether a text body is present
    #[must_use]
    pub fn has_text(&self) -> bool {
        !self.text.is_empty()
    }

    /// Whether media is attached
    #[must_use]
    pub fn has_media(&self) -> bool {
        !self.media_ids.is_empty()
    }
}

/// State of one conversation
pub struct ChatSession {
    chat_id: i64,
    auth: AuthState,
    /// Current draft
    pub draft: Draft,
    publisher: Option<Arc<dyn SocialClient>>,
    account: Option<Account>,
    awaiting_approval: usize,
}

impl ChatSession {
    /// Create a session, optionally already linked to an account.
    #[must_use]
    pub fn new(chat_id: i64, seed: Option<Credentials>) -> Self {
        Self {
            chat_id,
            auth: seed.map_or(AuthState::Unauthenticated, AuthState::Authenticated),
            draft: Draft::default(),
            publisher: None,
            account: None,
            awaiting_approval: 0,
        }
    }

    /// Chat identifier
    #[must_use]
    pub const fn chat_id(&self) -> i64 {
        self.chat_id
    }

    /// Authorization state
    #[must_use]
    pub const fn auth(&self) -> &AuthState {
        &self.auth
    }

    /// Credentials, once authorized
    #[must_use]
    pub const fn credentials(&self) -> Option<&Credentials> {
        match &self.auth {
            AuthState::Authenticated(credentials) => Some(credentials),
            _ => None,
        }
    }

    /// Request token awaiting a PIN
    #[must_use]
    pub const fn pending_pair(&self) -> Option<&TokenPair> {
        match &self.auth {
            AuthState::AwaitingVerifier(pair) => Some(pair),
            _ => None,
        }
    }

    /// Start waiting for a PIN, discarding any earlier pending pair.
    pub fn await_verifier(&mut self, pair: TokenPair) {
        if self.pending_pair().is_some() {
            debug!(chat_id = self.chat_id, "Discarding previous request token");
        }
        self.auth = AuthState::AwaitingVerifier(pair);
    }

    /// Apply the result of a verifier exchange for `pair`.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::AuthExchangeFailed` with `AuthStage::Stale` when
    /// the session no longer awaits `pair`; the session is left unchanged.
    pub fn complete_authorization(
        &mut self,
        pair: &TokenPair,
        credentials: Credentials,
    ) -> Result<(), FlowError> {
        if self.pending_pair() != Some(pair) {
            return Err(FlowError::AuthExchangeFailed {
                stage: AuthStage::Stale,
                reason: "request token is no longer pending".to_string(),
            });
        }
        self.set_credentials(credentials);
        Ok(())
    }

    /// Link the session to an account.
    ///
    /// Drops the previous client and verified account.
    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.auth = AuthState::Authenticated(credentials);
        self.publisher = None;
        self.account = None;
    }

    /// Client bound to the current credentials
    #[must_use]
    pub fn publisher(&self) -> Option<Arc<dyn SocialClient>> {
        self.publisher.clone()
    }

    /// Store the client built for the current credentials.
    pub fn set_publisher(&mut self, client: Arc<dyn SocialClient>) {
        self.publisher = Some(client);
    }

    /// Account confirmed by `verify_credentials`
    #[must_use]
    pub const fn account(&self) -> Option<&Account> {
        self.account.as_ref()
    }

    /// Record the verified account.
    pub fn mark_verified(&mut self, account: Account) {
        self.account = Some(account);
    }

    /// A draft was handed to the approval chat.
    pub fn approval_requested(&mut self) {
        self.awaiting_approval += 1;
    }

    /// A previously requested approval was resolved.
    pub fn approval_resolved(&mut self) {
        self.awaiting_approval = self.awaiting_approval.saturating_sub(1);
    }

    /// Current draft phase
    #[must_use]
    pub fn phase(&self) -> DraftPhase {
        if self.draft.has_text() {
            DraftPhase::ReadyToPublish
        } else if self.draft.has_media() {
            DraftPhase::Composing
        } else if self.awaiting_approval > 0 {
            DraftPhase::AwaitingApproval
        } else {
            DraftPhase::Empty
        }
    }
}

/// Shared handle to a session
pub type SessionHandle = Arc<Mutex<ChatSession>>;

/// All sessions, keyed by chat identifier
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<i64, SessionHandle>>,
    seed: RwLock<Option<Credentials>>,
}

impl SessionStore {
    /// Create a store; new sessions start linked to `seed` when present.
    #[must_use]
    pub fn new(seed: Option<Credentials>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            seed: RwLock::new(seed),
        }
    }

    /// Get the session for `chat_id`, creating it on first use.
    pub async fn get_or_create(&self, chat_id: i64) -> SessionHandle {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(&chat_id) {
                return session.clone();
            }
        }

        let seed = self.seed.read().await.clone();
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(chat_id)
            .or_insert_with(|| {
                debug!(chat_id, seeded = seed.is_some(), "Creating chat session");
                Arc::new(Mutex::new(ChatSession::new(chat_id, seed)))
            })
            .clone()
    }

    /// Get the session for `chat_id` if it exists.
    pub async fn get(&self, chat_id: i64) -> Option<SessionHandle> {
        self.sessions.read().await.get(&chat_id).cloned()
    }

    /// Link the shared account: sessions created from now on start with
    /// `credentials`, and existing sessions that are not linked yet are
    /// upgraded. Returns the upgraded chat ids.
    pub async fn link_all(&self, credentials: &Credentials) -> Vec<i64> {
        *self.seed.write().await = Some(credentials.clone());

        let handles: Vec<SessionHandle> = self.sessions.read().await.values().cloned().collect();
        let mut upgraded = Vec::new();
        for handle in handles {
            let mut session = handle.lock().await;
            if session.credentials().is_none() {
                session.set_credentials(credentials.clone());
                upgraded.push(session.chat_id());
            }
        }
        if !upgraded.is_empty() {
            info!(chats = upgraded.len(), "Linked waiting sessions to the account");
        }
        upgraded.sort_unstable();
        upgraded
    }

    /// Number of sessions
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether no session exists yet
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MediaKind;
    use proptest::prelude::*;

    fn photo(file_id: &str) -> ChatMedia {
        ChatMedia {
            kind: MediaKind::Photo,
            file_id: file_id.to_string(),
            mime_type: None,
            file_size: None,
        }
    }

    fn pair(token: &str) -> TokenPair {
        TokenPair {
            token: token.to_string(),
            secret: format!("{token}-secret"),
        }
    }

    fn creds() -> Credentials {
        Credentials::new("at", "ats").unwrap_or_else(|| panic!("valid credentials"))
    }

    proptest! {
        #[test]
        fn prop_text_within_limit_is_stored_verbatim(text in "\\PC{0,280}") {
            let mut draft = Draft::default();
            prop_assert!(draft.accept_text(&text).is_ok());
            prop_assert_eq!(draft.text(), text.as_str());
        }

        #[test]
        fn prop_overlong_text_reports_exact_overflow(
            text in "\\PC{281,400}",
            previous in "[a-z]{1,20}",
        ) {
            let mut draft = Draft::default();
            draft.accept_text(&previous).map_err(|e| TestCaseError::fail(e.to_string()))?;

            let result = draft.accept_text(&text);
            let expected = text.chars().count() - TWEET_CHAR_LIMIT;
            let reports_exact_overflow = matches!(
                result,
                Err(FlowError::MessageTooLong { overflow }) if overflow == expected
            );
            prop_assert!(reports_exact_overflow);
            prop_assert_eq!(draft.text(), previous.as_str());
        }

        #[test]
        fn prop_credentials_are_never_partial(token in "\\PC{0,8}", secret in "\\PC{0,8}") {
            match Credentials::new(&token, &secret) {
                Some(c) => {
                    prop_assert!(!c.access_token().is_empty());
                    prop_assert!(!c.access_token_secret().is_empty());
                }
                None => prop_assert!(token.trim().is_empty() || secret.trim().is_empty()),
            }
        }
    }

    #[test]
    fn test_length_counts_scalar_values() {
        // 280 multi-byte characters fit.
        let text = "é".repeat(TWEET_CHAR_LIMIT);
        assert!(check_length(&text).is_ok());
        assert!(matches!(
            check_length(&format!("{text}ü")),
            Err(FlowError::MessageTooLong { overflow: 1 })
        ));
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut draft = Draft::default();
        draft.accept_text("hello").unwrap_or_else(|e| panic!("{e}"));
        draft.attach(MediaId("1".into()), photo("f1"));

        draft.reset();
        let once = draft.clone();
        draft.reset();
        assert_eq!(draft, once);
        assert!(draft.is_empty());
    }

    #[test]
    fn test_reset_if_unchanged_keeps_newer_draft() {
        let mut draft = Draft::default();
        draft.accept_text("first").unwrap_or_else(|e| panic!("{e}"));
        let snapshot = draft.snapshot();

        draft.accept_text("second").unwrap_or_else(|e| panic!("{e}"));
        assert!(!draft.reset_if_unchanged(snapshot.revision));
        assert_eq!(draft.text(), "second");

        let current = draft.revision();
        assert!(draft.reset_if_unchanged(current));
        assert!(draft.is_empty());
    }

    #[test]
    fn test_media_kept_in_attachment_order() {
        let mut draft = Draft::default();
        draft.attach(MediaId("a".into()), photo("f1"));
        draft.attach(MediaId("b".into()), photo("f2"));
        assert_eq!(
            draft.media_ids(),
            &[MediaId("a".into()), MediaId("b".into())]
        );
    }

    #[test]
    fn test_phase_transitions() {
        let mut session = ChatSession::new(1, Some(creds()));
        assert_eq!(session.phase(), DraftPhase::Empty);

        session.draft.attach(MediaId("a".into()), photo("f1"));
        assert_eq!(session.phase(), DraftPhase::Composing);

        session.draft.accept_text("hi").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(session.phase(), DraftPhase::ReadyToPublish);

        session.draft.reset();
        session.approval_requested();
        assert_eq!(session.phase(), DraftPhase::AwaitingApproval);

        session.approval_resolved();
        assert_eq!(session.phase(), DraftPhase::Empty);
    }

    #[test]
    fn test_stale_verifier_result_is_rejected() {
        let mut session = ChatSession::new(1, None);
        session.await_verifier(pair("old"));
        session.await_verifier(pair("new"));

        let result = session.complete_authorization(&pair("old"), creds());
        assert!(matches!(
            result,
            Err(FlowError::AuthExchangeFailed {
                stage: AuthStage::Stale,
                ..
            })
        ));
        assert_eq!(session.pending_pair(), Some(&pair("new")));

        assert!(session.complete_authorization(&pair("new"), creds()).is_ok());
        assert!(session.credentials().is_some());
        assert!(session.pending_pair().is_none());
    }

    #[tokio::test]
    async fn test_store_creates_once_and_seeds() {
        let store = SessionStore::new(None);
        let first = store.get_or_create(10).await;
        let again = store.get_or_create(10).await;
        assert!(Arc::ptr_eq(&first, &again));
        assert!(first.lock().await.credentials().is_none());

        let seeded_later = SessionStore::new(Some(creds()));
        let seeded = seeded_later.get_or_create(11).await;
        assert!(seeded.lock().await.credentials().is_some());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_link_all_upgrades_unlinked_sessions() {
        let store = SessionStore::new(None);
        let waiting = store.get_or_create(1).await;
        waiting.lock().await.await_verifier(pair("req"));
        let idle = store.get_or_create(2).await;
        let linked = store.get_or_create(3).await;
        let own = Credentials::new("own", "own-secret").unwrap_or_else(|| panic!("valid credentials"));
        linked.lock().await.set_credentials(own.clone());

        let upgraded = store.link_all(&creds()).await;

        assert_eq!(upgraded, vec![1, 2]);
        assert_eq!(waiting.lock().await.credentials(), Some(&creds()));
        assert!(waiting.lock().await.pending_pair().is_none());
        assert_eq!(idle.lock().await.credentials(), Some(&creds()));
        assert_eq!(linked.lock().await.credentials(), Some(&own));

        let fresh = store.get_or_create(4).await;
        assert_eq!(fresh.lock().await.credentials(), Some(&creds()));
    }
}
