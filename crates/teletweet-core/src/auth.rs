//! Authorization flow: request token, user PIN, access token, verification.

use crate::dispatcher::Relay;
use crate::draft::{parse_command, Command};
use crate::error::{AuthStage, FlowError};
use crate::messages;
use crate::session::{AuthState, SessionHandle};
use crate::transport::InboundEvent;
use crate::twitter::TokenPair;
use tracing::{error, info};

impl Relay {
    /// Drive the handshake for sessions that are not linked yet.
    ///
    /// Returns `true` when the session is authenticated and the event should
    /// continue to the draft flow.
    pub(crate) async fn ensure_authorized(
        &self,
        session: &SessionHandle,
        event: &InboundEvent,
    ) -> bool {
        let chat_id = event.chat.id;
        let auth = session.lock().await.auth().clone();
        let text = event.text.as_deref().map(str::trim).unwrap_or_default();
        let command = parse_command(text);

        match auth {
            AuthState::Authenticated(_) => true,
            AuthState::Unauthenticated => {
                if command != Some(Command::Authorize) {
                    self.say(chat_id, messages::AUTH_REQUIRED).await;
                }
                self.begin_authorization(session, chat_id).await;
                false
            }
            AuthState::AwaitingVerifier(pair) => {
                match command {
                    Some(Command::Authorize) => self.begin_authorization(session, chat_id).await,
                    None if !text.is_empty() => {
                        self.submit_verifier(session, chat_id, &pair, text).await;
                    }
                    _ => {
                        self.say(chat_id, messages::AUTH_AWAITING_PIN).await;
                    }
                }
                false
            }
        }
    }

    /// Request a token pair, send the authorization URL and wait for the PIN.
    pub(crate) async fn begin_authorization(&self, session: &SessionHandle, chat_id: i64) {
        let pair = match self.platform.request_token().await {
            Ok(pair) => pair,
            Err(e) => {
                let err = FlowError::AuthExchangeFailed {
                    stage: AuthStage::RequestToken,
                    reason: e.to_string(),
                };
                self.report(chat_id, &err).await;
                return;
            }
        };

        let url = self.platform.authorize_url(&pair);
        {
            let mut session = session.lock().await;
            if session.credentials().is_some() {
                info!(chat_id, "Session was linked meanwhile, dropping request token");
                return;
            }
            session.await_verifier(pair);
        }
        info!(chat_id, "Authorization started");
        self.say(chat_id, &messages::authorization_url(&url)).await;
    }

    /// Exchange the PIN for credentials bound to `pair`.
    ///
    /// Failure leaves the session awaiting the same pair so the user can
    /// type the PIN again; no new URL is issued.
    pub(crate) async fn submit_verifier(
        &self,
        session: &SessionHandle,
        chat_id: i64,
        pair: &TokenPair,
        verifier: &str,
    ) {
        let credentials = match self.platform.access_token(pair, verifier).await {
            Ok(credentials) => credentials,
            Err(e) => {
                let err = FlowError::AuthExchangeFailed {
                    stage: AuthStage::AccessToken,
                    reason: e.to_string(),
                };
                self.report(chat_id, &err).await;
                return;
            }
        };

        let applied = session
            .lock()
            .await
            .complete_authorization(pair, credentials.clone());
        if let Err(err) = applied {
            self.report(chat_id, &err).await;
            return;
        }

        info!(chat_id, "Authorization completed");
        if let Err(e) = self.settings.save_credentials(&credentials).await {
            error!(chat_id, "Failed to persist credentials: {e}");
        }
        self.say(chat_id, messages::AUTH_SUCCESS).await;
        for other in self.sessions.link_all(&credentials).await {
            self.say(other, messages::ACCOUNT_LINKED).await;
        }

        self.ensure_publisher(session, chat_id).await;
    }

    /// Build and verify the session's client, then attach the stream.
    ///
    /// Returns `true` once the account is verified.
    pub(crate) async fn ensure_publisher(&self, session: &SessionHandle, chat_id: i64) -> bool {
        let (client, credentials) = {
            let mut session = session.lock().await;
            if session.account().is_some() {
                return true;
            }
            let Some(credentials) = session.credentials().cloned() else {
                return false;
            };
            let client = session
                .publisher()
                .unwrap_or_else(|| self.platform.connect(&credentials));
            session.set_publisher(client.clone());
            (client, credentials)
        };

        self.say(chat_id, messages::VERIFYING).await;
        let account = match client.verify_credentials().await {
            Ok(account) => account,
            Err(e) => {
                let err = FlowError::CredentialVerificationFailed(e.to_string());
                self.report(chat_id, &err).await;
                return false;
            }
        };

        {
            let mut session = session.lock().await;
            if session.credentials() != Some(&credentials) {
                info!(chat_id, "Credentials replaced during verification");
                return false;
            }
            session.mark_verified(account.clone());
        }
        info!(chat_id, screen_name = %account.screen_name, "Credentials verified");

        if let Err(e) = self.settings.save_user(&account.screen_name).await {
            error!(chat_id, "Failed to persist screen name: {e}");
        }

        let track = self.settings.track_terms(&account.screen_name).await;
        self.streams
            .subscribe(chat_id, &credentials, &account, client.as_ref(), &track)
            .await;
        true
    }
}
