//! HTTP implementation of the Twitter collaborator traits.

use super::oauth::{encode_pairs, parse_form, Signer, SigningToken};
use super::{
    stream, Account, Consumer, Credentials, EventStream, MediaId, PostedStatus, ProcessingInfo,
    SocialClient, SocialPlatform, StatusUpdate, TokenPair, TwitterError, UploadInit,
};
use crate::config::{
    TWITTER_API_BASE, TWITTER_HTTP_TIMEOUT_SECS, TWITTER_STREAM_BASE,
    TWITTER_STREAM_CONNECT_TIMEOUT_SECS, TWITTER_UPLOAD_BASE,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Base URLs of the three Twitter hosts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// REST and OAuth host
    pub api: String,
    /// Media upload host
    pub upload: String,
    /// Streaming host
    pub stream: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api: TWITTER_API_BASE.to_string(),
            upload: TWITTER_UPLOAD_BASE.to_string(),
            stream: TWITTER_STREAM_BASE.to_string(),
        }
    }
}

impl Endpoints {
    /// Route every host to one base URL.
    #[must_use]
    pub fn single(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            api: base.clone(),
            upload: base.clone(),
            stream: base,
        }
    }
}

#[derive(Clone)]
struct Transport {
    http: HttpClient,
    stream_http: HttpClient,
    consumer: Arc<Consumer>,
    endpoints: Arc<Endpoints>,
}

impl Transport {
    fn new(consumer: Consumer, endpoints: Endpoints) -> Result<Self, TwitterError> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(TWITTER_HTTP_TIMEOUT_SECS))
            .build()?;
        // No total timeout: the stream response stays open indefinitely.
        let stream_http = HttpClient::builder()
            .connect_timeout(Duration::from_secs(TWITTER_STREAM_CONNECT_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            stream_http,
            consumer: Arc::new(consumer),
            endpoints: Arc::new(endpoints),
        })
    }

    /// Signed form POST; returns the raw response body.
    async fn post_form(
        &self,
        signer: &Signer<'_>,
        url: &str,
        params: &[(String, String)],
        extra: &[(&str, &str)],
    ) -> Result<String, TwitterError> {
        let authorization = signer.authorization("POST", url, params, extra)?;
        let response = self
            .http
            .post(url)
            .header("Authorization", authorization)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(encode_pairs(params))
            .send()
            .await?;
        read_body(response).await
    }

    /// Signed GET with query parameters; returns the raw response body.
    async fn get(
        &self,
        signer: &Signer<'_>,
        url: &str,
        params: &[(String, String)],
    ) -> Result<String, TwitterError> {
        let authorization = signer.authorization("GET", url, params, &[])?;
        let target = if params.is_empty() {
            url.to_string()
        } else {
            format!("{url}?{}", encode_pairs(params))
        };
        let response = self
            .http
            .get(target)
            .header("Authorization", authorization)
            .send()
            .await?;
        read_body(response).await
    }
}

#[derive(Deserialize)]
struct ApiErrors {
    errors: Vec<ApiErrorEntry>,
}

#[derive(Deserialize)]
struct ApiErrorEntry {
    message: String,
}

async fn read_body(response: reqwest::Response) -> Result<String, TwitterError> {
    let status = response.status();
    let body = response.text().await?;
    if status.is_success() {
        return Ok(body);
    }

    let message = serde_json::from_str::<ApiErrors>(&body)
        .ok()
        .and_then(|e| e.errors.into_iter().next())
        .map_or_else(
            || crate::utils::truncate_str(body.trim(), 300),
            |e| e.message,
        );
    Err(TwitterError::Api {
        status: status.as_u16(),
        message,
    })
}

fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T, TwitterError> {
    serde_json::from_str(body).map_err(|e| TwitterError::Response(e.to_string()))
}

fn parse_token_pair(body: &str) -> Result<TokenPair, TwitterError> {
    let fields = parse_form(body);
    let field = |name: &str| {
        fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| TwitterError::Response(format!("missing {name} in token response")))
    };
    Ok(TokenPair {
        token: field("oauth_token")?,
        secret: field("oauth_token_secret")?,
    })
}

fn pairs(items: &[(&str, String)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

/// Application-level Twitter API (OAuth handshake)
#[derive(Clone)]
pub struct TwitterApi {
    transport: Transport,
}

impl TwitterApi {
    /// Create an API handle for the given consumer against the public hosts.
    ///
    /// # Errors
    ///
    /// Returns `TwitterError::Network` if the HTTP client cannot be built.
    pub fn new(consumer: Consumer) -> Result<Self, TwitterError> {
        Self::with_endpoints(consumer, Endpoints::default())
    }

    /// Create an API handle against custom hosts.
    ///
    /// # Errors
    ///
    /// Returns `TwitterError::Network` if the HTTP client cannot be built.
    pub fn with_endpoints(consumer: Consumer, endpoints: Endpoints) -> Result<Self, TwitterError> {
        Ok(Self {
            transport: Transport::new(consumer, endpoints)?,
        })
    }
}

#[async_trait]
impl SocialPlatform for TwitterApi {
    async fn request_token(&self) -> Result<TokenPair, TwitterError> {
        let url = format!("{}/oauth/request_token", self.transport.endpoints.api);
        let signer = Signer::new(&self.transport.consumer);
        let body = self
            .transport
            .post_form(&signer, &url, &[], &[("oauth_callback", "oob")])
            .await?;
        debug!("Obtained request token");
        parse_token_pair(&body)
    }

    fn authorize_url(&self, request: &TokenPair) -> String {
        format!(
            "{}/oauth/authorize?oauth_token={}",
            self.transport.endpoints.api,
            super::oauth::percent_encode(&request.token)
        )
    }

    async fn access_token(
        &self,
        request: &TokenPair,
        verifier: &str,
    ) -> Result<Credentials, TwitterError> {
        let url = format!("{}/oauth/access_token", self.transport.endpoints.api);
        let signer = Signer::new(&self.transport.consumer).with_token(SigningToken {
            token: &request.token,
            secret: &request.secret,
        });
        let body = self
            .transport
            .post_form(&signer, &url, &[], &[("oauth_verifier", verifier)])
            .await?;
        let pair = parse_token_pair(&body)?;
        debug!("Exchanged verifier for access token");
        Credentials::new(&pair.token, &pair.secret)
            .ok_or_else(|| TwitterError::Response("empty access token".to_string()))
    }

    fn connect(&self, credentials: &Credentials) -> Arc<dyn SocialClient> {
        Arc::new(TwitterClient {
            transport: self.transport.clone(),
            credentials: credentials.clone(),
        })
    }
}

/// Twitter client bound to one linked account
#[derive(Clone)]
pub struct TwitterClient {
    transport: Transport,
    credentials: Credentials,
}

#[derive(Deserialize)]
struct StatusResponse {
    id_str: String,
    user: Account,
}

#[derive(Deserialize)]
struct UploadResponse {
    media_id_string: String,
    #[serde(default)]
    processing_info: Option<ProcessingInfo>,
}

#[derive(Deserialize)]
struct StatusCheckResponse {
    processing_info: ProcessingInfo,
}

impl TwitterClient {
    fn signer(&self) -> Signer<'_> {
        Signer::new(&self.transport.consumer).with_token(SigningToken {
            token: self.credentials.access_token(),
            secret: self.credentials.access_token_secret(),
        })
    }

    fn upload_url(&self) -> String {
        format!("{}/1.1/media/upload.json", self.transport.endpoints.upload)
    }
}

#[async_trait]
impl SocialClient for TwitterClient {
    async fn verify_credentials(&self) -> Result<Account, TwitterError> {
        let url = format!(
            "{}/1.1/account/verify_credentials.json",
            self.transport.endpoints.api
        );
        let body = self
            .transport
            .get(&self.signer(), &url, &pairs(&[("skip_status", "true".into())]))
            .await?;
        parse_json(&body)
    }

    async fn post_status(&self, update: &StatusUpdate) -> Result<PostedStatus, TwitterError> {
        let url = format!("{}/1.1/statuses/update.json", self.transport.endpoints.api);
        let mut params = pairs(&[("status", update.status.clone())]);
        if !update.media_ids.is_empty() {
            let ids = update
                .media_ids
                .iter()
                .map(|id| id.0.as_str())
                .collect::<Vec<_>>()
                .join(",");
            params.push(("media_ids".to_string(), ids));
        }

        let body = self
            .transport
            .post_form(&self.signer(), &url, &params, &[])
            .await?;
        let status: StatusResponse = parse_json(&body)?;
        Ok(PostedStatus {
            id_str: status.id_str,
            screen_name: status.user.screen_name,
        })
    }

    async fn upload_init(&self, init: &UploadInit) -> Result<MediaId, TwitterError> {
        let params = pairs(&[
            ("command", "INIT".into()),
            ("total_bytes", init.total_bytes.to_string()),
            ("media_type", init.media_type.clone()),
            ("media_category", init.media_category.clone()),
        ]);
        let body = self
            .transport
            .post_form(&self.signer(), &self.upload_url(), &params, &[])
            .await?;
        let response: UploadResponse = parse_json(&body)?;
        Ok(MediaId(response.media_id_string))
    }

    async fn upload_append(
        &self,
        media_id: &MediaId,
        segment_index: u32,
        chunk: &[u8],
    ) -> Result<(), TwitterError> {
        let params = pairs(&[
            ("command", "APPEND".into()),
            ("media_id", media_id.0.clone()),
            ("segment_index", segment_index.to_string()),
            ("media_data", STANDARD.encode(chunk)),
        ]);
        self.transport
            .post_form(&self.signer(), &self.upload_url(), &params, &[])
            .await?;
        Ok(())
    }

    async fn upload_finalize(
        &self,
        media_id: &MediaId,
    ) -> Result<Option<ProcessingInfo>, TwitterError> {
        let params = pairs(&[("command", "FINALIZE".into()), ("media_id", media_id.0.clone())]);
        let body = self
            .transport
            .post_form(&self.signer(), &self.upload_url(), &params, &[])
            .await?;
        let response: UploadResponse = parse_json(&body)?;
        Ok(response.processing_info)
    }

    async fn upload_status(&self, media_id: &MediaId) -> Result<ProcessingInfo, TwitterError> {
        let params = pairs(&[("command", "STATUS".into()), ("media_id", media_id.0.clone())]);
        let body = self
            .transport
            .get(&self.signer(), &self.upload_url(), &params)
            .await?;
        let response: StatusCheckResponse = parse_json(&body)?;
        Ok(response.processing_info)
    }

    async fn create_metadata(
        &self,
        media_id: &MediaId,
        alt_text: &str,
    ) -> Result<(), TwitterError> {
        let url = format!(
            "{}/1.1/media/metadata/create.json",
            self.transport.endpoints.upload
        );
        // JSON bodies take no part in the OAuth signature.
        let authorization = self.signer().authorization("POST", &url, &[], &[])?;
        let response = self
            .transport
            .http
            .post(&url)
            .header("Authorization", authorization)
            .json(&json!({
                "media_id": media_id.0,
                "alt_text": { "text": alt_text },
            }))
            .send()
            .await?;
        read_body(response).await?;
        Ok(())
    }

    fn stream_filter(&self, track: &[String]) -> EventStream {
        let url = format!("{}/1.1/statuses/filter.json", self.transport.endpoints.stream);
        let params = pairs(&[("track", track.join(","))]);
        match self.signer().authorization("POST", &url, &params, &[]) {
            Ok(authorization) => stream::open(
                self.transport
                    .stream_http
                    .post(&url)
                    .header("Authorization", authorization)
                    .header("Content-Type", "application/x-www-form-urlencoded")
                    .body(encode_pairs(&params)),
            ),
            Err(e) => stream::failed(e.to_string()),
        }
    }
}
