//! OAuth 1.0a request signing (HMAC-SHA1).

use super::{Consumer, TwitterError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha1 = Hmac<Sha1>;

/// RFC 3986 percent-encoding (unreserved characters pass through).
#[must_use]
pub fn percent_encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Encode parameters as `k=v&k=v` with RFC 3986 escaping, preserving order.
#[must_use]
pub fn encode_pairs(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Parse an `application/x-www-form-urlencoded` body into pairs.
#[must_use]
pub fn parse_form(body: &str) -> Vec<(String, String)> {
    body.trim()
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(k), decode_component(v))
        })
        .collect()
}

fn decode_component(value: &str) -> String {
    let spaced = value.replace('+', " ");
    urlencoding::decode(&spaced).map_or(spaced.clone(), std::borrow::Cow::into_owned)
}

/// Signature base string: `METHOD&url&sorted-params`.
#[must_use]
pub fn signature_base(method: &str, url: &str, params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();
    let joined = encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        percent_encode(url),
        percent_encode(&joined)
    )
}

/// HMAC-SHA1 signature of a base string.
///
/// # Errors
///
/// Returns `TwitterError::Signing` if the MAC cannot be initialized.
pub fn sign(
    base: &str,
    consumer_secret: &str,
    token_secret: Option<&str>,
) -> Result<String, TwitterError> {
    let key = format!(
        "{}&{}",
        percent_encode(consumer_secret),
        percent_encode(token_secret.unwrap_or(""))
    );
    let mut mac =
        HmacSha1::new_from_slice(key.as_bytes()).map_err(|e| TwitterError::Signing(e.to_string()))?;
    mac.update(base.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Token used to sign a request: an access token or a temporary request token.
#[derive(Debug, Clone, Copy)]
pub struct SigningToken<'a> {
    /// `oauth_token`
    pub token: &'a str,
    /// Secret half of the token
    pub secret: &'a str,
}

/// Builds `Authorization: OAuth ...` headers for one consumer.
pub struct Signer<'a> {
    consumer: &'a Consumer,
    token: Option<SigningToken<'a>>,
}

impl<'a> Signer<'a> {
    /// Sign as the application only (request-token leg).
    #[must_use]
    pub const fn new(consumer: &'a Consumer) -> Self {
        Self {
            consumer,
            token: None,
        }
    }

    /// Sign on behalf of a token.
    #[must_use]
    pub const fn with_token(mut self, token: SigningToken<'a>) -> Self {
        self.token = Some(token);
        self
    }

    /// Authorization header for a request.
    ///
    /// `params` are the query or form parameters that take part in the
    /// signature; `extra` are additional `oauth_*` protocol parameters
    /// (`oauth_callback`, `oauth_verifier`).
    ///
    /// # Errors
    ///
    /// Returns `TwitterError::Signing` if signing fails.
    pub fn authorization(
        &self,
        method: &str,
        url: &str,
        params: &[(String, String)],
        extra: &[(&str, &str)],
    ) -> Result<String, TwitterError> {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs())
            .to_string();
        self.authorization_at(method, url, params, extra, &nonce, &timestamp)
    }

    fn authorization_at(
        &self,
        method: &str,
        url: &str,
        params: &[(String, String)],
        extra: &[(&str, &str)],
        nonce: &str,
        timestamp: &str,
    ) -> Result<String, TwitterError> {
        let mut protocol: Vec<(String, String)> = vec![
            ("oauth_consumer_key".into(), self.consumer.key.clone()),
            ("oauth_nonce".into(), nonce.to_string()),
            ("oauth_signature_method".into(), "HMAC-SHA1".into()),
            ("oauth_timestamp".into(), timestamp.to_string()),
            ("oauth_version".into(), "1.0".into()),
        ];
        if let Some(token) = self.token {
            protocol.push(("oauth_token".into(), token.token.to_string()));
        }
        protocol.extend(extra.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())));

        let mut all = protocol.clone();
        all.extend_from_slice(params);
        let base = signature_base(method, url, &all);
        let signature = sign(
            &base,
            &self.consumer.secret,
            self.token.map(|t| t.secret),
        )?;
        protocol.push(("oauth_signature".into(), signature));
        protocol.sort();

        let header = protocol
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("OAuth {header}"))
    }
}
