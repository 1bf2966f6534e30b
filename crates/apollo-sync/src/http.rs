//! HTTP plumbing shared by the config fetcher, the notification poller and
//! service discovery.
//!
//! The client owns one `reqwest::Client`, applies the pluggable request
//! signer and maps responses onto a small error taxonomy: transport and
//! status failures are worth retrying against another host, decode failures
//! are not.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode, Url};
use thiserror::Error;

use crate::auth::RequestSigner;
use crate::config::AppConfig;

/// Options governing how the underlying client is constructed.
#[derive(Debug, Clone, Copy)]
pub struct HttpClientOptions {
    /// Upper bound on establishing a TCP/TLS connection.
    pub connect_timeout: Duration,
}

impl Default for HttpClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
        }
    }
}

/// Error taxonomy for calls against the config service.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Network-level failure (DNS, connect, TLS, timeout).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The service answered with a status outside 2xx/304.
    #[error("unexpected http status {0}")]
    Status(u16),
    /// The body could not be decoded as the expected schema.
    #[error("failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),
    /// The request could not be built (bad base URL, header, signer failure).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl HttpError {
    /// Whether switching to another host may help.
    pub fn is_transport(&self) -> bool {
        matches!(self, HttpError::Transport(_) | HttpError::Status(_))
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, HttpError::Decode(_))
    }
}

/// Successful (2xx or 304) response with its body fully read.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED
    }
}

/// HTTP client wrapping a reusable `reqwest::Client` and an optional signer.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    signer: Option<Arc<dyn RequestSigner>>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("signer", &self.signer)
            .finish()
    }
}

impl HttpClient {
    /// Builds a client with the provided options and no signer.
    pub fn new(options: HttpClientOptions) -> Result<Self, HttpError> {
        let mut headers = HeaderMap::new();
        let user_agent = format!("apollo-sync/{}", env!("CARGO_PKG_VERSION"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&user_agent)
                .map_err(|err| HttpError::InvalidRequest(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(HttpError::Transport)?;
        Ok(Self {
            client,
            signer: None,
        })
    }

    /// Installs the signer applied to requests whose app config carries a secret.
    pub fn with_signer(mut self, signer: Arc<dyn RequestSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Issues a GET against `url`, bounded by `timeout`.
    ///
    /// 2xx and 304 responses are returned with their body; every other status
    /// becomes [`HttpError::Status`].
    pub async fn get(
        &self,
        url: Url,
        app: &AppConfig,
        timeout: Duration,
    ) -> Result<HttpResponse, HttpError> {
        let mut headers = HeaderMap::new();
        if let (Some(signer), Some(secret)) = (&self.signer, app.secret()) {
            headers.extend(signer.sign(&url, &app.app_id, secret)?);
        }

        tracing::debug!(
            url = %url,
            headers = ?redact_headers(&headers),
            timeout_ms = timeout.as_millis() as u64,
            "apollo-sync HTTP request"
        );

        let response = self
            .client
            .get(url.clone())
            .headers(headers)
            .timeout(timeout)
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?.to_vec();

        tracing::debug!(
            url = %url,
            status = %status,
            body_len = body.len(),
            "apollo-sync HTTP response"
        );

        classify_status(status)?;
        Ok(HttpResponse { status, body })
    }
}

/// Parses `host` as a base URL and appends `segments` to its path.
pub(crate) fn endpoint_url(host: &str, segments: &[&str]) -> Result<Url, HttpError> {
    let mut url = Url::parse(host)
        .map_err(|err| HttpError::InvalidRequest(format!("invalid host {host:?}: {err}")))?;
    url.path_segments_mut()
        .map_err(|_| HttpError::InvalidRequest(format!("host {host:?} cannot be a base url")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Maps HTTP status codes onto the error taxonomy.
fn classify_status(status: StatusCode) -> Result<(), HttpError> {
    if status.is_success() || status == StatusCode::NOT_MODIFIED {
        return Ok(());
    }
    Err(HttpError::Status(status.as_u16()))
}

/// Returns a redacted view of request headers suitable for debug logging.
fn redact_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    const SENSITIVE_HEADERS: [&str; 1] = ["authorization"];

    headers
        .iter()
        .map(|(name, value)| {
            let lower = name.as_str().to_ascii_lowercase();
            let display = if SENSITIVE_HEADERS.contains(&lower.as_str()) {
                "<redacted>".to_string()
            } else {
                value
                    .to_str()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|_| "<non-utf8>".to_string())
            };
            (lower, display)
        })
        .collect()
}
