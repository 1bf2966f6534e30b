//! Request signing.
//!
//! Apollo protects config access with a per-app secret: each request carries
//! a millisecond `Timestamp` header and an `Authorization` header holding an
//! HMAC-SHA1 over the timestamp and the request path. Other schemes can be
//! plugged in through [`RequestSigner`].

use std::time::{SystemTime, UNIX_EPOCH};

use data_encoding::BASE64;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Url;
use sha1::Sha1;

use crate::http::HttpError;

type HmacSha1 = Hmac<Sha1>;

const TIMESTAMP_HEADER: &str = "timestamp";

/// Produces authentication headers for an outgoing request.
pub trait RequestSigner: Send + Sync + std::fmt::Debug {
    fn sign(&self, url: &Url, app_id: &str, secret: &str) -> Result<HeaderMap, HttpError>;
}

/// The signature scheme understood by the Apollo config service.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApolloSigner;

impl ApolloSigner {
    /// Computes `base64(HMAC-SHA1(secret, "{timestamp}\n{path_with_query}"))`.
    pub fn signature(
        timestamp_millis: u64,
        path_with_query: &str,
        secret: &str,
    ) -> Result<String, HttpError> {
        let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
            .map_err(|err| HttpError::InvalidRequest(err.to_string()))?;
        mac.update(format!("{timestamp_millis}\n{path_with_query}").as_bytes());
        Ok(BASE64.encode(&mac.finalize().into_bytes()))
    }

    /// Builds the header pair for a request issued at `timestamp_millis`.
    pub fn headers_at(
        &self,
        timestamp_millis: u64,
        url: &Url,
        app_id: &str,
        secret: &str,
    ) -> Result<HeaderMap, HttpError> {
        let signature = Self::signature(timestamp_millis, &path_with_query(url), secret)?;
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Apollo {app_id}:{signature}"))
                .map_err(|err| HttpError::InvalidRequest(err.to_string()))?,
        );
        headers.insert(TIMESTAMP_HEADER, HeaderValue::from(timestamp_millis));
        Ok(headers)
    }
}

impl RequestSigner for ApolloSigner {
    fn sign(&self, url: &Url, app_id: &str, secret: &str) -> Result<HeaderMap, HttpError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|err| HttpError::InvalidRequest(err.to_string()))?;
        self.headers_at(now.as_millis() as u64, url, app_id, secret)
    }
}

fn path_with_query(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}
