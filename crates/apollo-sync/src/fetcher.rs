//! Point-in-time retrieval of one namespace.

use std::time::Duration;

use reqwest::Url;

use crate::config::AppConfig;
use crate::http::{endpoint_url, HttpClient, HttpError};
use crate::model::{parse_apollo_config, ApolloConfig};

/// Result of a successful fetch call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The service returned a full snapshot.
    Updated(ApolloConfig),
    /// The release key we sent is still current (HTTP 304).
    NotModified,
}

/// Issues `GET /configs/{appId}/{cluster}/{namespace}` against a single host.
///
/// The fetcher performs exactly one request per call; host selection and
/// retries belong to the orchestrator.
#[derive(Debug, Clone)]
pub struct ConfigFetcher {
    http: HttpClient,
    timeout: Duration,
}

impl ConfigFetcher {
    pub fn new(http: HttpClient, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    /// Builds the namespace URL, carrying the current release key and the
    /// optional gray-release label as query parameters.
    pub fn config_url(
        host: &str,
        app: &AppConfig,
        namespace: &str,
        release_key: Option<&str>,
    ) -> Result<Url, HttpError> {
        let mut url = endpoint_url(
            host,
            &["configs", app.app_id.as_str(), app.cluster.as_str(), namespace],
        )?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(release_key) = release_key {
                query.append_pair("releaseKey", release_key);
            }
            if let Some(label) = app.label.as_deref().filter(|label| !label.is_empty()) {
                query.append_pair("label", label);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        Ok(url)
    }

    /// Fetches `namespace` from `host`.
    ///
    /// Non-2xx statuses and network failures surface as transport-class
    /// [`HttpError`]s; an unparsable body surfaces as [`HttpError::Decode`].
    pub async fn fetch(
        &self,
        host: &str,
        app: &AppConfig,
        namespace: &str,
        release_key: Option<&str>,
    ) -> Result<FetchOutcome, HttpError> {
        let url = Self::config_url(host, app, namespace, release_key)?;
        let response = self.http.get(url, app, self.timeout).await?;
        if response.is_not_modified() {
            tracing::debug!(host, namespace, "apollo-sync namespace not modified");
            return Ok(FetchOutcome::NotModified);
        }
        let config = parse_apollo_config(&response.body)?;
        Ok(FetchOutcome::Updated(config))
    }
}
