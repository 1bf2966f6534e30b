//! Long-poll client for `/notifications/v2`.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Url;

use crate::config::AppConfig;
use crate::http::{endpoint_url, HttpClient, HttpError};
use crate::model::{parse_notifications, Notification};

/// Issues one long-poll request per call. The service holds the request open
/// until a namespace changes or its own hold time elapses; `timeout` is the
/// client-side ceiling and must exceed that hold.
#[derive(Debug, Clone)]
pub struct NotificationPoller {
    http: HttpClient,
    timeout: Duration,
}

impl NotificationPoller {
    pub fn new(http: HttpClient, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    /// Builds the long-poll URL carrying every known notification ID.
    pub fn notifications_url(
        host: &str,
        app: &AppConfig,
        known: &BTreeMap<String, i64>,
    ) -> Result<Url, HttpError> {
        let notifications: Vec<Notification> = known
            .iter()
            .map(|(namespace, id)| Notification::new(namespace.clone(), *id))
            .collect();
        let encoded = serde_json::to_string(&notifications)?;
        let mut url = endpoint_url(host, &["notifications", "v2"])?;
        url.query_pairs_mut()
            .append_pair("appId", &app.app_id)
            .append_pair("cluster", &app.cluster)
            .append_pair("notifications", &encoded);
        Ok(url)
    }

    /// Polls `host` with the `known` IDs and returns the notifications the
    /// service reported. A 304 or an empty body yields an empty list.
    ///
    /// The result is returned as received; filtering of stale IDs is the
    /// caller's job.
    pub async fn poll(
        &self,
        host: &str,
        app: &AppConfig,
        known: &BTreeMap<String, i64>,
    ) -> Result<Vec<Notification>, HttpError> {
        let url = Self::notifications_url(host, app, known)?;
        let response = self.http.get(url, app, self.timeout).await?;
        if response.is_not_modified() {
            return Ok(Vec::new());
        }
        Ok(parse_notifications(&response.body)?)
    }
}
