//! In-process Apollo config service used by the end-to-end tests.
//!
//! Serves `/configs/{appId}/{cluster}/{namespace}`, a long-polling
//! `/notifications/v2` and the meta-server `/services/config` endpoint from
//! scripted state, and logs every request it receives.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

pub const APP_ID: &str = "100004458";

/// Published state of one namespace.
#[derive(Debug, Clone)]
struct NamespaceEntry {
    configurations: HashMap<String, String>,
    release: u64,
    notification_id: i64,
}

impl NamespaceEntry {
    fn release_key(&self) -> String {
        format!("20170430092936-release-{}", self.release)
    }
}

/// Request observed by the backend.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct BackendState {
    namespaces: HashMap<String, NamespaceEntry>,
    /// Homepage URLs returned by `/services/config`.
    config_services: Vec<String>,
    request_log: Vec<RecordedRequest>,
    /// How long a long poll is held before answering 304.
    hold: Duration,
}

type SharedState = Arc<Mutex<BackendState>>;

/// Backend harness implementing the config-service HTTP API.
pub struct ApolloBackend {
    base_url: String,
    state: SharedState,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ApolloBackend {
    /// Spawns the backend on an ephemeral port.
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(BackendState {
            hold: Duration::from_millis(300),
            ..BackendState::default()
        }));
        let router = Router::new()
            .route("/configs/{app_id}/{cluster}/{namespace}", get(handle_config))
            .route("/notifications/v2", get(handle_notifications))
            .route("/services/config", get(handle_services))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("backend bind");
        let addr = listener.local_addr().expect("backend address");
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("server run");
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Publishes a new release of `namespace`, bumping its notification ID.
    pub async fn publish(&self, namespace: &str, pairs: &[(&str, &str)]) {
        let mut guard = self.state.lock().await;
        let entry = guard
            .namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| NamespaceEntry {
                configurations: HashMap::new(),
                release: 0,
                notification_id: 0,
            });
        entry.configurations = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        entry.release += 1;
        entry.notification_id += 1;
    }

    /// Makes `/services/config` advertise `urls`.
    pub async fn advertise(&self, urls: Vec<String>) {
        self.state.lock().await.config_services = urls;
    }

    pub async fn take_request_log(&self) -> Vec<RecordedRequest> {
        std::mem::take(&mut self.state.lock().await.request_log)
    }
}

impl Drop for ApolloBackend {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

fn record(
    guard: &mut BackendState,
    path: String,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
) {
    let headers = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();
    guard.request_log.push(RecordedRequest {
        path,
        query: query.clone(),
        headers,
    });
}

async fn handle_config(
    State(state): State<SharedState>,
    Path((app_id, cluster, namespace)): Path<(String, String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let mut guard = state.lock().await;
    record(
        &mut guard,
        format!("/configs/{app_id}/{cluster}/{namespace}"),
        &query,
        &headers,
    );
    let Some(entry) = guard.namespaces.get(&namespace).cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if query.get("releaseKey") == Some(&entry.release_key()) {
        return StatusCode::NOT_MODIFIED.into_response();
    }
    Json(json!({
        "appId": app_id,
        "cluster": cluster,
        "namespaceName": namespace,
        "configurations": entry.configurations,
        "releaseKey": entry.release_key(),
    }))
    .into_response()
}

/// Answers as soon as a namespace's published ID passes the client's, or
/// with 304 once the hold time elapses.
async fn handle_notifications(
    State(state): State<SharedState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let known: Vec<Value> = query
        .get("notifications")
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();
    let hold = {
        let mut guard = state.lock().await;
        record(&mut guard, "/notifications/v2".to_string(), &query, &headers);
        guard.hold
    };

    let deadline = Instant::now() + hold;
    loop {
        {
            let guard = state.lock().await;
            let changed: Vec<Value> = known
                .iter()
                .filter_map(|entry| {
                    let namespace = entry.get("namespaceName")?.as_str()?;
                    let client_id = entry.get("notificationId")?.as_i64()?;
                    let published = guard.namespaces.get(namespace)?;
                    (published.notification_id > client_id).then(|| {
                        json!({
                            "namespaceName": namespace,
                            "notificationId": published.notification_id,
                        })
                    })
                })
                .collect();
            if !changed.is_empty() {
                return Json(Value::Array(changed)).into_response();
            }
        }
        if Instant::now() >= deadline {
            return StatusCode::NOT_MODIFIED.into_response();
        }
        sleep(Duration::from_millis(20)).await;
    }
}

async fn handle_services(
    State(state): State<SharedState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let mut guard = state.lock().await;
    record(&mut guard, "/services/config".to_string(), &query, &headers);
    let services: Vec<Value> = guard
        .config_services
        .iter()
        .enumerate()
        .map(|(index, url)| {
            json!({
                "appName": "APOLLO-CONFIGSERVICE",
                "instanceId": format!("config-service-{index}"),
                "homepageUrl": url,
            })
        })
        .collect();
    Json(Value::Array(services)).into_response()
}

/// Re-evaluates `check` until it holds or `timeout` elapses.
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(20)).await;
    }
}
