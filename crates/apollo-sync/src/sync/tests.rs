//! Service-level tests driving bootstrap, polling and failover against mock
//! config services.

#![cfg(test)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use httptest::matchers::{all_of, contains, not, request, url_decoded};
use httptest::{cycle, responders::status_code, Expectation, Server};
use tempfile::tempdir;
use tokio::net::TcpListener;
use tracing_test::traced_test;

use super::test_support::*;
use super::*;
use crate::cache::{CacheError, LocalFileCache};
use crate::config::AppConfig;
use crate::model::{Notification, DEFAULT_NOTIFICATION_ID};
use crate::telemetry::{CountingTelemetry, TelemetrySnapshot};

#[tokio::test]
async fn bootstrap_then_poll_mirrors_changed_namespace() {
    let server = Server::run();
    let body = config_body("application", &[("key1", "value1"), ("key2", "value2")]);
    server.expect(
        Expectation::matching(request::method_path("GET", config_path("application")))
            .times(2)
            .respond_with(status_code(200).body(body)),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/notifications/v2"),
            request::query(url_decoded(contains(("appId", APP_ID)))),
            request::query(url_decoded(contains(("cluster", "default")))),
        ])
        .respond_with(status_code(200).body(notifications_body(&[("application", 3)]))),
    );

    let backup = tempdir().expect("tempdir");
    let telemetry = Arc::new(CountingTelemetry::default());
    let service = build_service_with_telemetry(
        app_config(&[host(&server)], "application", backup.path()),
        telemetry.clone(),
    );

    let report = service.bootstrap().await;
    assert_eq!(report.source("application"), Some(NamespaceSource::Remote));
    assert!(report.all_remote());
    assert_eq!(
        service.notification_id("application").await,
        Some(DEFAULT_NOTIFICATION_ID)
    );

    let outcome = service.poll_once().await.expect("poll cycle");
    assert_eq!(outcome.changed, vec![Notification::new("application", 3)]);
    assert_eq!(outcome.refreshed, vec!["application".to_string()]);
    assert!(outcome.failed.is_empty());

    let store = service.store();
    assert_eq!(store.value("application", "key1").as_deref(), Some("value1"));
    assert_eq!(store.value("application", "key2").as_deref(), Some("value2"));
    assert_eq!(service.notification_id("application").await, Some(3));

    // The cache mirrors exactly what the store holds.
    let cached = service.cache().load("application").expect("cached snapshot");
    assert_eq!(Some(Arc::new(cached)), store.get("application"));

    let status = service.status_handle();
    assert!(status.bootstrapped());
    assert_eq!(status.namespaces().await, vec!["application".to_string()]);
    assert!(status.last_error().await.is_none());

    assert_eq!(
        telemetry.counters().snapshot(),
        TelemetrySnapshot {
            fetch_success: 2,
            poll_success: 1,
            notifications: 1,
            ..TelemetrySnapshot::default()
        }
    );
}

#[tokio::test]
async fn bootstrap_loads_every_configured_namespace() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", config_path("application")))
            .respond_with(status_code(200).body(config_body("application", &[("key1", "a")]))),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", config_path("abc1")))
            .respond_with(status_code(200).body(config_body("abc1", &[("key1", "b")]))),
    );

    let backup = tempdir().expect("tempdir");
    let service = build_service(app_config(
        &[host(&server)],
        "application,abc1",
        backup.path(),
    ));
    let report = service.bootstrap().await;

    assert_eq!(report.loaded(), 2);
    assert_eq!(service.store().len(), 2);
    assert_eq!(service.store().value("abc1", "key1").as_deref(), Some("b"));
    assert!(backup.path().join("application.json").is_file());
    assert!(backup.path().join("abc1.json").is_file());
}

#[tokio::test]
async fn unreachable_namespace_starts_empty_without_failing_bootstrap() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", config_path("application")))
            .times(3)
            .respond_with(status_code(404)),
    );

    let backup = tempdir().expect("tempdir");
    let service = build_service(app_config(&[host(&server)], "application", backup.path()));
    let report = service.bootstrap().await;

    assert_eq!(report.source("application"), Some(NamespaceSource::Empty));
    assert_eq!(report.loaded(), 0);
    assert!(service.store().is_empty());
    assert!(matches!(
        service.cache().load("application"),
        Err(CacheError::NotFound(_))
    ));

    let status = service.status_handle();
    assert!(status.bootstrapped());
    let last_error = status.last_error().await.expect("error recorded");
    assert!(
        last_error.starts_with("retry budget exhausted"),
        "unexpected error: {last_error}"
    );
}

#[tokio::test]
#[traced_test]
async fn failing_poll_exhausts_retry_budget() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/notifications/v2"))
            .times(3)
            .respond_with(status_code(500)),
    );

    let backup = tempdir().expect("tempdir");
    let service = build_service(app_config(&[host(&server)], "application", backup.path()));

    let err = service.poll_once().await.expect_err("budget exhausted");
    assert!(matches!(
        err,
        SyncError::RetryBudgetExhausted { attempts: 3, .. }
    ));
    assert!(err.to_string().starts_with("retry budget exhausted"));
    assert_eq!(
        service.notification_id("application").await,
        Some(DEFAULT_NOTIFICATION_ID)
    );
    assert!(service.store().is_empty());
    assert!(logs_contain("retry budget exhausted"));
}

#[tokio::test]
async fn stale_notifications_do_not_refetch() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", config_path("application")))
            .times(2)
            .respond_with(status_code(200).body(config_body("application", &[("key1", "v")]))),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", "/notifications/v2"))
            .times(2)
            .respond_with(status_code(200).body(notifications_body(&[("application", 3)]))),
    );

    let backup = tempdir().expect("tempdir");
    let service = build_service(app_config(&[host(&server)], "application", backup.path()));
    service.bootstrap().await;

    let first = service.poll_once().await.expect("first poll");
    assert_eq!(first.refreshed, vec!["application".to_string()]);

    let second = service.poll_once().await.expect("second poll");
    assert!(second.is_unchanged());
    assert_eq!(service.notification_id("application").await, Some(3));
}

#[tokio::test]
async fn failed_refresh_keeps_notification_id() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", config_path("application")))
            .times(4)
            .respond_with(cycle![
                status_code(200).body(config_body("application", &[("key1", "old")])),
                status_code(503),
                status_code(503),
                status_code(503),
            ]),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", "/notifications/v2"))
            .respond_with(status_code(200).body(notifications_body(&[("application", 5)]))),
    );

    let backup = tempdir().expect("tempdir");
    let service = build_service(app_config(&[host(&server)], "application", backup.path()));
    service.bootstrap().await;

    let outcome = service.poll_once().await.expect("poll itself succeeds");
    assert_eq!(outcome.failed, vec!["application".to_string()]);
    assert!(outcome.refreshed.is_empty());
    assert_eq!(
        service.notification_id("application").await,
        Some(DEFAULT_NOTIFICATION_ID)
    );
    assert_eq!(
        service.store().value("application", "key1").as_deref(),
        Some("old")
    );
    assert!(service.status_handle().last_error().await.is_some());
}

#[tokio::test]
async fn not_modified_refresh_advances_notification_id() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", config_path("application")),
            request::query(not(url_decoded(contains(("releaseKey", RELEASE_KEY))))),
        ])
        .respond_with(status_code(200).body(config_body("application", &[("key1", "v")]))),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", config_path("application")),
            request::query(url_decoded(contains(("releaseKey", RELEASE_KEY)))),
        ])
        .respond_with(status_code(304)),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", "/notifications/v2"))
            .respond_with(status_code(200).body(notifications_body(&[("application", 2)]))),
    );

    let backup = tempdir().expect("tempdir");
    let service = build_service(app_config(&[host(&server)], "application", backup.path()));
    service.bootstrap().await;

    let outcome = service.poll_once().await.expect("poll");
    assert_eq!(outcome.refreshed, vec!["application".to_string()]);
    assert_eq!(service.notification_id("application").await, Some(2));
    assert_eq!(
        service.store().value("application", "key1").as_deref(),
        Some("v")
    );
}

#[tokio::test]
async fn bootstrap_falls_back_to_local_cache() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", config_path("application")))
            .times(3)
            .respond_with(status_code(500)),
    );

    let backup = tempdir().expect("tempdir");
    let seeded = crate::model::parse_apollo_config(
        config_body("application", &[("key1", "cached")]).as_bytes(),
    )
    .expect("seed snapshot");
    LocalFileCache::json(backup.path())
        .write("application", &seeded)
        .expect("seed cache");

    let telemetry = Arc::new(CountingTelemetry::default());
    let service = build_service_with_telemetry(
        app_config(&[host(&server)], "application", backup.path()),
        telemetry.clone(),
    );
    let report = service.bootstrap().await;

    assert_eq!(report.source("application"), Some(NamespaceSource::Cache));
    assert_eq!(
        service.store().value("application", "key1").as_deref(),
        Some("cached")
    );
    let snapshot = telemetry.counters().snapshot();
    assert_eq!(snapshot.cache_fallback, 1);
    assert_eq!(snapshot.fetch_error, 1);
    assert_eq!(snapshot.host_unusable, 3);
}

#[tokio::test]
async fn decode_errors_are_not_retried() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", config_path("application")))
            .times(1)
            .respond_with(status_code(200).body("jaskldfjaskl")),
    );

    let backup = tempdir().expect("tempdir");
    let service = build_service(app_config(&[host(&server)], "application", backup.path()));
    let report = service.bootstrap().await;

    let entry = &report.namespaces[0];
    assert_eq!(entry.source, NamespaceSource::Empty);
    let error = entry.error.as_deref().expect("error recorded");
    assert!(error.contains("failed to decode"), "unexpected error: {error}");
}

#[tokio::test]
async fn failing_host_is_backed_off_and_next_host_serves() {
    let broken = Server::run();
    broken.expect(
        Expectation::matching(request::method_path("GET", config_path("application")))
            .respond_with(status_code(502)),
    );
    let healthy = Server::run();
    healthy.expect(
        Expectation::matching(request::method_path("GET", config_path("application")))
            .respond_with(status_code(200).body(config_body("application", &[("key1", "v")]))),
    );

    let backup = tempdir().expect("tempdir");
    let mut config = fast_config();
    config.retry.host_backoff = Duration::from_secs(30);
    let service = SyncService::builder(app_config(
        &[host(&broken), host(&healthy)],
        "application",
        backup.path(),
    ))
    .with_config(config)
    .build()
    .expect("service builds");

    let report = service.bootstrap().await;
    assert_eq!(report.source("application"), Some(NamespaceSource::Remote));

    let states = service.registry().host_states();
    assert_eq!(states[0].address, host(&broken));
    assert!(states[0].next_eligible.is_some());
    assert!(states[1].next_eligible.is_none());
    assert_eq!(service.registry().pick_server().as_deref(), Ok(host(&healthy).as_str()));
}

#[tokio::test]
async fn disabled_backup_skips_cache_writes() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", config_path("application")))
            .respond_with(status_code(200).body(config_body("application", &[("key1", "v")]))),
    );

    let backup = tempdir().expect("tempdir");
    let mut app = app_config(&[host(&server)], "application", backup.path());
    app.is_backup_config = false;
    let service = build_service(app);
    service.bootstrap().await;

    assert_eq!(service.store().len(), 1);
    assert!(matches!(
        service.cache().load("application"),
        Err(CacheError::NotFound(_))
    ));
}

#[tokio::test]
async fn provider_edits_apply_to_next_cycle() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/notifications/v2"),
            request::query(url_decoded(contains((
                "notifications",
                r#"[{"namespaceName":"application","notificationId":-1}]"#
            )))),
        ])
        .respond_with(status_code(304)),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/notifications/v2"),
            request::query(url_decoded(contains((
                "notifications",
                r#"[{"namespaceName":"abc1","notificationId":-1},{"namespaceName":"application","notificationId":-1}]"#
            )))),
        ])
        .respond_with(status_code(304)),
    );

    let backup = tempdir().expect("tempdir");
    let shared = Arc::new(Mutex::new(app_config(
        &[host(&server)],
        "application",
        backup.path(),
    )));
    let provider = {
        let shared = shared.clone();
        move || -> AppConfig { shared.lock().expect("app config lock").clone() }
    };
    let service = SyncService::builder(provider)
        .with_config(fast_config())
        .build()
        .expect("service builds");

    assert!(service.poll_once().await.expect("first poll").is_unchanged());
    shared.lock().expect("app config lock").namespace_name = "application,abc1".into();
    assert!(service.poll_once().await.expect("second poll").is_unchanged());
}

#[tokio::test]
async fn provider_host_edit_moves_polls_to_new_server() {
    let old = Server::run();
    old.expect(
        Expectation::matching(request::method_path("GET", "/notifications/v2"))
            .respond_with(status_code(304)),
    );
    let new = Server::run();
    new.expect(
        Expectation::matching(request::method_path("GET", "/notifications/v2"))
            .respond_with(status_code(304)),
    );

    let backup = tempdir().expect("tempdir");
    let shared = Arc::new(Mutex::new(app_config(
        &[host(&old)],
        "application",
        backup.path(),
    )));
    let provider = {
        let shared = shared.clone();
        move || -> AppConfig { shared.lock().expect("app config lock").clone() }
    };
    let service = SyncService::builder(provider)
        .with_config(fast_config())
        .build()
        .expect("service builds");

    assert!(service.poll_once().await.expect("poll old").is_unchanged());
    shared.lock().expect("app config lock").ip = host(&new);
    assert!(service.poll_once().await.expect("poll new").is_unchanged());
    assert_eq!(service.registry().hosts(), vec![host(&new)]);
}

#[tokio::test]
async fn discovery_replaces_configured_hosts() {
    let config_service = Server::run();
    config_service.expect(
        Expectation::matching(request::method_path("GET", config_path("application")))
            .respond_with(status_code(200).body(config_body("application", &[("key1", "v")]))),
    );
    let meta = Server::run();
    meta.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/services/config"),
            request::query(url_decoded(contains(("appId", APP_ID)))),
        ])
        .respond_with(status_code(200).body(format!(
            r#"[{{"appName":"APOLLO-CONFIGSERVICE","instanceId":"cs-1","homepageUrl":"{}/"}}]"#,
            host(&config_service)
        ))),
    );

    let backup = tempdir().expect("tempdir");
    let mut app = app_config(&[host(&meta)], "application", backup.path());
    app.sync_server_list = true;
    let service = build_service(app);

    let report = service.bootstrap().await;
    assert!(report.all_remote());
    assert_eq!(service.registry().hosts(), vec![host(&config_service)]);
}

#[tokio::test]
async fn shutdown_interrupts_pending_long_poll() {
    // Accepts connections and never answers, so the long poll hangs.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let silent = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let backup = tempdir().expect("tempdir");
    let mut config = fast_config();
    config.poll_timeout = Duration::from_secs(60);
    let service = SyncService::builder(app_config(
        &[format!("http://{addr}")],
        "application",
        backup.path(),
    ))
    .with_config(config)
    .build()
    .expect("service builds");

    let handle = service.start().expect("start");
    tokio::time::sleep(Duration::from_millis(100)).await;
    tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
        .await
        .expect("shutdown completes promptly");
    assert_eq!(
        service.notification_id("application").await,
        Some(DEFAULT_NOTIFICATION_ID)
    );
    silent.abort();
}

#[tokio::test]
async fn start_is_refused_while_loops_run() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let silent = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let backup = tempdir().expect("tempdir");
    let service = build_service(app_config(
        &[format!("http://{addr}")],
        "application",
        backup.path(),
    ));

    let handle = service.start().expect("first start");
    assert!(matches!(service.start(), Err(SyncError::AlreadyRunning)));
    handle.shutdown().await;

    let handle = service.start().expect("start after shutdown");
    handle.shutdown().await;
    silent.abort();
}
