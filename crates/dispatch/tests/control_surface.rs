// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP-level coverage of the control surface: routing, auth gating, and
//! the read/mutate round trip for the imperative endpoints.

use std::sync::Arc;

use axum::http::StatusCode;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use dispatch_core::bus::InMemoryNotificationSink;
use dispatch_core::config::Config;
use dispatch_core::control::build_router;
use dispatch_core::dispatcher::Dispatcher;
use dispatch_core::engine::EngineInvoker;
use dispatch_core::queue::QueueManager;
use dispatch_core::ratelimit::RateLimitPredictor;
use dispatch_core::session::SessionMonitor;
use dispatch_core::test_support::{AnyhowExt, InMemoryBusAdapter};
use dispatch_core::usage::UsageMonitor;

type TestDispatcher = Dispatcher<InMemoryBusAdapter, InMemoryNotificationSink>;

fn build(auth_token: Option<&str>) -> Arc<TestDispatcher> {
    let mut config = Config::parse_from(["dispatchd"]);
    config.auth_token = auth_token.map(str::to_owned);

    let bus = Arc::new(InMemoryBusAdapter::new());
    let notifier = Arc::new(InMemoryNotificationSink::new());
    let queue = Arc::new(QueueManager::new(config.queue_max_size, None));
    let engine = Arc::new(EngineInvoker::new("/bin/sh".to_owned(), vec!["-c".to_owned(), "cat".to_owned()]));
    let usage = Arc::new(UsageMonitor::new(
        config.usage_history_size,
        config.requests_per_minute,
        config.usage_alert_threshold_ratio,
        None,
    ));
    let rate_limit = Arc::new(RateLimitPredictor::new(config.rate_limit_caps(), None));
    let session = Arc::new(SessionMonitor::new(None));

    Arc::new(Dispatcher::new(
        config,
        bus,
        notifier,
        queue,
        engine,
        usage,
        rate_limit,
        session,
        CancellationToken::new(),
        None,
    ))
}

#[tokio::test]
async fn health_and_status_are_reachable_without_auth() -> anyhow::Result<()> {
    let dispatcher = build(Some("secret"));
    let app = build_router(dispatcher);
    let server = axum_test::TestServer::new(app).anyhow()?;

    let resp = server.get("/api/v1/health").await;
    resp.assert_status(StatusCode::OK);
    assert!(resp.text().contains("\"status\":\"running\""));

    let resp = server.get("/metrics").await;
    resp.assert_status(StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn protected_routes_require_the_bearer_token() -> anyhow::Result<()> {
    let dispatcher = build(Some("secret"));
    let app = build_router(dispatcher);
    let server = axum_test::TestServer::new(app).anyhow()?;

    let resp = server.get("/api/v1/status").await;
    resp.assert_status(StatusCode::UNAUTHORIZED);

    let resp = server
        .get("/api/v1/status")
        .add_header(
            axum::http::header::AUTHORIZATION,
            axum::http::HeaderValue::from_static("Bearer secret"),
        )
        .await;
    resp.assert_status(StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn no_auth_token_configured_disables_auth_entirely() -> anyhow::Result<()> {
    let dispatcher = build(None);
    let app = build_router(dispatcher);
    let server = axum_test::TestServer::new(app).anyhow()?;

    let resp = server.get("/api/v1/status").await;
    resp.assert_status(StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn pause_then_resume_round_trips_through_status() -> anyhow::Result<()> {
    let dispatcher = build(None);
    let app = build_router(dispatcher);
    let server = axum_test::TestServer::new(app).anyhow()?;

    let resp = server
        .post("/api/v1/pause")
        .json(&serde_json::json!({ "reason": "maintenance" }))
        .await;
    resp.assert_status(StatusCode::OK);
    assert!(resp.text().contains("\"paused\":true"));

    let resp = server.get("/api/v1/status").await;
    assert!(resp.text().contains("\"paused\":true"));

    let resp = server.post("/api/v1/resume").json(&serde_json::json!({})).await;
    resp.assert_status(StatusCode::OK);
    assert!(resp.text().contains("\"paused\":false"));

    Ok(())
}

#[tokio::test]
async fn set_concurrency_is_reflected_on_health() -> anyhow::Result<()> {
    let dispatcher = build(None);
    let app = build_router(dispatcher);
    let server = axum_test::TestServer::new(app).anyhow()?;

    let resp = server.post("/api/v1/concurrency").json(&serde_json::json!({ "n": 7 })).await;
    resp.assert_status(StatusCode::OK);
    assert!(resp.text().contains("\"concurrency\":7"));

    let resp = server.get("/api/v1/health").await;
    assert!(resp.text().contains("\"concurrency\":7"));

    Ok(())
}

#[tokio::test]
async fn set_throttle_rejects_an_unknown_mode() -> anyhow::Result<()> {
    let dispatcher = build(None);
    let app = build_router(dispatcher);
    let server = axum_test::TestServer::new(app).anyhow()?;

    let resp = server
        .post("/api/v1/throttle")
        .json(&serde_json::json!({ "enabled": true, "mode": "warp-speed", "delay_ms": 10 }))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn emergency_stop_is_visible_on_health() -> anyhow::Result<()> {
    let dispatcher = build(None);
    let app = build_router(dispatcher);
    let server = axum_test::TestServer::new(app).anyhow()?;

    let resp = server
        .post("/api/v1/emergency-stop")
        .json(&serde_json::json!({ "reason": "operator request" }))
        .await;
    resp.assert_status(StatusCode::OK);

    let resp = server.get("/api/v1/health").await;
    assert!(resp.text().contains("\"status\":\"stopped\""));
    assert!(resp.text().contains("\"emergency_stopped\":true"));

    Ok(())
}
