// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP control surface: introspection routes plus the imperative
//! operations that pause/resume the queue, tune throttle and concurrency,
//! override per-agent priority, and arm the emergency stop.

pub mod auth;
pub mod handlers;
pub mod metrics;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::bus::{BusAdapter, NotificationSink};
use crate::dispatcher::Dispatcher;

/// Build the axum `Router` exposing the control surface over `dispatcher`.
pub fn build_router<B: BusAdapter + 'static, S: NotificationSink + 'static>(
    dispatcher: Arc<Dispatcher<B, S>>,
) -> Router {
    Router::new()
        .route("/api/v1/health", get(handlers::health))
        .route("/api/v1/status", get(handlers::status))
        .route("/api/v1/usage", get(handlers::usage_current))
        .route("/api/v1/usage/history", get(handlers::usage_history))
        .route("/api/v1/agents", get(handlers::agent_stats))
        .route("/api/v1/predictions", get(handlers::predictions))
        .route("/api/v1/rate-limit", get(handlers::rate_limit_state))
        .route("/api/v1/session", get(handlers::session_state))
        .route("/metrics", get(handlers::metrics))
        .route("/api/v1/pause", post(handlers::pause))
        .route("/api/v1/resume", post(handlers::resume))
        .route("/api/v1/clear", post(handlers::clear))
        .route("/api/v1/tasks/{id}", delete(handlers::remove_task))
        .route("/api/v1/throttle", post(handlers::set_throttle))
        .route("/api/v1/concurrency", post(handlers::set_concurrency))
        .route("/api/v1/agents/{agent}/priority", post(handlers::set_agent_priority))
        .route("/api/v1/emergency-stop", post(handlers::emergency_stop))
        .layer(middleware::from_fn_with_state(dispatcher.clone(), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(dispatcher)
}
