// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control Surface HTTP handlers: read-only introspection plus the
//! imperative operations that mutate Dispatcher/Queue Manager/Session
//! Monitor state. Every imperative handler logs via `tracing::info!`
//! (inside the Dispatcher method it calls) and returns the post-operation
//! view of the affected component, per §4.I.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::bus::{BusAdapter, NotificationSink};
use crate::dispatcher::{Dispatcher, ThrottleConfig, ThrottleMode};
use crate::error::DispatchError;
use crate::model::Priority;
use crate::queue::QueueStatus;
use crate::ratelimit::{Advisory, LimitKind, RateLimitSnapshot};
use crate::session::SessionSnapshot;
use crate::usage::{AgentStats, Prediction, WindowCounters};

use super::metrics::render_metrics;

type AppState<B, S> = State<Arc<Dispatcher<B, S>>>;

// -- Read-only introspection ---------------------------------------------------

/// `GET /api/v1/status` — queue sizes, oldest-enqueued-at per class, pause state.
pub async fn status<B: BusAdapter + 'static, S: NotificationSink + 'static>(
    State(d): AppState<B, S>,
) -> Json<QueueStatus> {
    Json(d.queue().status().await)
}

/// `GET /api/v1/health`
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub emergency_stopped: bool,
    pub session_state: &'static str,
    pub concurrency: usize,
}

pub async fn health<B: BusAdapter + 'static, S: NotificationSink + 'static>(
    State(d): AppState<B, S>,
) -> Json<HealthResponse> {
    let session_state = match d.session().state().await {
        crate::session::SessionState::Ok => "ok",
        crate::session::SessionState::Blocked => "blocked",
        crate::session::SessionState::Recovering => "recovering",
    };
    Json(HealthResponse {
        status: if d.emergency_stopped() { "stopped" } else { "running" },
        emergency_stopped: d.emergency_stopped(),
        session_state,
        concurrency: d.concurrency(),
    })
}

/// `GET /api/v1/usage` — the current (in-progress) usage window.
pub async fn usage_current<B: BusAdapter + 'static, S: NotificationSink + 'static>(
    State(d): AppState<B, S>,
) -> Json<WindowCounters> {
    Json(d.usage().current().await)
}

/// `GET /api/v1/usage/history` — rotated per-minute snapshots, oldest first.
pub async fn usage_history<B: BusAdapter + 'static, S: NotificationSink + 'static>(
    State(d): AppState<B, S>,
) -> Json<Vec<WindowCounters>> {
    Json(d.usage().history().await)
}

/// `GET /api/v1/agents` — per-agent aggregates.
pub async fn agent_stats<B: BusAdapter + 'static, S: NotificationSink + 'static>(
    State(d): AppState<B, S>,
) -> Json<Vec<AgentStats>> {
    Json(d.usage().agent_stats().await)
}

#[derive(Debug, Deserialize)]
pub struct PredictionQuery {
    #[serde(default = "default_minutes_ahead")]
    pub minutes_ahead: f64,
}

fn default_minutes_ahead() -> f64 {
    5.0
}

/// `GET /api/v1/predictions[?minutes_ahead=]` — least-squares load projection.
pub async fn predictions<B: BusAdapter + 'static, S: NotificationSink + 'static>(
    State(d): AppState<B, S>,
    Query(q): Query<PredictionQuery>,
) -> Json<Prediction> {
    let history = d.usage().recent_window_history().await;
    Json(crate::usage::predict(&history, q.minutes_ahead))
}

/// `GET /api/v1/rate-limit` — accounting windows plus the current advisory.
#[derive(Debug, Serialize)]
pub struct RateLimitView {
    #[serde(flatten)]
    pub snapshot: RateLimitSnapshot,
    pub advisory: AdvisoryView,
    pub time_to_limit_secs: TimeToLimitView,
}

#[derive(Debug, Serialize)]
pub struct AdvisoryView {
    pub utilization: f64,
    pub recommended_delay_ms: u64,
    pub recommended_action: &'static str,
}

impl From<Advisory> for AdvisoryView {
    fn from(a: Advisory) -> Self {
        Self {
            utilization: a.utilization,
            recommended_delay_ms: a.recommended_delay_ms,
            recommended_action: a.recommended_action.as_str(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TimeToLimitView {
    pub tokens_per_minute: f64,
    pub requests_per_minute: f64,
    pub tokens_per_day: f64,
    pub tokens_per_month: f64,
}

pub async fn rate_limit_state<B: BusAdapter + 'static, S: NotificationSink + 'static>(
    State(d): AppState<B, S>,
) -> Json<RateLimitView> {
    let rl = d.rate_limit();
    let snapshot = rl.snapshot().await;
    let advisory = rl.advisory().await.into();
    let time_to_limit_secs = TimeToLimitView {
        tokens_per_minute: rl.time_to_limit(LimitKind::TokensPerMinute).await,
        requests_per_minute: rl.time_to_limit(LimitKind::RequestsPerMinute).await,
        tokens_per_day: rl.time_to_limit(LimitKind::TokensPerDay).await,
        tokens_per_month: rl.time_to_limit(LimitKind::TokensPerMonth).await,
    };
    Json(RateLimitView { snapshot, advisory, time_to_limit_secs })
}

/// `GET /api/v1/session` — the session-outage state machine's current snapshot.
pub async fn session_state<B: BusAdapter + 'static, S: NotificationSink + 'static>(
    State(d): AppState<B, S>,
) -> Json<SessionSnapshot> {
    Json(d.session().snapshot().await)
}

/// `GET /metrics` — Prometheus text exposition format.
pub async fn metrics<B: BusAdapter + 'static, S: NotificationSink + 'static>(
    State(d): AppState<B, S>,
) -> impl IntoResponse {
    let body = render_metrics(&d).await;
    ([("content-type", "text/plain; version=0.0.4")], body)
}

// -- Imperative operations -------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
pub struct ClearQuery {
    pub priority: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub removed: usize,
}

/// `POST /api/v1/pause`
pub async fn pause<B: BusAdapter + 'static, S: NotificationSink + 'static>(
    State(d): AppState<B, S>,
    body: Option<Json<PauseRequest>>,
) -> Json<QueueStatus> {
    let reason = body.and_then(|Json(b)| b.reason);
    Json(d.pause(reason).await)
}

#[derive(Debug, Deserialize, Default)]
pub struct PauseRequest {
    pub reason: Option<String>,
}

/// `POST /api/v1/resume`
pub async fn resume<B: BusAdapter + 'static, S: NotificationSink + 'static>(
    State(d): AppState<B, S>,
) -> Json<QueueStatus> {
    Json(d.resume().await)
}

/// `POST /api/v1/clear[?priority=]`
pub async fn clear<B: BusAdapter + 'static, S: NotificationSink + 'static>(
    State(d): AppState<B, S>,
    Query(q): Query<ClearQuery>,
) -> Result<Json<ClearResponse>, DispatchError> {
    let priority = parse_optional_priority(q.priority.as_deref())?;
    let removed = d.clear(priority).await;
    Ok(Json(ClearResponse { removed }))
}

#[derive(Debug, Serialize)]
pub struct RemoveTaskResponse {
    pub id: String,
    pub removed: bool,
}

/// `DELETE /api/v1/tasks/{id}`
pub async fn remove_task<B: BusAdapter + 'static, S: NotificationSink + 'static>(
    State(d): AppState<B, S>,
    Path(id): Path<String>,
) -> Json<RemoveTaskResponse> {
    let removed = d.remove_task(&id).await;
    Json(RemoveTaskResponse { id, removed })
}

#[derive(Debug, Deserialize)]
pub struct ThrottleRequest {
    pub enabled: bool,
    pub mode: String,
    pub delay_ms: u64,
}

/// `POST /api/v1/throttle {enabled, mode, delay_ms}`
pub async fn set_throttle<B: BusAdapter + 'static, S: NotificationSink + 'static>(
    State(d): AppState<B, S>,
    Json(req): Json<ThrottleRequest>,
) -> Result<Json<ThrottleConfig>, DispatchError> {
    let mode: ThrottleMode =
        req.mode.parse().map_err(|_| DispatchError::BadRequest)?;
    Ok(Json(d.set_throttle(req.enabled, mode, req.delay_ms).await))
}

#[derive(Debug, Deserialize)]
pub struct ConcurrencyRequest {
    pub n: usize,
}

#[derive(Debug, Serialize)]
pub struct ConcurrencyResponse {
    pub concurrency: usize,
}

/// `POST /api/v1/concurrency {n}`
pub async fn set_concurrency<B: BusAdapter + 'static, S: NotificationSink + 'static>(
    State(d): AppState<B, S>,
    Json(req): Json<ConcurrencyRequest>,
) -> Json<ConcurrencyResponse> {
    Json(ConcurrencyResponse { concurrency: d.set_concurrency(req.n) })
}

#[derive(Debug, Deserialize)]
pub struct AgentPriorityRequest {
    pub priority: String,
}

/// `POST /api/v1/agents/{agent}/priority {priority}`
pub async fn set_agent_priority<B: BusAdapter + 'static, S: NotificationSink + 'static>(
    State(d): AppState<B, S>,
    Path(agent): Path<String>,
    Json(req): Json<AgentPriorityRequest>,
) -> Result<Json<HashMap<String, Priority>>, DispatchError> {
    let priority: Priority = req.priority.parse().map_err(|_| DispatchError::BadRequest)?;
    d.set_agent_priority(&agent, priority).await;
    Ok(Json(d.agent_priority_overrides().await))
}

#[derive(Debug, Deserialize)]
pub struct EmergencyStopRequest {
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct EmergencyStopResponse {
    pub armed: bool,
}

/// `POST /api/v1/emergency-stop {reason}`
pub async fn emergency_stop<B: BusAdapter + 'static, S: NotificationSink + 'static>(
    State(d): AppState<B, S>,
    Json(req): Json<EmergencyStopRequest>,
) -> Json<EmergencyStopResponse> {
    d.trigger_emergency_stop(&req.reason).await;
    Json(EmergencyStopResponse { armed: true })
}

fn parse_optional_priority(raw: Option<&str>) -> Result<Option<Priority>, DispatchError> {
    match raw {
        None => Ok(None),
        Some(s) => s.parse().map(Some).map_err(|_| DispatchError::BadRequest),
    }
}
