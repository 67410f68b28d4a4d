// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The central scheduling loop: ties the bus, queue, Engine invoker,
//! classifier, usage/rate-limit/session components together.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::throttle::{ThrottleConfig, ThrottleMode};
use crate::bus::{BusAdapter, NotificationSink};
use crate::config::Config;
use crate::engine::{classify, Classification, EngineInvoker, EngineTimeout, Invocation};
use crate::model::{
    epoch_ms, ErrorKind, NotificationKind, NotificationRecord, Priority, Request, Response,
    Severity, MAX_ATTEMPTS,
};
use crate::queue::{QueueManager, QueueStatus};
use crate::ratelimit::{RateLimitPredictor, RateLimitSnapshot};
use crate::session::{SessionMonitor, SessionState, Transition};
use crate::usage::{RecordOutcome, UsageMonitor};

/// How often the auto-optimizer re-evaluates concurrency and throttle base.
const AUTO_OPTIMIZE_INTERVAL: Duration = Duration::from_secs(300);
const MIN_CONCURRENCY: usize = 3;
const MAX_CONCURRENCY: usize = 10;
const QUEUE_DEPTH_HIGH: usize = 100;
const QUEUE_DEPTH_LOW: usize = 10;
const ERROR_RATE_THRESHOLD: f64 = 0.1;
const THROTTLE_BASE_CAP_MS: u64 = 10_000;
/// Grace period given to in-flight work once a shutdown or emergency stop fires.
const DRAIN_GRACE: Duration = Duration::from_secs(30);
const DISPATCH_IDLE_SLEEP: Duration = Duration::from_millis(100);
const CONCURRENCY_POLL_SLEEP: Duration = Duration::from_millis(50);
const SESSION_PROBE_PAYLOAD: &str = "ping";
const SESSION_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Combined throttle + rate-limit snapshot, persisted to `state.json`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DispatcherState {
    pub throttle: Option<ThrottleConfig>,
    pub rate_limit: RateLimitSnapshot,
}

/// Ties the bus adapter, queue manager, Engine invoker, and the three
/// observing components (usage, rate-limit, session) into the scheduling loop.
pub struct Dispatcher<B: BusAdapter + 'static, S: NotificationSink + 'static> {
    config: Config,
    bus: Arc<B>,
    notifier: Arc<S>,
    queue: Arc<QueueManager>,
    engine: Arc<EngineInvoker>,
    usage: Arc<UsageMonitor>,
    rate_limit: Arc<RateLimitPredictor>,
    session: Arc<SessionMonitor>,
    throttle: Mutex<ThrottleConfig>,
    agent_priority_overrides: Mutex<HashMap<String, Priority>>,
    concurrency: AtomicUsize,
    concurrency_frozen: AtomicBool,
    emergency_stopped: AtomicBool,
    shutdown: CancellationToken,
    in_flight: Mutex<JoinSet<()>>,
    state_path: Option<PathBuf>,
}

impl<B: BusAdapter + 'static, S: NotificationSink + 'static> Dispatcher<B, S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        bus: Arc<B>,
        notifier: Arc<S>,
        queue: Arc<QueueManager>,
        engine: Arc<EngineInvoker>,
        usage: Arc<UsageMonitor>,
        rate_limit: Arc<RateLimitPredictor>,
        session: Arc<SessionMonitor>,
        shutdown: CancellationToken,
        state_path: Option<PathBuf>,
    ) -> Self {
        let concurrency = config.max_concurrent_requests;
        let throttle = ThrottleConfig::new(config.throttle_default_delay_ms);
        Self {
            config,
            bus,
            notifier,
            queue,
            engine,
            usage,
            rate_limit,
            session,
            throttle: Mutex::new(throttle),
            agent_priority_overrides: Mutex::new(HashMap::new()),
            concurrency: AtomicUsize::new(concurrency),
            concurrency_frozen: AtomicBool::new(false),
            emergency_stopped: AtomicBool::new(false),
            shutdown,
            in_flight: Mutex::new(JoinSet::new()),
            state_path,
        }
    }

    /// Apply a previously-persisted throttle/rate-limit snapshot, e.g. on startup.
    pub async fn restore(&self, state: DispatcherState) {
        if let Some(throttle) = state.throttle {
            *self.throttle.lock().await = throttle;
        }
        self.rate_limit.restore(state.rate_limit).await;
    }

    async fn persist_state(&self) {
        let Some(ref path) = self.state_path else { return };
        let throttle = self.throttle.lock().await.clone();
        let rate_limit = self.rate_limit.snapshot().await;
        let state = DispatcherState { throttle: Some(throttle), rate_limit };
        if let Err(e) = crate::persist::save(path, &state) {
            tracing::warn!(err = %e, "failed to persist dispatcher state");
        }
    }

    pub fn queue(&self) -> &Arc<QueueManager> {
        &self.queue
    }

    pub fn usage(&self) -> &Arc<UsageMonitor> {
        &self.usage
    }

    pub fn rate_limit(&self) -> &Arc<RateLimitPredictor> {
        &self.rate_limit
    }

    pub fn session(&self) -> &Arc<SessionMonitor> {
        &self.session
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency.load(Ordering::SeqCst)
    }

    pub fn emergency_stopped(&self) -> bool {
        self.emergency_stopped.load(Ordering::SeqCst)
    }

    pub async fn throttle_snapshot(&self) -> ThrottleConfig {
        self.throttle.lock().await.clone()
    }

    pub async fn agent_priority_overrides(&self) -> HashMap<String, Priority> {
        self.agent_priority_overrides.lock().await.clone()
    }

    // -- Imperative control-surface operations -------------------------------

    pub async fn pause(&self, reason: Option<String>) -> QueueStatus {
        tracing::info!(?reason, "pause");
        self.queue.pause(reason).await;
        self.queue.status().await
    }

    pub async fn resume(&self) -> QueueStatus {
        self.queue.resume().await;
        tracing::info!("resume");
        self.queue.status().await
    }

    pub async fn clear(&self, priority: Option<Priority>) -> usize {
        let removed = self.queue.clear(priority).await;
        tracing::info!(removed, ?priority, "clear");
        removed
    }

    pub async fn remove_task(&self, id: &str) -> bool {
        let found = self.queue.remove(id).await;
        tracing::info!(id, found, "remove_task");
        found
    }

    pub async fn set_throttle(&self, enabled: bool, mode: ThrottleMode, delay_ms: u64) -> ThrottleConfig {
        let snapshot = {
            let mut throttle = self.throttle.lock().await;
            throttle.enabled = enabled;
            throttle.mode = mode;
            throttle.base_delay_ms = delay_ms;
            throttle.attempt_count = 0;
            throttle.clone()
        };
        self.persist_state().await;
        tracing::info!(enabled, mode = mode.as_str(), delay_ms, "set_throttle");
        snapshot
    }

    /// Manual override freezes auto-optimization's concurrency adjustments
    /// until the next restart; throttle-base auto-tuning is unaffected.
    pub fn set_concurrency(&self, n: usize) -> usize {
        let n = n.max(1);
        self.concurrency.store(n, Ordering::SeqCst);
        self.concurrency_frozen.store(true, Ordering::SeqCst);
        tracing::info!(n, "set_concurrency (auto-tuning of concurrency frozen)");
        n
    }

    pub async fn set_agent_priority(&self, agent: &str, priority: Priority) {
        self.agent_priority_overrides.lock().await.insert(agent.to_owned(), priority);
        tracing::info!(agent, priority = priority.as_str(), "set_agent_priority");
    }

    pub async fn trigger_emergency_stop(&self, reason: &str) {
        if self.emergency_stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::warn!(reason, "emergency stop armed");
        self.notifier
            .emit(NotificationRecord {
                kind: NotificationKind::EmergencyStop,
                severity: Severity::Critical,
                timestamp: epoch_ms(),
                details: serde_json::json!({ "reason": reason }),
            })
            .await;
        self.persist_state().await;
        self.shutdown.cancel();
    }

    // -- Main loop and supporting tasks ---------------------------------------

    /// Run every owning task to completion (i.e. until `shutdown` fires).
    pub async fn run(self: Arc<Self>) {
        let mut supporting = JoinSet::new();
        supporting.spawn(Arc::clone(&self).intake_loop());
        supporting.spawn(Arc::clone(&self).session_probe_loop());
        supporting.spawn(Arc::clone(&self).scheduler_promote_loop());
        supporting.spawn(Arc::clone(&self).usage_rotate_loop());
        supporting.spawn(Arc::clone(&self).auto_optimize_loop());

        Arc::clone(&self).main_loop().await;

        supporting.abort_all();
        while supporting.join_next().await.is_some() {}
    }

    async fn main_loop(self: Arc<Self>) {
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            if self.emergency_stopped.load(Ordering::SeqCst) {
                tokio::time::sleep(DISPATCH_IDLE_SLEEP).await;
                continue;
            }
            if self.session.is_blocked().await {
                tokio::time::sleep(DISPATCH_IDLE_SLEEP).await;
                continue;
            }

            self.reap_finished().await;
            if self.in_flight_count().await >= self.concurrency() {
                tokio::time::sleep(CONCURRENCY_POLL_SLEEP).await;
                continue;
            }

            if let Some(delay) = self.throttle_delay().await {
                tokio::time::sleep(delay).await;
            }

            match self.queue.dequeue().await {
                Some(request) => {
                    let worker = Arc::clone(&self);
                    self.in_flight.lock().await.spawn(async move {
                        worker.handle_request(request).await;
                    });
                }
                None => tokio::time::sleep(DISPATCH_IDLE_SLEEP).await,
            }
        }
        self.drain_in_flight().await;
    }

    async fn reap_finished(&self) {
        let mut in_flight = self.in_flight.lock().await;
        while in_flight.try_join_next().is_some() {}
    }

    async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    async fn drain_in_flight(&self) {
        let mut in_flight = self.in_flight.lock().await;
        let _ = tokio::time::timeout(DRAIN_GRACE, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;
        in_flight.abort_all();
    }

    async fn throttle_delay(&self) -> Option<Duration> {
        let throttle = self.throttle.lock().await.clone();
        if !throttle.enabled {
            return None;
        }
        let ms = match throttle.mode {
            ThrottleMode::Fixed => throttle.base_delay_ms,
            ThrottleMode::Adaptive => self.rate_limit.advisory().await.recommended_delay_ms,
            ThrottleMode::Exponential => throttle.exponential_delay_ms(),
        };
        Some(Duration::from_millis(ms))
    }

    /// Pulls inbound requests off the bus and enqueues them, applying any
    /// per-agent priority override and rejecting what the queue rejects.
    async fn intake_loop(self: Arc<Self>) {
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            match self.bus.poll_request().await {
                Ok(Some(mut request)) => {
                    if let Some(&priority) =
                        self.agent_priority_overrides.lock().await.get(&request.origin)
                    {
                        request.priority = priority;
                    }
                    let origin = request.origin.clone();
                    let id = request.id.clone();
                    let scheduled_at = request.scheduled_at;
                    if let Err(e) = self.queue.enqueue(request, scheduled_at).await {
                        let response = Response {
                            request_id: id,
                            success: false,
                            output: e.to_string(),
                            error_kind: e.error_kind(),
                            response_time_ms: 0,
                            engine_exit_code: None,
                            rate_limit_release_at: None,
                            timestamp: epoch_ms(),
                        };
                        self.bus.emit_response(&origin, response).await;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(err = %e, "bus_failure: inbound request poll failed");
                    self.trigger_emergency_stop("bus_failure").await;
                    break;
                }
            }
        }
    }

    async fn session_probe_loop(self: Arc<Self>) {
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            tokio::time::sleep(self.config.session_probe_interval()).await;
            match self.session.state().await {
                SessionState::Ok => {}
                SessionState::Blocked => {
                    if let Some(ticket_ref) = self.session.ticket_ref().await {
                        if self.notifier.ticket_closed(&ticket_ref).await {
                            self.session.mark_ticket_closed().await;
                        }
                    }
                }
                SessionState::Recovering => {
                    let outcome = self
                        .engine
                        .invoke(SESSION_PROBE_PAYLOAD, SESSION_PROBE_TIMEOUT, &self.shutdown)
                        .await;
                    let succeeded = matches!(outcome, Ok(ref inv) if inv.exit_code == Some(0));
                    if succeeded {
                        self.session.recovery_succeeded().await;
                        self.notifier
                            .emit(NotificationRecord {
                                kind: NotificationKind::SessionRestored,
                                severity: Severity::Info,
                                timestamp: epoch_ms(),
                                details: serde_json::json!({}),
                            })
                            .await;
                    } else {
                        let transition = self.session.recovery_failed().await;
                        if let Some(ticket_ref) = self.session.ticket_ref().await {
                            self.notifier.reopen_ticket(&ticket_ref).await;
                        }
                        if transition == Transition::EscalateEmergencyStop {
                            self.trigger_emergency_stop(
                                "three consecutive failed session recovery probes",
                            )
                            .await;
                        }
                    }
                }
            }
        }
    }

    async fn scheduler_promote_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.scheduler_interval());
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            ticker.tick().await;
            self.queue.promote_scheduled().await;
        }
    }

    async fn usage_rotate_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.usage_window());
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            ticker.tick().await;
            let finished = self.usage.current().await;
            self.usage.rotate().await;
            if finished.rate_limit_hits == 0 {
                let mut throttle = self.throttle.lock().await;
                throttle.decay(self.config.throttle_default_delay_ms);
            }
            self.persist_state().await;
        }
    }

    async fn auto_optimize_loop(self: Arc<Self>) {
        if !self.config.auto_optimize_enabled {
            return;
        }
        let mut ticker = tokio::time::interval(AUTO_OPTIMIZE_INTERVAL);
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            ticker.tick().await;

            if !self.concurrency_frozen.load(Ordering::SeqCst) {
                let status = self.queue.status().await;
                let current = self.concurrency();
                if status.total > QUEUE_DEPTH_HIGH && current < MAX_CONCURRENCY {
                    self.concurrency.store(current + 1, Ordering::SeqCst);
                } else if status.total < QUEUE_DEPTH_LOW && current > MIN_CONCURRENCY {
                    self.concurrency.store(current - 1, Ordering::SeqCst);
                }
            }

            let window = self.usage.current().await;
            if window.requests > 0 {
                let error_rate = window.errors as f64 / window.requests as f64;
                if error_rate > ERROR_RATE_THRESHOLD {
                    let mut throttle = self.throttle.lock().await;
                    throttle.base_delay_ms =
                        ((throttle.base_delay_ms as f64 * 1.5) as u64).min(THROTTLE_BASE_CAP_MS);
                }
            }
        }
    }

    /// Estimate token usage from character counts (the Engine's transcript
    /// carries no authoritative token count).
    fn estimate_tokens(&self, payload: &str, output: &str) -> u64 {
        let chars = (payload.chars().count() + output.chars().count()) as f64;
        (chars / self.config.chars_per_token.max(0.01)).round() as u64
    }

    /// Record one usage outcome and, if this call pushed `current.requests`
    /// over the alert threshold for the first time, emit a one-shot
    /// `threshold_crossed` notification.
    async fn record_usage(&self, outcome: RecordOutcome<'_>) {
        let crossed = self.usage.record(outcome).await;
        if crossed {
            self.notifier
                .emit(NotificationRecord {
                    kind: NotificationKind::ThresholdCrossed,
                    severity: Severity::Warning,
                    timestamp: epoch_ms(),
                    details: serde_json::json!({
                        "threshold_ratio": self.config.usage_alert_threshold_ratio,
                    }),
                })
                .await;
        }
    }

    async fn emit_rate_limit_warnings(&self, warnings: Vec<crate::ratelimit::RateLimitWarning>) {
        for warning in warnings {
            self.notifier
                .emit(NotificationRecord {
                    kind: NotificationKind::RateLimit,
                    severity: warning.severity,
                    timestamp: epoch_ms(),
                    details: serde_json::json!({
                        "kind": format!("{:?}", warning.kind),
                        "threshold_pct": warning.threshold_pct,
                    }),
                })
                .await;
        }
    }

    async fn handle_request(self: Arc<Self>, request: Request) {
        let timeout = request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.engine_timeout());

        match self.engine.invoke(&request.payload, timeout, &self.shutdown).await {
            Ok(invocation) => {
                let classification =
                    classify(invocation.exit_code, &invocation.stdout, &invocation.stderr);
                self.resolve(request, invocation, classification).await;
            }
            Err(err) => match err.downcast::<EngineTimeout>() {
                Ok(timeout_err) => self.resolve_timeout(request, timeout_err.0).await,
                Err(_) => {
                    tracing::warn!(request_id = %request.id, "engine invocation cancelled before completion");
                }
            },
        }
    }

    async fn resolve_timeout(&self, mut request: Request, invocation: Invocation) {
        self.record_usage(RecordOutcome {
                agent: &request.origin,
                success: false,
                rate_limited: false,
                response_time_ms: invocation.elapsed_ms,
                error_kind: Some(ErrorKind::EngineTimeout),
                error_message: Some("engine invocation timed out"),
            })
            .await;

        if request.attempts < MAX_ATTEMPTS {
            request.attempts += 1;
            request.priority = request.priority.demote();
            if let Err(e) = self.queue.enqueue(request, None).await {
                tracing::error!(err = %e, "failed to requeue request after timeout");
            }
        } else {
            let response = Response {
                request_id: request.id.clone(),
                success: false,
                output: invocation.stdout,
                error_kind: Some(ErrorKind::EngineTimeout),
                response_time_ms: invocation.elapsed_ms,
                engine_exit_code: None,
                rate_limit_release_at: None,
                timestamp: epoch_ms(),
            };
            self.bus.emit_response(&request.origin, response).await;
        }
    }

    async fn resolve(&self, mut request: Request, invocation: Invocation, classification: Classification) {
        match classification {
            Classification::Success => {
                let tokens = self.estimate_tokens(&request.payload, &invocation.stdout);
                self.record_usage(RecordOutcome {
                        agent: &request.origin,
                        success: true,
                        rate_limited: false,
                        response_time_ms: invocation.elapsed_ms,
                        error_kind: None,
                        error_message: None,
                    })
                    .await;
                let warnings = self.rate_limit.record(tokens, 1).await;
                self.emit_rate_limit_warnings(warnings).await;

                let response = Response {
                    request_id: request.id.clone(),
                    success: true,
                    output: invocation.stdout,
                    error_kind: None,
                    response_time_ms: invocation.elapsed_ms,
                    engine_exit_code: invocation.exit_code,
                    rate_limit_release_at: None,
                    timestamp: epoch_ms(),
                };
                self.bus.emit_response(&request.origin, response).await;
                self.persist_state().await;
            }
            Classification::RateLimit { release_at } => {
                self.record_usage(RecordOutcome {
                        agent: &request.origin,
                        success: false,
                        rate_limited: true,
                        response_time_ms: invocation.elapsed_ms,
                        error_kind: Some(ErrorKind::RateLimit),
                        error_message: Some("usage limit reached"),
                    })
                    .await;
                self.rate_limit.note_release(release_at).await;
                {
                    let mut throttle = self.throttle.lock().await;
                    throttle.engage_exponential(60_000);
                }
                self.notifier
                    .emit(NotificationRecord {
                        kind: NotificationKind::RateLimit,
                        severity: Severity::Critical,
                        timestamp: epoch_ms(),
                        details: serde_json::json!({
                            "release_at": release_at,
                            "request_id": request.id,
                        }),
                    })
                    .await;
                if let Err(e) = self.queue.enqueue(request, None).await {
                    tracing::error!(err = %e, "failed to requeue rate-limited request");
                }
                self.persist_state().await;
            }
            Classification::SessionExpiry => {
                self.record_usage(RecordOutcome {
                        agent: &request.origin,
                        success: false,
                        rate_limited: false,
                        response_time_ms: invocation.elapsed_ms,
                        error_kind: Some(ErrorKind::SessionExpiry),
                        error_message: Some("session or credential expired"),
                    })
                    .await;
                let transition = self.session.observe_session_expiry().await;
                if transition == Transition::EnteredBlocked {
                    let ticket_ref = self.session.ticket_ref().await;
                    self.notifier
                        .emit(NotificationRecord {
                            kind: NotificationKind::SessionTimeout,
                            severity: Severity::Critical,
                            timestamp: epoch_ms(),
                            details: serde_json::json!({ "ticket_ref": ticket_ref }),
                        })
                        .await;
                }
                self.session.record_blocked_request(&request.id).await;

                let response = Response {
                    request_id: request.id.clone(),
                    success: false,
                    output: invocation.stdout,
                    error_kind: Some(ErrorKind::SessionExpiry),
                    response_time_ms: invocation.elapsed_ms,
                    engine_exit_code: invocation.exit_code,
                    rate_limit_release_at: None,
                    timestamp: epoch_ms(),
                };
                self.bus.emit_response(&request.origin, response).await;
            }
            Classification::NetworkError | Classification::FatalEngineError => {
                let message =
                    if invocation.stderr.is_empty() { &invocation.stdout } else { &invocation.stderr };
                self.record_usage(RecordOutcome {
                        agent: &request.origin,
                        success: false,
                        rate_limited: false,
                        response_time_ms: invocation.elapsed_ms,
                        error_kind: Some(ErrorKind::EngineTransient),
                        error_message: Some(message),
                    })
                    .await;

                if request.attempts < MAX_ATTEMPTS {
                    request.attempts += 1;
                    request.priority = request.priority.demote();
                    if let Err(e) = self.queue.enqueue(request, None).await {
                        tracing::error!(err = %e, "failed to requeue request after transient failure");
                    }
                } else {
                    let response = Response {
                        request_id: request.id.clone(),
                        success: false,
                        output: invocation.stdout,
                        error_kind: Some(ErrorKind::EngineTransient),
                        response_time_ms: invocation.elapsed_ms,
                        engine_exit_code: invocation.exit_code,
                        rate_limit_release_at: None,
                        timestamp: epoch_ms(),
                    };
                    self.bus.emit_response(&request.origin, response).await;
                }
            }
        }
    }
}
