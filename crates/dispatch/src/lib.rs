// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wiring for the dispatch service: builds every component from a
//! [`Config`], restores any on-disk snapshots, and runs the dispatcher
//! loop alongside the control surface until shutdown.

pub mod bus;
pub mod config;
pub mod control;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod model;
pub mod persist;
pub mod queue;
pub mod ratelimit;
pub mod session;
pub mod test_support;
pub mod usage;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use bus::{NatsBusAdapter, NatsNotificationSink};
use config::Config;
use dispatcher::{Dispatcher, DispatcherState};
use engine::EngineInvoker;
use queue::QueueManager;
use ratelimit::RateLimitPredictor;
use session::SessionMonitor;
use usage::UsageMonitor;

/// TTL on buffered responses awaiting a reply-subject subscriber (§3/§6:
/// `responses:<origin>` carries a 1-hour TTL).
const OUTBOX_TTL: Duration = Duration::from_secs(3600);

/// Run the dispatch service to completion. Returns the process exit code:
/// `0` on a normal shutdown, `1` if the run ends with the emergency stop
/// armed (treated as fatal regardless of what triggered it — see DESIGN.md).
pub async fn run(config: Config) -> anyhow::Result<i32> {
    let state_dir = config.state_dir();
    std::fs::create_dir_all(&state_dir)?;
    let queue_snapshot_path = state_dir.join("queues.json");
    let state_snapshot_path = state_dir.join("state.json");
    let usage_snapshot_path = state_dir.join("stats.json");
    let session_snapshot_path = state_dir.join("session.json");

    let bus = Arc::new(
        NatsBusAdapter::connect(&config.nats_url, &config.bus_subject_prefix, OUTBOX_TTL).await?,
    );
    let notifier =
        Arc::new(NatsNotificationSink::new(bus.client(), &config.bus_subject_prefix));

    let queue = Arc::new(QueueManager::new(config.queue_max_size, Some(queue_snapshot_path.clone())));
    if let Some(snapshot) = persist::load(&queue_snapshot_path)? {
        queue.restore(snapshot).await;
    }

    let usage = Arc::new(UsageMonitor::new(
        config.usage_history_size,
        config.requests_per_minute,
        config.usage_alert_threshold_ratio,
        Some(usage_snapshot_path.clone()),
    ));
    if let Some(snapshot) = persist::load(&usage_snapshot_path)? {
        usage.restore(snapshot).await;
    }

    let rate_limit = Arc::new(RateLimitPredictor::new(config.rate_limit_caps(), None));

    let session = Arc::new(SessionMonitor::new(Some(session_snapshot_path.clone())));
    if let Some(snapshot) = persist::load(&session_snapshot_path)? {
        session.restore(snapshot).await;
    }

    let engine =
        Arc::new(EngineInvoker::new(config.engine_command_path.clone(), config.engine_args.clone()));

    let shutdown = CancellationToken::new();
    let dispatcher = Arc::new(Dispatcher::new(
        config.clone(),
        bus,
        notifier,
        queue,
        engine,
        usage,
        rate_limit,
        session,
        shutdown.clone(),
        Some(state_snapshot_path.clone()),
    ));
    if let Some(snapshot) = persist::load::<DispatcherState>(&state_snapshot_path)? {
        dispatcher.restore(snapshot).await;
    }

    let router = control::build_router(Arc::clone(&dispatcher));
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "control surface listening");

    let dispatcher_task = tokio::spawn(Arc::clone(&dispatcher).run());

    let server_shutdown = shutdown.clone();
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await });

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(err = %e, "control surface exited with an error");
            }
        }
        _ = install_signal_handler() => {
            shutdown.cancel();
        }
    }

    shutdown.cancel();
    let _ = dispatcher_task.await;

    Ok(if dispatcher.emergency_stopped() { 1 } else { 0 })
}

async fn install_signal_handler() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(err = %e, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Regression guard for the constant `NatsBusAdapter::connect` is wired
    /// up with in `run()`: the wire contract (§3/§6) gives `responses:<origin>`
    /// a 1-hour TTL, not the outbox's internal 1-minute default some earlier
    /// revision of this wiring used.
    #[test]
    fn outbox_ttl_matches_the_one_hour_wire_contract() {
        assert_eq!(OUTBOX_TTL, Duration::from_secs(3600));
    }
}
