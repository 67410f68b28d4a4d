// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session-outage state machine: `ok -> blocked -> recovering -> ok`.
//!
//! This module owns only the state transitions; the actual I/O (polling the
//! `NotificationSink` for ticket closure, issuing a trivial Engine probe) is
//! driven by the dispatcher's probe task, which calls these methods with the
//! outcome. That keeps the state machine itself a plain, test-hookable
//! single-writer actor with no Engine or bus dependency.

use std::collections::VecDeque;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::model::epoch_ms;

/// Bound on `blocked_requests` so a long outage doesn't grow memory unboundedly.
const MAX_BLOCKED_REQUESTS: usize = 1000;
/// Consecutive failed recovery probes that trigger an emergency stop.
const MAX_CONSECUTIVE_PROBE_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Ok,
    Blocked,
    Recovering,
}

/// The outcome of a state-changing call, describing what the caller (the
/// dispatcher's probe task) should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// No state change (e.g. already blocked).
    None,
    /// Just transitioned ok -> blocked: emit a `session_timeout` notification.
    EnteredBlocked,
    /// Just transitioned blocked -> recovering: issue the Engine probe next.
    EnteredRecovering,
    /// Just transitioned recovering -> ok: emit a `session_restored` notification.
    Recovered,
    /// Just transitioned recovering -> blocked for the Nth consecutive time
    /// without escalating yet.
    RecoveryFailed,
    /// Three consecutive failed recovery probes: caller must trigger an
    /// emergency stop.
    EscalateEmergencyStop,
}

/// Durable snapshot of the session outage state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub blocked_at: Option<u64>,
    pub ticket_ref: Option<String>,
    #[serde(default)]
    pub blocked_requests: VecDeque<String>,
    #[serde(default)]
    pub consecutive_probe_failures: u32,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: SessionState::Ok,
            blocked_at: None,
            ticket_ref: None,
            blocked_requests: VecDeque::new(),
            consecutive_probe_failures: 0,
        }
    }
}

struct Inner {
    state: SessionState,
    blocked_at: Option<u64>,
    ticket_ref: Option<String>,
    blocked_requests: VecDeque<String>,
    consecutive_probe_failures: u32,
}

/// The session-outage state machine.
pub struct SessionMonitor {
    inner: Mutex<Inner>,
    snapshot_path: Option<PathBuf>,
}

impl SessionMonitor {
    pub fn new(snapshot_path: Option<PathBuf>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: SessionState::Ok,
                blocked_at: None,
                ticket_ref: None,
                blocked_requests: VecDeque::new(),
                consecutive_probe_failures: 0,
            }),
            snapshot_path,
        }
    }

    pub async fn restore(&self, snapshot: SessionSnapshot) {
        let mut inner = self.inner.lock().await;
        inner.state = snapshot.state;
        inner.blocked_at = snapshot.blocked_at;
        inner.ticket_ref = snapshot.ticket_ref;
        inner.blocked_requests = snapshot.blocked_requests;
        inner.consecutive_probe_failures = snapshot.consecutive_probe_failures;
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub async fn is_blocked(&self) -> bool {
        self.inner.lock().await.state == SessionState::Blocked
    }

    /// Called by the dispatcher whenever the classifier reports `session_expiry`.
    /// Transitions `ok -> blocked`; has no effect if already blocked or recovering
    /// (a recovering outage that re-fails is handled by [`Self::recovery_failed`]).
    pub async fn observe_session_expiry(&self) -> Transition {
        let mut inner = self.inner.lock().await;
        if inner.state != SessionState::Ok {
            return Transition::None;
        }
        inner.state = SessionState::Blocked;
        let now = epoch_ms();
        inner.blocked_at = Some(now);
        inner.ticket_ref = Some(format!("session-outage-{now}"));
        self.persist(&inner).await;
        Transition::EnteredBlocked
    }

    /// Record a request id that failed while the session was blocked.
    pub async fn record_blocked_request(&self, id: &str) {
        let mut inner = self.inner.lock().await;
        if inner.state != SessionState::Blocked {
            return;
        }
        inner.blocked_requests.push_back(id.to_owned());
        while inner.blocked_requests.len() > MAX_BLOCKED_REQUESTS {
            inner.blocked_requests.pop_front();
        }
        self.persist(&inner).await;
    }

    /// Called by the probe task after `NotificationSink::ticket_closed()`
    /// returns `true` while blocked.
    pub async fn mark_ticket_closed(&self) -> Transition {
        let mut inner = self.inner.lock().await;
        if inner.state != SessionState::Blocked {
            return Transition::None;
        }
        inner.state = SessionState::Recovering;
        self.persist(&inner).await;
        Transition::EnteredRecovering
    }

    /// Called by the probe task after a trivial Engine probe succeeds while
    /// `recovering`.
    pub async fn recovery_succeeded(&self) -> Transition {
        let mut inner = self.inner.lock().await;
        if inner.state != SessionState::Recovering {
            return Transition::None;
        }
        inner.state = SessionState::Ok;
        inner.blocked_at = None;
        inner.ticket_ref = None;
        inner.blocked_requests.clear();
        inner.consecutive_probe_failures = 0;
        self.persist(&inner).await;
        Transition::Recovered
    }

    /// Called by the probe task after a trivial Engine probe fails while
    /// `recovering`. Requests the ticket be reopened; escalates to an
    /// emergency stop after three consecutive failures.
    pub async fn recovery_failed(&self) -> Transition {
        let mut inner = self.inner.lock().await;
        if inner.state != SessionState::Recovering {
            return Transition::None;
        }
        inner.state = SessionState::Blocked;
        inner.consecutive_probe_failures += 1;
        self.persist(&inner).await;
        if inner.consecutive_probe_failures >= MAX_CONSECUTIVE_PROBE_FAILURES {
            Transition::EscalateEmergencyStop
        } else {
            Transition::RecoveryFailed
        }
    }

    pub async fn ticket_ref(&self) -> Option<String> {
        self.inner.lock().await.ticket_ref.clone()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock().await;
        snapshot_of(&inner)
    }

    async fn persist(&self, inner: &Inner) {
        let Some(ref path) = self.snapshot_path else { return };
        let snapshot = snapshot_of(inner);
        if let Err(e) = crate::persist::save(path, &snapshot) {
            tracing::warn!(err = %e, "failed to persist session snapshot");
        }
    }
}

fn snapshot_of(inner: &Inner) -> SessionSnapshot {
    SessionSnapshot {
        state: inner.state,
        blocked_at: inner.blocked_at,
        ticket_ref: inner.ticket_ref.clone(),
        blocked_requests: inner.blocked_requests.clone(),
        consecutive_probe_failures: inner.consecutive_probe_failures,
    }
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
