// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sliding-window usage accounting: current-minute counters, a bounded history
//! ring, and a bounded per-agent error ring.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::model::{epoch_ms, ErrorKind};

const MAX_AGENT_ERRORS: usize = 10;

/// One window's worth of aggregate counters.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct WindowCounters {
    pub window_start: u64,
    pub requests: u64,
    pub successes: u64,
    pub errors: u64,
    pub rate_limit_hits: u64,
    pub response_time_ms_total: u64,
}

impl WindowCounters {
    fn new(window_start: u64) -> Self {
        Self { window_start, ..Default::default() }
    }

    pub fn average_response_time_ms(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.response_time_ms_total as f64 / self.requests as f64
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentError {
    pub timestamp: u64,
    pub error_kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AgentStats {
    pub agent: String,
    pub requests: u64,
    pub successes: u64,
    pub errors: u64,
    pub last_errors: VecDeque<AgentError>,
}

/// Durable snapshot of usage state.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub current: WindowCounters,
    pub history: VecDeque<WindowCounters>,
    pub agents: HashMap<String, AgentStats>,
    pub threshold_latched: bool,
}

struct Inner {
    current: WindowCounters,
    history: VecDeque<WindowCounters>,
    agents: HashMap<String, AgentStats>,
    threshold_latched: bool,
}

/// Tracks request volume and outcomes, rotating a bounded history ring.
pub struct UsageMonitor {
    inner: Mutex<Inner>,
    history_size: usize,
    request_cap_per_minute: u64,
    alert_threshold_ratio: f64,
    snapshot_path: Option<PathBuf>,
}

/// One recorded invocation outcome.
pub struct RecordOutcome<'a> {
    pub agent: &'a str,
    pub success: bool,
    pub rate_limited: bool,
    pub response_time_ms: u64,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<&'a str>,
}

impl UsageMonitor {
    pub fn new(
        history_size: usize,
        request_cap_per_minute: u64,
        alert_threshold_ratio: f64,
        snapshot_path: Option<PathBuf>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                current: WindowCounters::new(epoch_ms()),
                history: VecDeque::new(),
                agents: HashMap::new(),
                threshold_latched: false,
            }),
            history_size,
            request_cap_per_minute,
            alert_threshold_ratio,
            snapshot_path,
        }
    }

    pub async fn restore(&self, snapshot: UsageSnapshot) {
        let mut inner = self.inner.lock().await;
        inner.current = snapshot.current;
        inner.history = snapshot.history;
        inner.agents = snapshot.agents;
        inner.threshold_latched = snapshot.threshold_latched;
    }

    /// Record one invocation outcome. Returns `true` the first time this call
    /// causes the alert threshold to be crossed (one-shot latch).
    pub async fn record(&self, outcome: RecordOutcome<'_>) -> bool {
        let mut inner = self.inner.lock().await;
        inner.current.requests += 1;
        inner.current.response_time_ms_total += outcome.response_time_ms;
        if outcome.success {
            inner.current.successes += 1;
        } else {
            inner.current.errors += 1;
        }
        if outcome.rate_limited {
            inner.current.rate_limit_hits += 1;
        }

        let agent = inner
            .agents
            .entry(outcome.agent.to_owned())
            .or_insert_with(|| AgentStats { agent: outcome.agent.to_owned(), ..Default::default() });
        agent.requests += 1;
        if outcome.success {
            agent.successes += 1;
        } else {
            agent.errors += 1;
            if let Some(kind) = outcome.error_kind {
                agent.last_errors.push_back(AgentError {
                    timestamp: epoch_ms(),
                    error_kind: kind,
                    message: truncate(outcome.error_message.unwrap_or_default()),
                });
                while agent.last_errors.len() > MAX_AGENT_ERRORS {
                    agent.last_errors.pop_front();
                }
            }
        }

        let ratio = inner.current.requests as f64 / self.request_cap_per_minute.max(1) as f64;
        let crossed = if ratio >= self.alert_threshold_ratio {
            if !inner.threshold_latched {
                inner.threshold_latched = true;
                true
            } else {
                false
            }
        } else {
            inner.threshold_latched = false;
            false
        };

        self.persist(&inner).await;
        crossed
    }

    /// Rotate the current window into history and start a fresh one. Called
    /// once per `usage.window_ms` by the owning rotation task.
    pub async fn rotate(&self) {
        let mut inner = self.inner.lock().await;
        let finished = std::mem::replace(&mut inner.current, WindowCounters::new(epoch_ms()));
        inner.history.push_back(finished);
        while inner.history.len() > self.history_size {
            inner.history.pop_front();
        }
        self.persist(&inner).await;
    }

    pub async fn current(&self) -> WindowCounters {
        self.inner.lock().await.current.clone()
    }

    pub async fn history(&self) -> Vec<WindowCounters> {
        self.inner.lock().await.history.iter().cloned().collect()
    }

    pub async fn agent_stats(&self) -> Vec<AgentStats> {
        self.inner.lock().await.agents.values().cloned().collect()
    }

    pub async fn snapshot(&self) -> UsageSnapshot {
        let inner = self.inner.lock().await;
        UsageSnapshot {
            current: inner.current.clone(),
            history: inner.history.clone(),
            agents: inner.agents.clone(),
            threshold_latched: inner.threshold_latched,
        }
    }

    /// Snapshots of `requests` taken over roughly the last hour, oldest first,
    /// for use by the prediction routine.
    pub async fn recent_window_history(&self) -> Vec<WindowCounters> {
        let inner = self.inner.lock().await;
        let take = self.history_size.min(60);
        inner.history.iter().rev().take(take).rev().cloned().collect()
    }

    async fn persist(&self, inner: &Inner) {
        let Some(ref path) = self.snapshot_path else { return };
        let snapshot = UsageSnapshot {
            current: inner.current.clone(),
            history: inner.history.clone(),
            agents: inner.agents.clone(),
            threshold_latched: inner.threshold_latched,
        };
        if let Err(e) = crate::persist::save(path, &snapshot) {
            tracing::warn!(err = %e, "failed to persist usage snapshot");
        }
    }
}

fn truncate(message: &str) -> String {
    const MAX_LEN: usize = 256;
    if message.len() <= MAX_LEN {
        message.to_owned()
    } else {
        let mut truncated: String = message.chars().take(MAX_LEN).collect();
        truncated.push('\u{2026}');
        truncated
    }
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
