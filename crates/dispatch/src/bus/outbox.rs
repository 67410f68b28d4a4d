// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process, TTL-evicting outbox standing in for NATS core pub/sub's lack
//! of server-side retained messages: responses are published immediately for
//! listeners already subscribed, and also held here so a late-subscribing
//! consumer can still observe them within the TTL window.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::Mutex;

use crate::model::{epoch_ms, Response};

struct Entry {
    stored_at: u64,
    response: Response,
}

/// Bounded, TTL-evicting per-origin response outbox.
pub struct ResponseOutbox {
    inner: Mutex<HashMap<String, VecDeque<Entry>>>,
    ttl: Duration,
}

impl ResponseOutbox {
    pub fn new(ttl: Duration) -> Self {
        Self { inner: Mutex::new(HashMap::new()), ttl }
    }

    /// The TTL this outbox was constructed with, so callers can assert the
    /// wiring (e.g. `lib.rs`'s `OUTBOX_TTL`) matches the wire contract.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store a response for `origin`, evicting anything past its TTL.
    pub async fn push(&self, origin: &str, response: Response) {
        let mut inner = self.inner.lock().await;
        let now = epoch_ms();
        let entries = inner.entry(origin.to_owned()).or_default();
        entries.push_back(Entry { stored_at: now, response });
        evict_expired(entries, now, self.ttl);
    }

    /// Return all live (non-expired) responses queued for `origin`, oldest first.
    pub async fn drain(&self, origin: &str) -> Vec<Response> {
        let mut inner = self.inner.lock().await;
        let now = epoch_ms();
        let Some(entries) = inner.get_mut(origin) else { return Vec::new() };
        evict_expired(entries, now, self.ttl);
        entries.drain(..).map(|e| e.response).collect()
    }

    /// Evict expired entries across all origins; called periodically so
    /// origins with no reader still get cleaned up.
    pub async fn sweep(&self) {
        let mut inner = self.inner.lock().await;
        let now = epoch_ms();
        for entries in inner.values_mut() {
            evict_expired(entries, now, self.ttl);
        }
        inner.retain(|_, entries| !entries.is_empty());
    }
}

fn evict_expired(entries: &mut VecDeque<Entry>, now: u64, ttl: Duration) {
    let ttl_ms = ttl.as_millis() as u64;
    while entries.front().is_some_and(|e| now.saturating_sub(e.stored_at) > ttl_ms) {
        entries.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(id: &str) -> Response {
        Response {
            request_id: id.to_owned(),
            success: true,
            output: "ok".to_owned(),
            error_kind: None,
            response_time_ms: 10,
            engine_exit_code: Some(0),
            rate_limit_release_at: None,
            timestamp: epoch_ms(),
        }
    }

    #[tokio::test]
    async fn drain_returns_and_clears_stored_responses() {
        let outbox = ResponseOutbox::new(Duration::from_secs(3600));
        outbox.push("agent-a", response("r1")).await;
        outbox.push("agent-a", response("r2")).await;

        let drained = outbox.drain("agent-a").await;
        assert_eq!(drained.len(), 2);
        assert!(outbox.drain("agent-a").await.is_empty());
    }

    #[tokio::test]
    async fn unknown_origin_drains_empty() {
        let outbox = ResponseOutbox::new(Duration::from_secs(3600));
        assert!(outbox.drain("nobody").await.is_empty());
    }

    #[tokio::test]
    async fn sweep_evicts_expired_entries_without_a_reader() {
        let outbox = ResponseOutbox::new(Duration::from_millis(0));
        outbox.push("agent-a", response("r1")).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        outbox.sweep().await;
        assert!(outbox.drain("agent-a").await.is_empty());
    }
}
