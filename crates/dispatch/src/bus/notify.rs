// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pluggable notification delivery. The dispatch core only needs to emit
//! structured records and poll whether an operator ticket has closed; how
//! that actually reaches a human is out of scope (§1) and abstracted here so
//! tests can inject ticket-closed without a real ticket system.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::model::NotificationRecord;

/// Delivery sink for operator-facing notifications, and the other half of
/// the session-outage loop: whether an external ticket has been closed.
pub trait NotificationSink: Send + Sync {
    /// Deliver one notification record.
    fn emit(&self, record: NotificationRecord) -> impl std::future::Future<Output = ()> + Send;

    /// Ask whether the ticket referenced by `ticket_ref` has been closed.
    /// Polled by the session probe while `blocked`.
    fn ticket_closed(
        &self,
        ticket_ref: &str,
    ) -> impl std::future::Future<Output = bool> + Send;

    /// Ask that the ticket referenced by `ticket_ref` be reopened, after a
    /// recovery probe fails while `recovering`.
    fn reopen_ticket(&self, ticket_ref: &str) -> impl std::future::Future<Output = ()> + Send;
}

/// NATS-backed sink: publishes to the `notifications` subject, and polls
/// ticket closure via a short request/reply round trip on
/// `notifications.ticket_closed.<ticket_ref>` (no responder, e.g. no external
/// ticket integration wired up, is treated as "not yet closed").
pub struct NatsNotificationSink {
    client: async_nats::Client,
    subject: String,
    ticket_closed_timeout: Duration,
}

impl NatsNotificationSink {
    pub fn new(client: async_nats::Client, subject_prefix: &str) -> Self {
        Self {
            client,
            subject: format!("{subject_prefix}.notifications"),
            ticket_closed_timeout: Duration::from_secs(2),
        }
    }
}

impl NotificationSink for NatsNotificationSink {
    async fn emit(&self, record: NotificationRecord) {
        match serde_json::to_vec(&record) {
            Ok(bytes) => {
                if let Err(e) = self.client.publish(self.subject.clone(), bytes.into()).await {
                    tracing::warn!(err = %e, "failed to publish notification");
                }
            }
            Err(e) => tracing::warn!(err = %e, "failed to serialize notification"),
        }
    }

    async fn ticket_closed(&self, ticket_ref: &str) -> bool {
        let subject = format!("{}.ticket_closed.{ticket_ref}", self.subject);
        match tokio::time::timeout(
            self.ticket_closed_timeout,
            self.client.request(subject, Vec::new().into()),
        )
        .await
        {
            Ok(Ok(reply)) => reply.payload.as_ref() == b"closed",
            _ => false,
        }
    }

    async fn reopen_ticket(&self, ticket_ref: &str) {
        let subject = format!("{}.ticket_reopen.{ticket_ref}", self.subject);
        if let Err(e) = self.client.publish(subject, Vec::new().into()).await {
            tracing::warn!(err = %e, ticket_ref, "failed to publish ticket reopen request");
        }
    }
}

/// In-memory sink for tests and for deployments without an external ticket
/// system: records emitted notifications and lets the caller flip a latch to
/// simulate "the ticket was closed".
#[derive(Default)]
pub struct InMemoryNotificationSink {
    emitted: Arc<Mutex<Vec<NotificationRecord>>>,
    ticket_closed_latch: Arc<Mutex<bool>>,
    reopened: Arc<Mutex<Vec<String>>>,
}

impl InMemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: flip whether the next (and subsequent) `ticket_closed`
    /// polls report the ticket as closed.
    pub async fn set_ticket_closed(&self, closed: bool) {
        *self.ticket_closed_latch.lock().await = closed;
    }

    pub async fn emitted(&self) -> Vec<NotificationRecord> {
        self.emitted.lock().await.clone()
    }

    /// Test hook: ticket refs this sink was asked to reopen, in call order.
    pub async fn reopened(&self) -> Vec<String> {
        self.reopened.lock().await.clone()
    }
}

impl NotificationSink for InMemoryNotificationSink {
    async fn emit(&self, record: NotificationRecord) {
        self.emitted.lock().await.push(record);
    }

    async fn ticket_closed(&self, _ticket_ref: &str) -> bool {
        *self.ticket_closed_latch.lock().await
    }

    async fn reopen_ticket(&self, ticket_ref: &str) {
        self.reopened.lock().await.push(ticket_ref.to_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{epoch_ms, NotificationKind, Severity};

    fn record(kind: NotificationKind) -> NotificationRecord {
        NotificationRecord {
            kind,
            severity: Severity::Warning,
            timestamp: epoch_ms(),
            details: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn in_memory_sink_collects_emitted_records() {
        let sink = InMemoryNotificationSink::new();
        sink.emit(record(NotificationKind::RateLimit)).await;
        sink.emit(record(NotificationKind::SessionTimeout)).await;
        assert_eq!(sink.emitted().await.len(), 2);
    }

    #[tokio::test]
    async fn in_memory_sink_ticket_closed_defaults_false_until_set() {
        let sink = InMemoryNotificationSink::new();
        assert!(!sink.ticket_closed("t-1").await);
        sink.set_ticket_closed(true).await;
        assert!(sink.ticket_closed("t-1").await);
    }
}
