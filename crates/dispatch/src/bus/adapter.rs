// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! NATS core pub/sub implementation of the Bus Adapter: pops `inbound_requests`,
//! publishes `responses:<origin>`, and retries transient store errors with
//! bounded exponential backoff before surfacing a `bus_failure`.

use std::future::Future;
use std::time::Duration;

use futures_util::StreamExt;
use rand::Rng;
use tokio::sync::Mutex;

use crate::model::{epoch_ms, ErrorKind, InboundRequest, Priority, Request, RequestStatus, Response};

use super::outbox::ResponseOutbox;

/// Maximum attempts before a transient bus error is treated as `bus_failure`.
const MAX_RETRY_ATTEMPTS: u32 = 5;
/// Cap on the backoff delay between retries.
const MAX_BACKOFF: Duration = Duration::from_secs(5);
/// How long `poll_request` blocks waiting for a message before returning `None`.
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Abstracts the request/response side of the message bus so the dispatcher
/// can be driven by an in-memory bus in tests.
pub trait BusAdapter: Send + Sync {
    /// Pop one inbound request, or `None` if nothing arrived within the poll
    /// timeout. Malformed entries are rejected (an error response is written
    /// and the entry discarded) rather than returned.
    fn poll_request(&self) -> impl Future<Output = anyhow::Result<Option<Request>>> + Send;

    /// Publish a response for `origin`.
    fn emit_response(&self, origin: &str, response: Response) -> impl Future<Output = ()> + Send;
}

/// NATS-backed `BusAdapter`.
pub struct NatsBusAdapter {
    client: async_nats::Client,
    subject_prefix: String,
    subscriber: Mutex<async_nats::Subscriber>,
    outbox: ResponseOutbox,
}

impl NatsBusAdapter {
    /// Connect to NATS and subscribe to `inbound_requests` under the `dispatch`
    /// queue group, so only one dispatcher instance among peers claims a
    /// given message.
    pub async fn connect(
        url: &str,
        subject_prefix: &str,
        outbox_ttl: Duration,
    ) -> anyhow::Result<Self> {
        let client = connect_with_retry(url).await?;
        let inbound_subject = format!("{subject_prefix}.inbound_requests");
        let subscriber =
            client.queue_subscribe(inbound_subject, "dispatch".to_owned()).await?;
        Ok(Self {
            client,
            subject_prefix: subject_prefix.to_owned(),
            subscriber: Mutex::new(subscriber),
            outbox: ResponseOutbox::new(outbox_ttl),
        })
    }

    fn response_subject(&self, origin: &str) -> String {
        format!("{}.responses.{origin}", self.subject_prefix)
    }

    /// The underlying NATS client, so callers can build other subject-bound
    /// adapters (e.g. the notification sink) against the same connection.
    pub fn client(&self) -> async_nats::Client {
        self.client.clone()
    }

    /// Responses held for `origin` within the TTL window, for consumers that
    /// subscribed late (e.g. a control-surface replay endpoint).
    pub async fn outbox_drain(&self, origin: &str) -> Vec<Response> {
        self.outbox.drain(origin).await
    }

    pub async fn outbox_sweep(&self) {
        self.outbox.sweep().await;
    }

    /// The TTL the response outbox was wired up with, so callers can assert
    /// it matches the wire contract's 1-hour `responses:<origin>` TTL (§3/§6).
    pub fn outbox_ttl(&self) -> Duration {
        self.outbox.ttl()
    }

    async fn publish_with_retry(&self, subject: String, payload: Vec<u8>) -> anyhow::Result<()> {
        retry_with_backoff(|| {
            let client = self.client.clone();
            let subject = subject.clone();
            let payload = payload.clone();
            async move { client.publish(subject, payload.into()).await.map_err(anyhow::Error::from) }
        })
        .await
    }
}

impl BusAdapter for NatsBusAdapter {
    async fn poll_request(&self) -> anyhow::Result<Option<Request>> {
        let mut subscriber = self.subscriber.lock().await;
        let message = match tokio::time::timeout(POLL_TIMEOUT, subscriber.next()).await {
            Ok(Some(msg)) => msg,
            Ok(None) => anyhow::bail!("inbound_requests subscription closed"),
            Err(_) => return Ok(None),
        };
        drop(subscriber);

        match parse_inbound(&message.payload) {
            ParsedInbound::Valid(request) => Ok(Some(request)),
            ParsedInbound::Invalid { origin } => {
                if let Some(origin) = origin {
                    let response = invalid_request_response(None, "malformed inbound request");
                    self.emit_response(&origin, response).await;
                }
                Ok(None)
            }
        }
    }

    async fn emit_response(&self, origin: &str, response: Response) {
        self.outbox.push(origin, response.clone()).await;
        let subject = self.response_subject(origin);
        match serde_json::to_vec(&response) {
            Ok(payload) => {
                if let Err(e) = self.publish_with_retry(subject, payload).await {
                    tracing::error!(err = %e, origin, "bus_failure: could not publish response");
                }
            }
            Err(e) => tracing::error!(err = %e, "failed to serialize response"),
        }
    }
}

enum ParsedInbound {
    Valid(Request),
    Invalid { origin: Option<String> },
}

fn parse_inbound(payload: &[u8]) -> ParsedInbound {
    let value: serde_json::Value = match serde_json::from_slice(payload) {
        Ok(v) => v,
        Err(_) => return ParsedInbound::Invalid { origin: None },
    };

    let origin = value.get("origin").and_then(|v| v.as_str()).map(str::to_owned);

    match serde_json::from_value::<InboundRequest>(value) {
        Ok(inbound) => ParsedInbound::Valid(Request {
            id: inbound.id,
            origin: inbound.origin,
            payload: inbound.payload,
            priority: inbound.priority.unwrap_or(Priority::Normal),
            scheduled_at: inbound.scheduled_at,
            enqueued_at: epoch_ms(),
            attempts: 0,
            status: RequestStatus::Queued,
            metadata: inbound.metadata,
            timeout_ms: inbound.timeout_ms,
            seq: 0,
        }),
        Err(_) => ParsedInbound::Invalid { origin },
    }
}

fn invalid_request_response(request_id: Option<String>, message: &str) -> Response {
    Response {
        request_id: request_id.unwrap_or_default(),
        success: false,
        output: message.to_owned(),
        error_kind: Some(ErrorKind::InvalidRequest),
        response_time_ms: 0,
        engine_exit_code: None,
        rate_limit_release_at: None,
        timestamp: epoch_ms(),
    }
}

async fn connect_with_retry(url: &str) -> anyhow::Result<async_nats::Client> {
    retry_with_backoff(|| {
        let url = url.to_owned();
        async move {
            async_nats::ConnectOptions::new()
                .retry_on_initial_connect()
                .connect(&url)
                .await
                .map_err(anyhow::Error::from)
        }
    })
    .await
}

/// Retry `f` up to [`MAX_RETRY_ATTEMPTS`] times with exponential backoff
/// (capped at [`MAX_BACKOFF`]) plus jitter, surfacing the last error as a
/// `bus_failure` once attempts are exhausted.
async fn retry_with_backoff<F, Fut, T>(mut f: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= MAX_RETRY_ATTEMPTS {
                    return Err(anyhow::anyhow!("bus_failure after {attempt} attempts: {e}"));
                }
                let base = Duration::from_millis(100 * 2u64.pow(attempt));
                let capped = base.min(MAX_BACKOFF);
                let jitter_ms = rand::rng().random_range(0..50);
                tokio::time::sleep(capped + Duration::from_millis(jitter_ms)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_inbound_accepts_minimal_valid_payload() {
        let payload = br#"{"id":"r1","origin":"agent-a","payload":"hi"}"#;
        match parse_inbound(payload) {
            ParsedInbound::Valid(request) => {
                assert_eq!(request.id, "r1");
                assert_eq!(request.origin, "agent-a");
                assert_eq!(request.priority, Priority::Normal);
            }
            ParsedInbound::Invalid { .. } => panic!("expected a valid request"),
        }
    }

    #[test]
    fn parse_inbound_rejects_missing_payload_but_recovers_origin() {
        let payload = br#"{"id":"r1","origin":"agent-a"}"#;
        match parse_inbound(payload) {
            ParsedInbound::Invalid { origin } => assert_eq!(origin.as_deref(), Some("agent-a")),
            ParsedInbound::Valid(_) => panic!("expected rejection"),
        }
    }

    #[test]
    fn parse_inbound_rejects_non_json() {
        match parse_inbound(b"not json") {
            ParsedInbound::Invalid { origin } => assert!(origin.is_none()),
            ParsedInbound::Valid(_) => panic!("expected rejection"),
        }
    }
}
