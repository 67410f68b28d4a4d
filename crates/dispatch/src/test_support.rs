// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: an in-memory `BusAdapter` double so the
//! Dispatcher's scenario tests don't need a running NATS server.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::Mutex;

use crate::bus::BusAdapter;
use crate::model::Response;

/// An in-process stand-in for [`crate::bus::NatsBusAdapter`]: requests are
/// pushed directly onto an inbound queue (rather than arriving over NATS),
/// and emitted responses are collected per-origin for assertions.
///
/// `poll_request` sleeps briefly when the inbound queue is empty, mirroring
/// the real adapter's short-timeout blocking recv rather than busy-spinning.
#[derive(Default)]
pub struct InMemoryBusAdapter {
    inbound: Mutex<VecDeque<crate::model::Request>>,
    responses: Mutex<HashMap<String, Vec<Response>>>,
}

impl InMemoryBusAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a request directly onto the inbound queue, as if it had just
    /// arrived on `inbound_requests`.
    pub async fn push_request(&self, request: crate::model::Request) {
        self.inbound.lock().await.push_back(request);
    }

    /// All responses emitted for `origin` so far, oldest first.
    pub async fn responses_for(&self, origin: &str) -> Vec<Response> {
        self.responses.lock().await.get(origin).cloned().unwrap_or_default()
    }
}

/// Adapts any `Display`-able error into `anyhow::Error`, so test code that
/// wants `?` on non-`anyhow` fallible calls (e.g. header parsing) doesn't
/// have to reach for `unwrap`/`expect`.
pub trait AnyhowExt<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Display> AnyhowExt<T> for Result<T, E> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e}"))
    }
}

impl BusAdapter for InMemoryBusAdapter {
    async fn poll_request(&self) -> anyhow::Result<Option<crate::model::Request>> {
        let mut inbound = self.inbound.lock().await;
        match inbound.pop_front() {
            Some(request) => Ok(Some(request)),
            None => {
                drop(inbound);
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(None)
            }
        }
    }

    async fn emit_response(&self, origin: &str, response: Response) {
        self.responses.lock().await.entry(origin.to_owned()).or_default().push(response);
    }
}
