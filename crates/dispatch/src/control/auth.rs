// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::bus::{BusAdapter, NotificationSink};
use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;

/// Constant-time string comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Validate a Bearer token from HTTP headers.
pub fn validate_bearer(headers: &HeaderMap, expected: Option<&str>) -> Result<(), DispatchError> {
    let expected = match expected {
        Some(tok) => tok,
        None => return Ok(()),
    };

    let header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(DispatchError::Unauthorized)?;

    let token = header.strip_prefix("Bearer ").ok_or(DispatchError::Unauthorized)?;
    if constant_time_eq(token, expected) {
        Ok(())
    } else {
        Err(DispatchError::Unauthorized)
    }
}

/// Axum middleware that enforces Bearer token authentication. Exempt:
/// `/api/v1/health` and `/metrics`, so external liveness/scrape probes
/// don't need the token.
pub async fn auth_layer<B: BusAdapter + 'static, S: NotificationSink + 'static>(
    state: State<Arc<Dispatcher<B, S>>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();

    if path == "/api/v1/health" || path == "/metrics" {
        return next.run(req).await;
    }

    if let Err(err) = validate_bearer(req.headers(), state.config().auth_token.as_deref()) {
        return err.into_response();
    }

    next.run(req).await
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
