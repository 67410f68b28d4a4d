// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::ErrorKind;

/// Error codes for the dispatch control surface and bus responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchError {
    InvalidRequest,
    QueueFull,
    EngineTimeout,
    EngineTransient,
    RateLimit,
    SessionExpiry,
    BusFailure,
    PersistenceFailure,
    NotFound,
    Unauthorized,
    BadRequest,
    Internal,
}

impl DispatchError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest | Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::NotFound => 404,
            Self::QueueFull => 429,
            Self::EngineTimeout | Self::EngineTransient | Self::RateLimit | Self::SessionExpiry => {
                502
            }
            Self::BusFailure | Self::PersistenceFailure | Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::QueueFull => "QUEUE_FULL",
            Self::EngineTimeout => "ENGINE_TIMEOUT",
            Self::EngineTransient => "ENGINE_TRANSIENT",
            Self::RateLimit => "RATE_LIMIT",
            Self::SessionExpiry => "SESSION_EXPIRY",
            Self::BusFailure => "BUS_FAILURE",
            Self::PersistenceFailure => "PERSISTENCE_FAILURE",
            Self::NotFound => "NOT_FOUND",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::BadRequest => "BAD_REQUEST",
            Self::Internal => "INTERNAL",
        }
    }

    /// The wire `error_kind` this maps to on a bus response, if any.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::InvalidRequest => Some(ErrorKind::InvalidRequest),
            Self::QueueFull => Some(ErrorKind::QueueFull),
            Self::EngineTimeout => Some(ErrorKind::EngineTimeout),
            Self::EngineTransient => Some(ErrorKind::EngineTransient),
            Self::RateLimit => Some(ErrorKind::RateLimit),
            Self::SessionExpiry => Some(ErrorKind::SessionExpiry),
            Self::BusFailure => Some(ErrorKind::BusFailure),
            Self::PersistenceFailure => Some(ErrorKind::PersistenceFailure),
            Self::NotFound | Self::Unauthorized | Self::BadRequest | Self::Internal => None,
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for DispatchError {}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl axum::response::IntoResponse for DispatchError {
    fn into_response(self) -> axum::response::Response {
        self.to_http_response(self.as_str()).into_response()
    }
}
