// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn exit_zero_is_success() {
    assert_eq!(classify(Some(0), "done", ""), Classification::Success);
}

#[test]
fn detects_rate_limit_with_timestamp() {
    let result = classify(Some(1), "Claude AI usage limit reached|1735689600", "");
    assert_eq!(result, Classification::RateLimit { release_at: 1735689600 });
}

#[test]
fn rate_limit_takes_precedence_over_session_markers() {
    // Message happens to also contain "Invalid API key" style substring noise.
    let stdout = "Invalid API key rotation in progress; usage limit reached|42";
    assert_eq!(classify(Some(1), stdout, ""), Classification::RateLimit { release_at: 42 });
}

#[test]
fn detects_session_expiry_markers() {
    assert_eq!(classify(Some(1), "Invalid API key", ""), Classification::SessionExpiry);
    assert_eq!(classify(Some(1), "", "Please run /login"), Classification::SessionExpiry);
    assert_eq!(classify(Some(1), "API Login Failure", ""), Classification::SessionExpiry);
}

#[test]
fn detects_network_error_case_insensitive() {
    assert_eq!(classify(Some(1), "", "Network unreachable"), Classification::NetworkError);
    assert_eq!(classify(Some(1), "request TIMEOUT", ""), Classification::NetworkError);
}

#[test]
fn network_markers_on_success_exit_do_not_classify_as_network_error() {
    assert_eq!(classify(Some(0), "no network issues here", ""), Classification::Success);
}

#[test]
fn unmatched_nonzero_exit_is_fatal() {
    assert_eq!(classify(Some(1), "boom", "stack trace"), Classification::FatalEngineError);
}

#[test]
fn missing_exit_code_nonzero_path_is_fatal() {
    assert_eq!(classify(None, "killed", ""), Classification::FatalEngineError);
}

#[test]
fn rate_limit_without_parseable_timestamp_falls_through() {
    // Malformed timestamp suffix - doesn't match \d+, so this isn't a rate-limit hit.
    let result = classify(Some(1), "usage limit reached|soon", "");
    assert_eq!(result, Classification::FatalEngineError);
}

#[test]
fn rate_limit_pattern_compiles() {
    assert!(RATE_LIMIT_RE.is_some(), "the literal rate-limit pattern must compile");
}
