// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pure classification of Engine output into a failure mode.
//!
//! Order is significant: rate-limit patterns are checked before session-expiry
//! patterns because a rate-limit message can incidentally contain text that
//! would otherwise match a session pattern.

use std::sync::LazyLock;

use regex::Regex;

/// `None` only if the literal pattern below fails to compile, which
/// `classifier_tests.rs`'s `rate_limit_pattern_compiles` guards against.
static RATE_LIMIT_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"usage limit reached\|(\d+)").ok());

const SESSION_EXPIRY_MARKERS: &[&str] =
    &["Invalid API key", "Please run /login", "API Login Failure"];

/// Classification of one Engine invocation's outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Success,
    RateLimit { release_at: u64 },
    SessionExpiry,
    NetworkError,
    FatalEngineError,
}

/// Classify an Engine invocation from its exit code and captured output.
///
/// First match wins, in the order documented in the type's module doc.
pub fn classify(exit_code: Option<i32>, stdout: &str, stderr: &str) -> Classification {
    let combined = CombinedOutput { stdout, stderr };

    if let Some(release_at) = combined.find_rate_limit() {
        return Classification::RateLimit { release_at };
    }

    if combined.contains_any(SESSION_EXPIRY_MARKERS) {
        return Classification::SessionExpiry;
    }

    let exit_nonzero = exit_code != Some(0);
    if exit_nonzero && combined.contains_any_ci(&["timeout", "network"]) {
        return Classification::NetworkError;
    }

    if exit_nonzero {
        return Classification::FatalEngineError;
    }

    Classification::Success
}

struct CombinedOutput<'a> {
    stdout: &'a str,
    stderr: &'a str,
}

impl<'a> CombinedOutput<'a> {
    fn find_rate_limit(&self) -> Option<u64> {
        let re = RATE_LIMIT_RE.as_ref()?;
        for text in [self.stdout, self.stderr] {
            if let Some(caps) = re.captures(text) {
                if let Some(m) = caps.get(1) {
                    if let Ok(ts) = m.as_str().parse::<u64>() {
                        return Some(ts);
                    }
                }
            }
        }
        None
    }

    fn contains_any(&self, markers: &[&str]) -> bool {
        markers.iter().any(|m| self.stdout.contains(m) || self.stderr.contains(m))
    }

    fn contains_any_ci(&self, markers: &[&str]) -> bool {
        let stdout_lower = self.stdout.to_lowercase();
        let stderr_lower = self.stderr.to_lowercase();
        markers.iter().any(|m| stdout_lower.contains(m) || stderr_lower.contains(m))
    }
}

#[cfg(test)]
#[path = "classifier_tests.rs"]
mod tests;
