// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token/request accounting across minute/day/month windows, with advisory
//! throttle delays and latched utilization warnings.
//!
//! Day and month boundaries are computed in UTC (see [`super::civil`]) to
//! avoid a timezone-database dependency.

use std::collections::VecDeque;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::civil;
use crate::model::{epoch_secs, Severity};

/// How long the trailing per-call ring is kept, for `time_to_limit` slope math.
const TRAILING_HISTORY_SECS: u64 = 24 * 3600;
/// Window used to compute the "current per-minute rate" slope.
const SLOPE_WINDOW_SECS: u64 = 60;

/// Utilization percentages (0-100) that latch a warning on the minute window,
/// plus the single day/month warning threshold. Configurable via
/// `warning_thresholds.{immediate,short,medium,long}` (§6).
#[derive(Debug, Clone, Copy)]
pub struct WarningThresholds {
    /// Ascending minute-window crossings, e.g. `[60, 70, 80, 90]`.
    pub minute_pcts: [u8; 4],
    pub day_pct: u8,
    pub month_pct: u8,
}

impl Default for WarningThresholds {
    fn default() -> Self {
        Self { minute_pcts: [60, 70, 80, 90], day_pct: 80, month_pct: 80 }
    }
}

/// Configured caps per accounting window.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitCaps {
    pub tokens_per_minute: u64,
    pub requests_per_minute: u64,
    pub tokens_per_day: u64,
    pub tokens_per_month: u64,
    pub warning_thresholds: WarningThresholds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    TokensPerMinute,
    RequestsPerMinute,
    TokensPerDay,
    TokensPerMonth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendedAction {
    PauseQueue,
    ReducePriority,
    IncreaseDelay,
    Monitor,
    Normal,
}

impl RecommendedAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PauseQueue => "pause_queue",
            Self::ReducePriority => "reduce_priority",
            Self::IncreaseDelay => "increase_delay",
            Self::Monitor => "monitor",
            Self::Normal => "normal",
        }
    }
}

/// The advisory throttle recommendation derived from current utilization.
#[derive(Debug, Clone, Copy)]
pub struct Advisory {
    pub utilization: f64,
    pub recommended_delay_ms: u64,
    pub recommended_action: RecommendedAction,
}

/// A single utilization-threshold crossing, to be turned into a notification
/// by the caller (the predictor has no notification-sink dependency itself).
#[derive(Debug, Clone, Copy)]
pub struct RateLimitWarning {
    pub kind: LimitKind,
    pub threshold_pct: u8,
    pub severity: Severity,
}

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
pub struct WindowState {
    pub window_start: u64,
    pub tokens_used: u64,
    pub requests_used: u64,
}

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
struct Latches {
    minute_60: bool,
    minute_70: bool,
    minute_80: bool,
    minute_90: bool,
    day_80: bool,
    month_80: bool,
}

/// Durable snapshot of rate-limit accounting state.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub minute: WindowState,
    pub day: WindowState,
    pub month: WindowState,
    pub last_release_at: Option<u64>,
    #[serde(default)]
    latches: Latches,
}

struct Inner {
    minute: WindowState,
    day: WindowState,
    month: WindowState,
    last_release_at: Option<u64>,
    latches: Latches,
    /// Recent `(timestamp, tokens, requests)` samples, newest last, pruned to
    /// `TRAILING_HISTORY_SECS`.
    trailing: VecDeque<(u64, u64, u64)>,
}

/// Tracks rolling minute/day/month usage and derives throttle advice.
pub struct RateLimitPredictor {
    inner: Mutex<Inner>,
    caps: RateLimitCaps,
    snapshot_path: Option<PathBuf>,
}

impl RateLimitPredictor {
    pub fn new(caps: RateLimitCaps, snapshot_path: Option<PathBuf>) -> Self {
        let now = epoch_secs();
        Self {
            inner: Mutex::new(Inner {
                minute: WindowState { window_start: now, ..Default::default() },
                day: WindowState { window_start: now, ..Default::default() },
                month: WindowState { window_start: now, ..Default::default() },
                last_release_at: None,
                latches: Latches::default(),
                trailing: VecDeque::new(),
            }),
            caps,
            snapshot_path,
        }
    }

    pub async fn restore(&self, snapshot: RateLimitSnapshot) {
        let mut inner = self.inner.lock().await;
        inner.minute = snapshot.minute;
        inner.day = snapshot.day;
        inner.month = snapshot.month;
        inner.last_release_at = snapshot.last_release_at;
        inner.latches = snapshot.latches;
    }

    /// Record token/request usage for one invocation, rolling any windows
    /// whose boundary has passed first. Returns newly-crossed warnings.
    pub async fn record(&self, tokens: u64, requests: u64) -> Vec<RateLimitWarning> {
        let mut inner = self.inner.lock().await;
        let now = epoch_secs();
        roll_windows(&mut inner, now);

        inner.minute.tokens_used += tokens;
        inner.minute.requests_used += requests;
        inner.day.tokens_used += tokens;
        inner.month.tokens_used += tokens;

        inner.trailing.push_back((now, tokens, requests));
        while inner.trailing.front().is_some_and(|(ts, _, _)| now.saturating_sub(*ts) > TRAILING_HISTORY_SECS) {
            inner.trailing.pop_front();
        }

        let warnings = self.check_warnings(&mut inner);
        self.persist(&inner).await;
        warnings
    }

    /// Record that the Engine reported a rate-limit release timestamp.
    pub async fn note_release(&self, release_at: u64) {
        let mut inner = self.inner.lock().await;
        inner.last_release_at = Some(release_at);
        self.persist(&inner).await;
    }

    pub async fn last_release_at(&self) -> Option<u64> {
        self.inner.lock().await.last_release_at
    }

    /// Current advisory: utilization, recommended delay, recommended action.
    pub async fn advisory(&self) -> Advisory {
        let mut inner = self.inner.lock().await;
        roll_windows(&mut inner, epoch_secs());
        advisory_for(&inner, self.caps)
    }

    /// Seconds until the named limit would be exhausted at the current
    /// per-minute rate. `+infinity` if the rate is non-positive.
    pub async fn time_to_limit(&self, kind: LimitKind) -> f64 {
        let mut inner = self.inner.lock().await;
        let now = epoch_secs();
        roll_windows(&mut inner, now);

        let (remaining, rate_per_min) = match kind {
            LimitKind::TokensPerMinute => {
                (self.caps.tokens_per_minute.saturating_sub(inner.minute.tokens_used) as f64, tokens_rate(&inner.trailing, now))
            }
            LimitKind::RequestsPerMinute => (
                self.caps.requests_per_minute.saturating_sub(inner.minute.requests_used) as f64,
                requests_rate(&inner.trailing, now),
            ),
            LimitKind::TokensPerDay => {
                (self.caps.tokens_per_day.saturating_sub(inner.day.tokens_used) as f64, tokens_rate(&inner.trailing, now))
            }
            LimitKind::TokensPerMonth => (
                self.caps.tokens_per_month.saturating_sub(inner.month.tokens_used) as f64,
                tokens_rate(&inner.trailing, now),
            ),
        };

        if rate_per_min <= 0.0 {
            f64::INFINITY
        } else {
            remaining * 60.0 / rate_per_min
        }
    }

    pub async fn snapshot(&self) -> RateLimitSnapshot {
        let inner = self.inner.lock().await;
        snapshot_of(&inner)
    }

    fn check_warnings(&self, inner: &mut Inner) -> Vec<RateLimitWarning> {
        let mut warnings = Vec::new();
        let thresholds = self.caps.warning_thresholds;

        let minute_util_tokens = ratio(inner.minute.tokens_used, self.caps.tokens_per_minute);
        let minute_util_requests = ratio(inner.minute.requests_used, self.caps.requests_per_minute);
        let minute_util = minute_util_tokens.max(minute_util_requests);

        let [p60, p70, p80, p90] = thresholds.minute_pcts;
        for (pct, latch) in [
            (p90, &mut inner.latches.minute_90),
            (p80, &mut inner.latches.minute_80),
            (p70, &mut inner.latches.minute_70),
            (p60, &mut inner.latches.minute_60),
        ] {
            latch_threshold(minute_util, pct as f64 / 100.0, latch, LimitKind::TokensPerMinute, pct, &mut warnings);
        }

        let day_util = ratio(inner.day.tokens_used, self.caps.tokens_per_day);
        latch_threshold(
            day_util,
            thresholds.day_pct as f64 / 100.0,
            &mut inner.latches.day_80,
            LimitKind::TokensPerDay,
            thresholds.day_pct,
            &mut warnings,
        );

        let month_util = ratio(inner.month.tokens_used, self.caps.tokens_per_month);
        latch_threshold(
            month_util,
            thresholds.month_pct as f64 / 100.0,
            &mut inner.latches.month_80,
            LimitKind::TokensPerMonth,
            thresholds.month_pct,
            &mut warnings,
        );

        warnings
    }

    async fn persist(&self, inner: &Inner) {
        let Some(ref path) = self.snapshot_path else { return };
        let snapshot = snapshot_of(inner);
        if let Err(e) = crate::persist::save(path, &snapshot) {
            tracing::warn!(err = %e, "failed to persist rate-limit snapshot");
        }
    }
}

fn snapshot_of(inner: &Inner) -> RateLimitSnapshot {
    RateLimitSnapshot {
        minute: inner.minute,
        day: inner.day,
        month: inner.month,
        last_release_at: inner.last_release_at,
        latches: inner.latches,
    }
}

fn ratio(used: u64, cap: u64) -> f64 {
    if cap == 0 {
        0.0
    } else {
        used as f64 / cap as f64
    }
}

/// Only raises a warning the first time `util` rises past `threshold`
/// (the latch); clears the latch once utilization drops back below it.
fn latch_threshold(
    util: f64,
    threshold: f64,
    latch: &mut bool,
    kind: LimitKind,
    threshold_pct: u8,
    warnings: &mut Vec<RateLimitWarning>,
) {
    if util >= threshold {
        if !*latch {
            *latch = true;
            let severity = if threshold_pct >= 90 { Severity::Critical } else { Severity::Warning };
            warnings.push(RateLimitWarning { kind, threshold_pct, severity });
        }
    } else {
        *latch = false;
    }
}

fn roll_windows(inner: &mut Inner, now: u64) {
    if now.saturating_sub(inner.minute.window_start) >= SLOPE_WINDOW_SECS {
        inner.minute = WindowState { window_start: now, ..Default::default() };
        inner.latches.minute_60 = false;
        inner.latches.minute_70 = false;
        inner.latches.minute_80 = false;
        inner.latches.minute_90 = false;
    }

    if civil::days_since_epoch(now) != civil::days_since_epoch(inner.day.window_start) {
        inner.day = WindowState { window_start: now, ..Default::default() };
        inner.latches.day_80 = false;
    }

    if civil::year_month(now) != civil::year_month(inner.month.window_start) {
        inner.month = WindowState { window_start: now, ..Default::default() };
        inner.latches.month_80 = false;
    }
}

fn tokens_rate(trailing: &VecDeque<(u64, u64, u64)>, now: u64) -> f64 {
    trailing
        .iter()
        .filter(|(ts, _, _)| now.saturating_sub(*ts) <= SLOPE_WINDOW_SECS)
        .map(|(_, tokens, _)| *tokens as f64)
        .sum()
}

fn requests_rate(trailing: &VecDeque<(u64, u64, u64)>, now: u64) -> f64 {
    trailing
        .iter()
        .filter(|(ts, _, _)| now.saturating_sub(*ts) <= SLOPE_WINDOW_SECS)
        .map(|(_, _, requests)| *requests as f64)
        .sum()
}

fn advisory_for(inner: &Inner, caps: RateLimitCaps) -> Advisory {
    let util_tokens = ratio(inner.minute.tokens_used, caps.tokens_per_minute);
    let util_requests = ratio(inner.minute.requests_used, caps.requests_per_minute);
    let utilization = util_tokens.max(util_requests);

    let req_cap = caps.requests_per_minute.max(1) as f64;
    let delay_ms = if utilization >= 0.9 {
        ((60_000.0 / req_cap) * 2.0).max(5_000.0) as u64
    } else if utilization >= 0.7 {
        ((60_000.0 / req_cap) * 1.5).max(2_000.0) as u64
    } else if utilization >= 0.5 {
        (60_000.0 / req_cap).max(1_000.0) as u64
    } else {
        500
    };

    let action = if utilization >= 0.9 {
        RecommendedAction::PauseQueue
    } else if utilization >= 0.8 {
        RecommendedAction::ReducePriority
    } else if utilization >= 0.7 {
        RecommendedAction::IncreaseDelay
    } else if utilization >= 0.5 {
        RecommendedAction::Monitor
    } else {
        RecommendedAction::Normal
    };

    Advisory { utilization, recommended_delay_ms: delay_ms, recommended_action: action }
}

#[cfg(test)]
#[path = "predictor_tests.rs"]
mod tests;
