// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Throttle configuration: a flat, persisted struct mutated by the dispatch
//! loop's rate-limit reaction, the decay-on-success rule, and operator
//! `set_throttle` calls.

use serde::{Deserialize, Serialize};

/// Cap applied to any computed throttle delay, regardless of mode.
pub const MAX_THROTTLE_DELAY_MS: u64 = 5 * 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleMode {
    Fixed,
    Adaptive,
    Exponential,
}

impl ThrottleMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Adaptive => "adaptive",
            Self::Exponential => "exponential",
        }
    }
}

impl std::str::FromStr for ThrottleMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed" => Ok(Self::Fixed),
            "adaptive" => Ok(Self::Adaptive),
            "exponential" => Ok(Self::Exponential),
            other => Err(format!("unknown throttle mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    pub enabled: bool,
    pub mode: ThrottleMode,
    pub base_delay_ms: u64,
    pub attempt_count: u32,
}

impl ThrottleConfig {
    pub fn new(base_delay_ms: u64) -> Self {
        Self { enabled: true, mode: ThrottleMode::Fixed, base_delay_ms, attempt_count: 0 }
    }

    /// `min(base * 2^attempt_count, cap)`, the exponential-mode delay.
    pub fn exponential_delay_ms(&self) -> u64 {
        let scaled = self.base_delay_ms.saturating_mul(1u64 << self.attempt_count.min(20));
        scaled.min(MAX_THROTTLE_DELAY_MS)
    }

    /// Switch into exponential backoff with at least `min_base_delay_ms`,
    /// used when a rate-limit classification is observed.
    pub fn engage_exponential(&mut self, min_base_delay_ms: u64) {
        if self.mode != ThrottleMode::Exponential {
            self.mode = ThrottleMode::Exponential;
            self.base_delay_ms = self.base_delay_ms.max(min_base_delay_ms);
            self.attempt_count = 0;
        } else {
            self.attempt_count = self.attempt_count.saturating_add(1);
        }
        self.enabled = true;
    }

    /// Halve the base delay on a rotation window with zero rate-limit hits,
    /// floored at `floor_delay_ms`. No-op outside exponential mode.
    pub fn decay(&mut self, floor_delay_ms: u64) {
        if self.mode == ThrottleMode::Exponential {
            self.base_delay_ms = (self.base_delay_ms / 2).max(floor_delay_ms);
            if self.base_delay_ms <= floor_delay_ms {
                self.mode = ThrottleMode::Fixed;
                self.attempt_count = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_delay_doubles_per_attempt_and_caps() {
        let mut cfg = ThrottleConfig::new(1_000);
        cfg.mode = ThrottleMode::Exponential;
        assert_eq!(cfg.exponential_delay_ms(), 1_000);
        cfg.attempt_count = 3;
        assert_eq!(cfg.exponential_delay_ms(), 8_000);
        cfg.attempt_count = 20;
        assert_eq!(cfg.exponential_delay_ms(), MAX_THROTTLE_DELAY_MS);
    }

    #[test]
    fn engage_exponential_raises_base_and_resets_attempts_once() {
        let mut cfg = ThrottleConfig::new(1_000);
        cfg.engage_exponential(60_000);
        assert_eq!(cfg.mode, ThrottleMode::Exponential);
        assert_eq!(cfg.base_delay_ms, 60_000);
        assert_eq!(cfg.attempt_count, 0);

        cfg.engage_exponential(60_000);
        assert_eq!(cfg.attempt_count, 1);
    }

    #[test]
    fn decay_halves_and_floors_then_reverts_to_fixed() {
        let mut cfg = ThrottleConfig::new(1_000);
        cfg.engage_exponential(8_000);
        cfg.decay(1_000);
        assert_eq!(cfg.base_delay_ms, 4_000);
        cfg.decay(1_000);
        cfg.decay(1_000);
        assert_eq!(cfg.base_delay_ms, 1_000);
        assert_eq!(cfg.mode, ThrottleMode::Fixed);
    }
}
