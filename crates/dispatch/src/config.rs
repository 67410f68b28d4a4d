// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the dispatch service.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "dispatchd", version)]
pub struct Config {
    /// Host to bind the control surface on.
    #[arg(long, default_value = "127.0.0.1", env = "DISPATCH_HOST")]
    pub host: String,

    /// Port to bind the control surface on.
    #[arg(long, default_value_t = 8900, env = "DISPATCH_PORT")]
    pub port: u16,

    /// Bearer token for the control surface. If unset, auth is disabled.
    #[arg(long, env = "DISPATCH_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// NATS server URL for the bus adapter.
    #[arg(long, default_value = "nats://127.0.0.1:4222", env = "DISPATCH_NATS_URL")]
    pub nats_url: String,

    /// Subject prefix for bus subjects (`<prefix>.inbound_requests`,
    /// `<prefix>.responses.<origin>`, `<prefix>.notifications`). NATS subjects
    /// are dot-hierarchies, so this prefix stands in for the wire spec's bare
    /// `inbound_requests`/`responses:<origin>` names.
    #[arg(long, default_value = "dispatch", env = "DISPATCH_BUS_SUBJECT_PREFIX")]
    pub bus_subject_prefix: String,

    /// Directory for snapshot persistence (queues.json, state.json, stats.json, session.json).
    #[arg(long, env = "DISPATCH_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Maximum number of concurrent Engine invocations.
    #[arg(long, default_value_t = 5, env = "DISPATCH_MAX_CONCURRENT")]
    pub max_concurrent_requests: usize,

    /// Maximum total queued requests across all priority classes.
    #[arg(long, default_value_t = 1000, env = "DISPATCH_QUEUE_MAX_SIZE")]
    pub queue_max_size: usize,

    /// Interval between scheduled -> priority promotion sweeps, in ms.
    #[arg(long, default_value_t = 10_000, env = "DISPATCH_SCHEDULER_INTERVAL_MS")]
    pub queue_scheduler_interval_ms: u64,

    /// Default throttle delay in ms when throttle mode is `fixed`.
    #[arg(long, default_value_t = 1000, env = "DISPATCH_THROTTLE_DELAY_MS")]
    pub throttle_default_delay_ms: u64,

    /// Usage window length in ms (rotation period).
    #[arg(long, default_value_t = 60_000, env = "DISPATCH_USAGE_WINDOW_MS")]
    pub usage_window_ms: u64,

    /// Number of rotated usage snapshots retained (default 24h at 1/minute).
    #[arg(long, default_value_t = 1440, env = "DISPATCH_USAGE_HISTORY_SIZE")]
    pub usage_history_size: usize,

    /// Fraction of the per-minute request cap that triggers a threshold-crossed alert.
    #[arg(long, default_value_t = 0.8, env = "DISPATCH_USAGE_ALERT_THRESHOLD")]
    pub usage_alert_threshold_ratio: f64,

    /// Token cap per minute.
    #[arg(long, default_value_t = 40_000, env = "DISPATCH_TOKENS_PER_MINUTE")]
    pub tokens_per_minute: u64,

    /// Request cap per minute.
    #[arg(long, default_value_t = 50, env = "DISPATCH_REQUESTS_PER_MINUTE")]
    pub requests_per_minute: u64,

    /// Token cap per day.
    #[arg(long, default_value_t = 1_000_000, env = "DISPATCH_TOKENS_PER_DAY")]
    pub tokens_per_day: u64,

    /// Token cap per month.
    #[arg(long, default_value_t = 20_000_000, env = "DISPATCH_TOKENS_PER_MONTH")]
    pub tokens_per_month: u64,

    /// Minute-window utilization percentage (0-100) that latches the lightest warning.
    #[arg(long, default_value_t = 60, env = "DISPATCH_WARNING_THRESHOLD_IMMEDIATE")]
    pub warning_threshold_immediate: u8,

    /// Minute-window utilization percentage (0-100) for the next warning tier.
    #[arg(long, default_value_t = 70, env = "DISPATCH_WARNING_THRESHOLD_SHORT")]
    pub warning_threshold_short: u8,

    /// Minute-window (and day/month) utilization percentage for the elevated tier.
    #[arg(long, default_value_t = 80, env = "DISPATCH_WARNING_THRESHOLD_MEDIUM")]
    pub warning_threshold_medium: u8,

    /// Minute-window utilization percentage for the most urgent tier.
    #[arg(long, default_value_t = 90, env = "DISPATCH_WARNING_THRESHOLD_LONG")]
    pub warning_threshold_long: u8,

    /// Characters-per-token divisor used to estimate token usage from text length.
    #[arg(long, default_value_t = 4.0, env = "DISPATCH_CHARS_PER_TOKEN")]
    pub chars_per_token: f64,

    /// Wall-clock timeout for a single Engine invocation, in ms.
    #[arg(long, default_value_t = 300_000, env = "DISPATCH_ENGINE_TIMEOUT_MS")]
    pub engine_timeout_ms: u64,

    /// Path (or bare name resolved via $PATH) to the Engine executable.
    #[arg(long, default_value = "engine", env = "DISPATCH_ENGINE_COMMAND")]
    pub engine_command_path: String,

    /// Extra arguments passed to the Engine on every invocation.
    #[arg(long, env = "DISPATCH_ENGINE_ARGS", value_delimiter = ' ')]
    pub engine_args: Vec<String>,

    /// Session probe interval while blocked, in ms.
    #[arg(long, default_value_t = 300_000, env = "DISPATCH_SESSION_PROBE_INTERVAL_MS")]
    pub session_probe_interval_ms: u64,

    /// Enable periodic auto-optimization of concurrency and throttle base.
    #[arg(long, default_value_t = true, env = "DISPATCH_AUTO_OPTIMIZE")]
    pub auto_optimize_enabled: bool,

    /// Log level filter (passed to `tracing_subscriber::EnvFilter` when `RUST_LOG` is unset).
    #[arg(long, default_value = "info", env = "DISPATCH_LOG_LEVEL")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "DISPATCH_LOG_FORMAT")]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

impl Config {
    pub fn engine_timeout(&self) -> Duration {
        Duration::from_millis(self.engine_timeout_ms)
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_millis(self.queue_scheduler_interval_ms)
    }

    pub fn usage_window(&self) -> Duration {
        Duration::from_millis(self.usage_window_ms)
    }

    pub fn session_probe_interval(&self) -> Duration {
        Duration::from_millis(self.session_probe_interval_ms)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            std::env::temp_dir().join("dispatchd").join(std::process::id().to_string())
        })
    }

    pub fn rate_limit_caps(&self) -> crate::ratelimit::RateLimitCaps {
        crate::ratelimit::RateLimitCaps {
            tokens_per_minute: self.tokens_per_minute,
            requests_per_minute: self.requests_per_minute,
            tokens_per_day: self.tokens_per_day,
            tokens_per_month: self.tokens_per_month,
            warning_thresholds: crate::ratelimit::WarningThresholds {
                minute_pcts: [
                    self.warning_threshold_immediate,
                    self.warning_threshold_short,
                    self.warning_threshold_medium,
                    self.warning_threshold_long,
                ],
                day_pct: self.warning_threshold_medium,
                month_pct: self.warning_threshold_medium,
            },
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
