// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

use super::{Config, LogFormat};

fn parse(args: &[&str]) -> Config {
    Config::parse_from(args)
}

#[test]
fn defaults_are_correct() {
    let config = parse(&["dispatchd"]);
    assert_eq!(config.host, "127.0.0.1");
    assert_eq!(config.port, 8900);
    assert_eq!(config.auth_token, None);
    assert_eq!(config.nats_url, "nats://127.0.0.1:4222");
    assert_eq!(config.bus_subject_prefix, "dispatch");
    assert_eq!(config.max_concurrent_requests, 5);
    assert_eq!(config.queue_max_size, 1000);
    assert_eq!(config.requests_per_minute, 50);
    assert_eq!(config.tokens_per_minute, 40_000);
    assert!(config.auto_optimize_enabled);
    assert_eq!(config.log_format, LogFormat::Text);
    assert_eq!(config.engine_command_path, "engine");
    assert!(config.engine_args.is_empty());
}

#[test]
fn cli_flags_override_defaults() {
    let config = parse(&[
        "dispatchd",
        "--port",
        "9100",
        "--auth-token",
        "topsecret",
        "--max-concurrent-requests",
        "12",
        "--log-format",
        "json",
    ]);
    assert_eq!(config.port, 9100);
    assert_eq!(config.auth_token.as_deref(), Some("topsecret"));
    assert_eq!(config.max_concurrent_requests, 12);
    assert_eq!(config.log_format, LogFormat::Json);
}

#[test]
fn engine_args_split_on_whitespace() {
    let config = parse(&["dispatchd", "--engine-args", "--model fast --quiet"]);
    assert_eq!(config.engine_args, vec!["--model", "fast", "--quiet"]);
}

#[test]
fn derived_durations_match_millisecond_fields() {
    let config = parse(&["dispatchd", "--engine-timeout-ms", "45000"]);
    assert_eq!(config.engine_timeout(), std::time::Duration::from_millis(45_000));
    assert_eq!(config.scheduler_interval(), std::time::Duration::from_millis(config.queue_scheduler_interval_ms));
    assert_eq!(config.usage_window(), std::time::Duration::from_millis(config.usage_window_ms));
    assert_eq!(
        config.session_probe_interval(),
        std::time::Duration::from_millis(config.session_probe_interval_ms)
    );
}

#[test]
fn state_dir_defaults_to_a_per_process_temp_directory() {
    let config = parse(&["dispatchd"]);
    let dir = config.state_dir();
    assert!(dir.ends_with(std::process::id().to_string()));
}

#[test]
fn state_dir_honors_explicit_override() {
    let config = parse(&["dispatchd", "--state-dir", "/var/lib/dispatchd"]);
    assert_eq!(config.state_dir(), std::path::PathBuf::from("/var/lib/dispatchd"));
}

#[test]
fn rate_limit_caps_mirror_the_configured_thresholds() {
    let config = parse(&[
        "dispatchd",
        "--tokens-per-minute",
        "1000",
        "--requests-per-minute",
        "10",
        "--warning-threshold-medium",
        "75",
    ]);
    let caps = config.rate_limit_caps();
    assert_eq!(caps.tokens_per_minute, 1000);
    assert_eq!(caps.requests_per_minute, 10);
    assert_eq!(caps.warning_thresholds.day_pct, 75);
    assert_eq!(caps.warning_thresholds.month_pct, 75);
    assert_eq!(
        caps.warning_thresholds.minute_pcts,
        [
            config.warning_threshold_immediate,
            config.warning_threshold_short,
            75,
            config.warning_threshold_long,
        ]
    );
}
