// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn success(agent: &str) -> RecordOutcome<'_> {
    RecordOutcome {
        agent,
        success: true,
        rate_limited: false,
        response_time_ms: 100,
        error_kind: None,
        error_message: None,
    }
}

fn failure<'a>(agent: &'a str, kind: ErrorKind, message: &'a str) -> RecordOutcome<'a> {
    RecordOutcome {
        agent,
        success: false,
        rate_limited: false,
        response_time_ms: 50,
        error_kind: Some(kind),
        error_message: Some(message),
    }
}

#[tokio::test]
async fn records_accumulate_current_window() {
    let monitor = UsageMonitor::new(1440, 50, 0.8, None);
    monitor.record(success("agent-a")).await;
    monitor.record(success("agent-a")).await;
    monitor.record(failure("agent-b", ErrorKind::EngineTimeout, "boom")).await;

    let current = monitor.current().await;
    assert_eq!(current.requests, 3);
    assert_eq!(current.successes, 2);
    assert_eq!(current.errors, 1);
    assert_eq!(current.response_time_ms_total, 250);
}

#[tokio::test]
async fn agent_stats_track_per_agent_errors_bounded() {
    let monitor = UsageMonitor::new(1440, 1000, 0.8, None);
    for i in 0..15 {
        monitor
            .record(failure("agent-a", ErrorKind::EngineTransient, &format!("err-{i}")))
            .await;
    }

    let stats = monitor.agent_stats().await;
    let agent = stats.iter().find(|s| s.agent == "agent-a").expect("agent present");
    assert_eq!(agent.errors, 15);
    assert_eq!(agent.last_errors.len(), 10);
    assert_eq!(agent.last_errors.back().unwrap().message, "err-14");
    assert_eq!(agent.last_errors.front().unwrap().message, "err-5");
}

#[tokio::test]
async fn threshold_crossing_latches_once() {
    let monitor = UsageMonitor::new(1440, 2, 0.5, None);
    assert!(!monitor.record(success("a")).await);
    // Second request crosses 0.5 * 2 = 1 request threshold... use cap=2, ratio 1/2=0.5 first call.
    let crossed_second = monitor.record(success("a")).await;
    assert!(crossed_second);
    // Third call: already latched, should not re-fire.
    assert!(!monitor.record(success("a")).await);
}

#[tokio::test]
async fn rotate_moves_current_into_history_and_resets() {
    let monitor = UsageMonitor::new(3, 50, 0.8, None);
    monitor.record(success("a")).await;
    monitor.rotate().await;

    let history = monitor.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].requests, 1);
    assert_eq!(monitor.current().await.requests, 0);
}

#[tokio::test]
async fn rotate_evicts_oldest_beyond_history_size() {
    let monitor = UsageMonitor::new(2, 50, 0.8, None);
    for _ in 0..3 {
        monitor.record(success("a")).await;
        monitor.rotate().await;
    }
    assert_eq!(monitor.history().await.len(), 2);
}
