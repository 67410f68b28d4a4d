// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Prometheus text-exposition renderer for `GET /metrics`.
//!
//! There's no scrape endpoint anywhere upstream to imitate, so this is
//! hand-rolled directly against the exposition format rather than
//! adapted from an existing handler.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::bus::{BusAdapter, NotificationSink};
use crate::dispatcher::Dispatcher;
use crate::model::Priority;
use crate::session::SessionState;

pub async fn render_metrics<B: BusAdapter + 'static, S: NotificationSink + 'static>(
    d: &Arc<Dispatcher<B, S>>,
) -> String {
    let mut out = String::new();

    let status = d.queue().status().await;
    gauge(&mut out, "dispatch_queue_depth", "Requests queued by priority class.", |out| {
        for (priority, class) in [
            (Priority::Urgent, &status.urgent),
            (Priority::High, &status.high),
            (Priority::Normal, &status.normal),
            (Priority::Low, &status.low),
        ] {
            let _ = writeln!(
                out,
                "dispatch_queue_depth{{priority=\"{priority}\"}} {}",
                class.size
            );
        }
    });
    let _ = writeln!(out, "# TYPE dispatch_queue_scheduled_depth gauge");
    let _ = writeln!(out, "dispatch_queue_scheduled_depth {}", status.scheduled.size);
    let _ = writeln!(out, "# TYPE dispatch_queue_paused gauge");
    let _ = writeln!(out, "dispatch_queue_paused {}", bool_val(status.paused));

    let usage = d.usage().current().await;
    let _ = writeln!(out, "# TYPE dispatch_usage_requests_total counter");
    let _ = writeln!(out, "dispatch_usage_requests_total {}", usage.requests);
    let _ = writeln!(out, "# TYPE dispatch_usage_successes_total counter");
    let _ = writeln!(out, "dispatch_usage_successes_total {}", usage.successes);
    let _ = writeln!(out, "# TYPE dispatch_usage_errors_total counter");
    let _ = writeln!(out, "dispatch_usage_errors_total {}", usage.errors);
    let _ = writeln!(out, "# TYPE dispatch_usage_rate_limit_hits_total counter");
    let _ = writeln!(out, "dispatch_usage_rate_limit_hits_total {}", usage.rate_limit_hits);
    let _ = writeln!(out, "# TYPE dispatch_usage_avg_response_ms gauge");
    let _ = writeln!(out, "dispatch_usage_avg_response_ms {}", usage.average_response_time_ms());

    let rl = d.rate_limit().snapshot().await;
    let _ = writeln!(out, "# TYPE dispatch_rate_limit_tokens_used gauge");
    let _ = writeln!(
        out,
        "dispatch_rate_limit_tokens_used{{window=\"minute\"}} {}",
        rl.minute.tokens_used
    );
    let _ = writeln!(
        out,
        "dispatch_rate_limit_tokens_used{{window=\"day\"}} {}",
        rl.day.tokens_used
    );
    let _ = writeln!(
        out,
        "dispatch_rate_limit_tokens_used{{window=\"month\"}} {}",
        rl.month.tokens_used
    );
    let advisory = d.rate_limit().advisory().await;
    let _ = writeln!(out, "# TYPE dispatch_rate_limit_utilization gauge");
    let _ = writeln!(out, "dispatch_rate_limit_utilization {}", advisory.utilization);

    let _ = writeln!(out, "# TYPE dispatch_session_ok gauge");
    let session_state = d.session().state().await;
    let _ = writeln!(out, "dispatch_session_ok {}", bool_val(session_state == SessionState::Ok));

    let _ = writeln!(out, "# TYPE dispatch_concurrency gauge");
    let _ = writeln!(out, "dispatch_concurrency {}", d.concurrency());
    let _ = writeln!(out, "# TYPE dispatch_emergency_stopped gauge");
    let _ = writeln!(out, "dispatch_emergency_stopped {}", bool_val(d.emergency_stopped()));

    out
}

fn gauge(out: &mut String, name: &str, help: &str, body: impl FnOnce(&mut String)) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
    body(out);
}

fn bool_val(b: bool) -> u8 {
    b as u8
}
