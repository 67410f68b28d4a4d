// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod monitor;
pub mod predict;

pub use monitor::{AgentStats, RecordOutcome, UsageMonitor, UsageSnapshot, WindowCounters};
pub use predict::{predict, Prediction, Trend};
