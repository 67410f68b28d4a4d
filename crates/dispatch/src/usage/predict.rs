// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Least-squares trend prediction over recent per-minute usage snapshots.

use serde::Serialize;

use super::monitor::WindowCounters;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Stable,
    Decreasing,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Prediction {
    NoPrediction,
    Available {
        extrapolated_requests_per_minute: f64,
        projected_total_requests: f64,
        confidence: f64,
        trend: Trend,
    },
}

/// Slope dead-band below which the trend is reported as `stable`, in
/// requests/minute per minute.
const TREND_DEAD_BAND: f64 = 0.05;

/// Fit `requests` (per-window counts, oldest first) against minute index and
/// extrapolate `minutes_ahead` past the last observed window.
pub fn predict(history: &[WindowCounters], minutes_ahead: f64) -> Prediction {
    if history.len() < 2 {
        return Prediction::NoPrediction;
    }

    let xs: Vec<f64> = (0..history.len()).map(|i| i as f64).collect();
    let ys: Vec<f64> = history.iter().map(|w| w.requests as f64).collect();

    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()) {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x).powi(2);
    }

    let slope = if var_x > 0.0 { cov / var_x } else { 0.0 };
    let intercept = mean_y - slope * mean_x;

    let last_x = xs.len() as f64 - 1.0;
    let extrapolated = (intercept + slope * (last_x + minutes_ahead)).max(0.0);

    let variance = ys.iter().map(|y| (y - mean_y).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();
    let coefficient_of_variation = if mean_y.abs() > f64::EPSILON { std_dev / mean_y } else { 0.0 };
    let confidence = 1.0 - coefficient_of_variation.clamp(0.0, 1.0);

    let trend = if slope > TREND_DEAD_BAND {
        Trend::Increasing
    } else if slope < -TREND_DEAD_BAND {
        Trend::Decreasing
    } else {
        Trend::Stable
    };

    Prediction::Available {
        extrapolated_requests_per_minute: extrapolated,
        projected_total_requests: ys.iter().sum(),
        confidence,
        trend,
    }
}

#[cfg(test)]
#[path = "predict_tests.rs"]
mod tests;
