// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn window(requests: u64) -> WindowCounters {
    WindowCounters { requests, ..Default::default() }
}

#[test]
fn fewer_than_two_points_yields_no_prediction() {
    assert!(matches!(predict(&[], 5.0), Prediction::NoPrediction));
    assert!(matches!(predict(&[window(3)], 5.0), Prediction::NoPrediction));
}

#[test]
fn rising_counts_predict_increasing_trend() {
    let history: Vec<WindowCounters> = (1..=10).map(|n| window(n * 2)).collect();
    match predict(&history, 1.0) {
        Prediction::Available { trend, extrapolated_requests_per_minute, .. } => {
            assert_eq!(trend, Trend::Increasing);
            assert!(extrapolated_requests_per_minute > 20.0);
        }
        Prediction::NoPrediction => panic!("expected a prediction"),
    }
}

#[test]
fn falling_counts_predict_decreasing_trend() {
    let history: Vec<WindowCounters> = (0..10).map(|n| window(100 - n * 5)).collect();
    match predict(&history, 1.0) {
        Prediction::Available { trend, .. } => assert_eq!(trend, Trend::Decreasing),
        Prediction::NoPrediction => panic!("expected a prediction"),
    }
}

#[test]
fn flat_counts_predict_stable_trend_with_high_confidence() {
    let history: Vec<WindowCounters> = (0..10).map(|_| window(10)).collect();
    match predict(&history, 1.0) {
        Prediction::Available { trend, confidence, .. } => {
            assert_eq!(trend, Trend::Stable);
            assert!(confidence > 0.99);
        }
        Prediction::NoPrediction => panic!("expected a prediction"),
    }
}

#[test]
fn noisy_counts_reduce_confidence() {
    let history: Vec<WindowCounters> =
        vec![window(10), window(50), window(5), window(60), window(2), window(70)];
    match predict(&history, 1.0) {
        Prediction::Available { confidence, .. } => assert!(confidence < 0.8),
        Prediction::NoPrediction => panic!("expected a prediction"),
    }
}
