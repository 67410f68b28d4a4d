// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn sh(script: &str) -> EngineInvoker {
    EngineInvoker::new("/bin/sh".to_owned(), vec!["-c".to_owned(), script.to_owned()])
}

#[tokio::test]
async fn captures_stdout_and_exit_code() {
    let invoker = sh("cat; exit 0");
    let shutdown = CancellationToken::new();
    let result = invoker
        .invoke("hello engine", Duration::from_secs(5), &shutdown)
        .await
        .expect("invocation succeeds");

    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.stdout, "hello engine");
}

#[tokio::test]
async fn captures_nonzero_exit_and_stderr() {
    let invoker = sh("echo boom 1>&2; exit 3");
    let shutdown = CancellationToken::new();
    let result = invoker
        .invoke("", Duration::from_secs(5), &shutdown)
        .await
        .expect("invocation succeeds");

    assert_eq!(result.exit_code, Some(3));
    assert_eq!(result.stderr.trim(), "boom");
}

#[tokio::test]
async fn timeout_kills_child_and_returns_timeout_error() {
    let invoker = sh("sleep 30");
    let shutdown = CancellationToken::new();
    let err = invoker
        .invoke("", Duration::from_millis(100), &shutdown)
        .await
        .expect_err("should time out");

    let timeout = err.downcast::<EngineTimeout>().expect("timeout error");
    assert!(timeout.0.elapsed_ms < 5000);
}

#[tokio::test]
async fn shutdown_cancels_in_flight_invocation() {
    let invoker = sh("sleep 30");
    let shutdown = CancellationToken::new();
    let shutdown_clone = shutdown.clone();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_clone.cancel();
    });

    let err = invoker
        .invoke("", Duration::from_secs(30), &shutdown)
        .await
        .expect_err("should be cancelled");
    assert!(err.to_string().contains("cancelled"));
}
