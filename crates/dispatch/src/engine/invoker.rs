// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Spawns the Engine as a child process and captures its outcome.

use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::io::{AsyncWriteExt, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Grace period after closing stdin before a forceful kill.
const KILL_GRACE: Duration = Duration::from_secs(10);

/// The raw outcome of one Engine invocation, ready for classification.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed_ms: u64,
}

/// Spawns the configured Engine binary, feeds `payload` on stdin, and waits
/// for it to exit (or for `timeout`/`shutdown` to fire first).
pub struct EngineInvoker {
    command_path: String,
    args: Vec<String>,
}

impl EngineInvoker {
    pub fn new(command_path: String, args: Vec<String>) -> Self {
        Self { command_path, args }
    }

    /// Run one invocation. `shutdown` allows cooperative cancellation (dispatcher
    /// stop / emergency stop) independent of the per-call `timeout`.
    pub async fn invoke(
        &self,
        payload: &str,
        timeout: Duration,
        shutdown: &CancellationToken,
    ) -> anyhow::Result<Invocation> {
        let started = Instant::now();

        let mut child = Command::new(&self.command_path)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn engine: {}", self.command_path))?;

        let mut stdin = child.stdin.take().context("child stdin not piped")?;
        let payload_owned = payload.to_owned();
        let write_task = tokio::spawn(async move {
            let _ = stdin.write_all(payload_owned.as_bytes()).await;
            let _ = stdin.shutdown().await;
        });

        let mut stdout_pipe = child.stdout.take().context("child stdout not piped")?;
        let mut stderr_pipe = child.stderr.take().context("child stderr not piped")?;
        let stdout_task =
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stdout_pipe.read_to_string(&mut buf).await;
                buf
            });
        let stderr_task =
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr_pipe.read_to_string(&mut buf).await;
                buf
            });

        let wait_result = tokio::select! {
            status = child.wait() => WaitOutcome::Exited(status),
            _ = tokio::time::sleep(timeout) => WaitOutcome::TimedOut,
            _ = shutdown.cancelled() => WaitOutcome::Cancelled,
        };

        let exit_code = match wait_result {
            WaitOutcome::Exited(status) => status.ok().and_then(|s| s.code()),
            WaitOutcome::TimedOut | WaitOutcome::Cancelled => {
                terminate(&mut child).await;
                None
            }
        };

        let _ = write_task.await;
        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        let invocation = Invocation {
            exit_code,
            stdout,
            stderr,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        match wait_result {
            WaitOutcome::TimedOut => {
                anyhow::bail!(EngineTimeout(invocation));
            }
            WaitOutcome::Cancelled => {
                anyhow::bail!("engine invocation cancelled by shutdown");
            }
            WaitOutcome::Exited(_) => Ok(invocation),
        }
    }
}

enum WaitOutcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Give the child a grace period to exit on its own (stdin is already closed,
/// which is the Engine's cue to wind down) before force-killing it.
async fn terminate(child: &mut tokio::process::Child) {
    tokio::select! {
        _ = tokio::time::sleep(KILL_GRACE) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        _ = child.wait() => {}
    }
}

/// Marker error carrying the partial invocation so callers can still report
/// captured output alongside an `engine_timeout` classification.
#[derive(Debug)]
pub struct EngineTimeout(pub Invocation);

impl std::fmt::Display for EngineTimeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "engine invocation timed out after {}ms", self.0.elapsed_ms)
    }
}

impl std::error::Error for EngineTimeout {}

#[cfg(test)]
#[path = "invoker_tests.rs"]
mod tests;
