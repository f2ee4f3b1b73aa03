//! Stop command implementation
//!
//! Starts a worker, asks it to terminate one or more times, and escalates to
//! the forced kill when it does not leave within the grace period.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::{sleep, Instant};
use tracing::info;
use trellis_process::{Escalator, Invocation, StopReport, Supervised};

use crate::child::{ProcessSpec, SupervisedChild};

/// Configuration for the stop command
#[derive(Debug, Clone, Copy)]
pub struct StopOptions {
    pub escalator: Escalator,
    /// Wait after spawning so the worker can install its handlers
    pub settle: Duration,
    /// Graceful requests to send before the kill is considered (at least 1)
    pub signals: u32,
    /// Spacing between graceful requests
    pub interval: Duration,
}

/// Result of stopping a worker
#[derive(Debug, Clone, Serialize)]
pub struct StopRun {
    pub program: String,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    /// The worker exited before the first request was sent
    pub exited_early: bool,
    #[serde(flatten)]
    pub report: StopReport,
}

pub async fn run(spec: &ProcessSpec, invocation: &Invocation, options: &StopOptions) -> Result<StopRun> {
    let mut command = spec.command(invocation);
    command.stdout(Stdio::null()).stderr(Stdio::inherit());
    let child = command
        .spawn()
        .with_context(|| format!("Failed to spawn '{}'", spec.program))?;

    let mut child = SupervisedChild::new(child);
    let started_at = Utc::now();
    info!(program = %spec.program, pid = ?child.pid(), "worker spawned");

    sleep(options.settle).await;
    let exited_early = child.try_exit()?.is_some();

    let started = Instant::now();
    let mut sent = 0;
    for _ in 1..options.signals.max(1) {
        if !child.request_termination()? {
            break;
        }
        sent += 1;
        sleep(options.interval).await;
        if child.try_exit()?.is_some() {
            break;
        }
    }

    // Final request, grace period, and the kill if it comes to that
    let report = options
        .escalator
        .stop_after(&mut child, started, sent)
        .await
        .context("Failed to stop worker")?;

    info!(
        verdict = %report.verdict,
        exit = %report.exit,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "worker stopped"
    );

    Ok(StopRun {
        program: spec.program.clone(),
        pid: child.pid(),
        started_at,
        exited_early,
        report,
    })
}
