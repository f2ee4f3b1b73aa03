//! Supervisor-side escalation ladder.
//!
//! Ask nicely, wait out the grace period, then use the signal nobody can
//! intercept. The kill is treated as authoritative proof of termination.

use std::fmt;
use std::io;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Default time a worker gets to exit after the graceful request.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Default interval between exit checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Upper bound on waiting for a killed process to be reaped.
pub const KILL_WAIT: Duration = Duration::from_secs(5);

/// How a supervised process ended, as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitKind {
    /// Exited on its own with a status code.
    Exited(i32),
    /// Ended by a signal other than the forced kill.
    Signalled(i32),
    /// Ended by the unmaskable kill.
    Killed,
}

impl ExitKind {
    pub fn is_success(self) -> bool {
        self == ExitKind::Exited(0)
    }
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitKind::Exited(code) => write!(f, "exited with status {}", code),
            ExitKind::Signalled(signo) => write!(f, "ended by signal {}", signo),
            ExitKind::Killed => write!(f, "killed"),
        }
    }
}

/// Anything a supervisor can ask to stop and, failing that, kill.
pub trait Supervised {
    /// Send the maskable termination request.
    /// Returns `Ok(false)` if the target is already gone.
    fn request_termination(&mut self) -> io::Result<bool>;

    /// Send the unmaskable kill. A no-op on a target that already exited.
    fn force_kill(&mut self) -> io::Result<()>;

    /// Non-blocking exit check.
    fn try_exit(&mut self) -> io::Result<Option<ExitKind>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Exited within the grace period.
    Compliant,
    /// Needed the forced kill.
    Escalated,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Compliant => write!(f, "compliant"),
            Verdict::Escalated => write!(f, "escalated"),
        }
    }
}

/// Outcome of stopping one process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopReport {
    pub verdict: Verdict,
    pub exit: ExitKind,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
    pub graceful_signals: u32,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Escalator {
    pub grace: Duration,
    pub poll_interval: Duration,
}

impl Default for Escalator {
    fn default() -> Self {
        Self {
            grace: DEFAULT_GRACE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl Escalator {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            ..Self::default()
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Stop `target`: graceful request, bounded wait, then forced kill.
    pub async fn stop<S: Supervised>(&self, target: &mut S) -> io::Result<StopReport> {
        self.stop_after(target, Instant::now(), 0).await
    }

    /// Continue a stop sequence that already sent `signals_sent` graceful
    /// requests since `started`. One more request is always sent.
    pub async fn stop_after<S: Supervised>(
        &self,
        target: &mut S,
        started: Instant,
        signals_sent: u32,
    ) -> io::Result<StopReport> {
        let mut graceful_signals = signals_sent;

        if let Some(exit) = target.try_exit()? {
            debug!(exit = %exit, "target already exited");
            return Ok(report(Verdict::Compliant, exit, started, graceful_signals));
        }

        if target.request_termination()? {
            graceful_signals += 1;
        }

        if let Some(exit) = self.wait_for_exit(target, self.grace).await? {
            info!(exit = %exit, "target exited within grace period");
            return Ok(report(Verdict::Compliant, exit, started, graceful_signals));
        }

        warn!(
            grace_ms = self.grace.as_millis() as u64,
            "grace period elapsed, escalating to forced kill"
        );
        target.force_kill()?;

        match self.wait_for_exit(target, KILL_WAIT).await? {
            Some(exit) => Ok(report(Verdict::Escalated, exit, started, graceful_signals)),
            None => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("process still present {:?} after forced kill", KILL_WAIT),
            )),
        }
    }

    /// Poll until the target exits or `within` elapses.
    pub async fn wait_for_exit<S: Supervised>(
        &self,
        target: &mut S,
        within: Duration,
    ) -> io::Result<Option<ExitKind>> {
        let deadline = Instant::now() + within;
        loop {
            if let Some(exit) = target.try_exit()? {
                return Ok(Some(exit));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

fn report(verdict: Verdict, exit: ExitKind, started: Instant, graceful_signals: u32) -> StopReport {
    StopReport {
        verdict,
        exit,
        elapsed: started.elapsed(),
        graceful_signals,
    }
}
