//! Worker runtime shared by the fixture binaries and the simulation.
//!
//! A worker does (simulated) work while listening for termination notices.
//! What it does with a notice depends on its `WorkerVariant`.

use std::future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::adapter::{Invocation, ResultRecord, SOURCE};
use crate::compliance::{ComplianceEvent, ComplianceMachine, ComplianceState, WorkerVariant};
use crate::error::Result;
use crate::termination::{TerminationListener, TerminationNotice};

/// How long the compliant fixture works when nothing stops it. The slow
/// and ignoring variants work until they are stopped.
pub const DEFAULT_WORK: Duration = Duration::from_secs(10);

/// Durations driving a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerTiming {
    /// Time until the work completes. `None` never completes.
    pub work: Option<Duration>,
    /// Cleanup between accepting a termination request and exiting.
    pub cleanup: Option<Duration>,
}

impl WorkerTiming {
    pub fn for_variant(variant: WorkerVariant) -> Self {
        let work = match variant {
            WorkerVariant::Compliant => Some(DEFAULT_WORK),
            WorkerVariant::SlowCompliant | WorkerVariant::BadCitizenIgnore => None,
        };
        Self {
            work,
            cleanup: variant.cleanup_delay(),
        }
    }

    /// Variant defaults, overridden by the `work_ms` and `cleanup_ms`
    /// parameters when the supervisor passes them.
    pub fn from_invocation(variant: WorkerVariant, invocation: &Invocation) -> Result<Self> {
        let defaults = Self::for_variant(variant);
        Ok(Self {
            work: millis_param(invocation, "work_ms")?.or(defaults.work),
            cleanup: millis_param(invocation, "cleanup_ms")?.or(defaults.cleanup),
        })
    }
}

fn millis_param(invocation: &Invocation, key: &str) -> Result<Option<Duration>> {
    if invocation.get(key).is_none() {
        return Ok(None);
    }
    let ms: u64 = invocation.parse_or(key, 0)?;
    Ok(Some(Duration::from_millis(ms)))
}

/// How a worker run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Work finished before any termination notice arrived.
    Completed,
    /// Exited gracefully in response to a notice.
    Terminated(TerminationNotice),
}

impl WorkerExit {
    pub fn exit_code(self) -> u8 {
        match self {
            WorkerExit::Completed => 0,
            WorkerExit::Terminated(notice) => notice.exit_code(),
        }
    }
}

/// Record written by a worker whose work completed undisturbed.
pub fn completion_record(variant: WorkerVariant) -> ResultRecord {
    ResultRecord::new()
        .with("status", "completed")
        .with("variant", variant.to_string())
        .with("source", SOURCE)
}

pub struct Worker {
    machine: ComplianceMachine,
    timing: WorkerTiming,
    state: Arc<watch::Sender<ComplianceState>>,
}

impl Worker {
    pub fn new(variant: WorkerVariant, timing: WorkerTiming) -> Self {
        let (state, _) = watch::channel(ComplianceState::Running);
        Self {
            machine: ComplianceMachine::new(variant),
            timing,
            state: Arc::new(state),
        }
    }

    pub fn variant(&self) -> WorkerVariant {
        self.machine.variant()
    }

    /// Observe state changes from outside the worker.
    pub fn subscribe(&self) -> watch::Receiver<ComplianceState> {
        self.state.subscribe()
    }

    pub(crate) fn state_handle(&self) -> Arc<watch::Sender<ComplianceState>> {
        Arc::clone(&self.state)
    }

    /// Run until the work completes or a notice is honoured.
    ///
    /// For a bad citizen with no work deadline this never returns: the only
    /// way out is a kill the worker cannot intercept.
    pub async fn run(mut self, mut listener: TerminationListener) -> WorkerExit {
        let work = self.timing.work;
        let work = async move {
            match work {
                Some(duration) => tokio::time::sleep(duration).await,
                None => future::pending::<()>().await,
            }
        };
        tokio::pin!(work);

        let mut listening = true;
        loop {
            tokio::select! {
                // Notices first: a Result must never follow an observed request.
                biased;

                notice = listener.recv(), if listening => {
                    let Some(notice) = notice else {
                        debug!("termination source closed");
                        listening = false;
                        continue;
                    };
                    if self.on_notice(notice) == ComplianceState::GracefullyExiting {
                        self.clean_up(&mut listener).await;
                        return WorkerExit::Terminated(notice);
                    }
                }

                _ = &mut work, if self.machine.state() == ComplianceState::Running => {
                    info!("work finished");
                    return WorkerExit::Completed;
                }

                else => break,
            }
        }

        // Nothing left that could end this worker from the inside.
        future::pending::<WorkerExit>().await
    }

    fn on_notice(&mut self, notice: TerminationNotice) -> ComplianceState {
        let state = self.advance_signal();
        match state {
            ComplianceState::GracefullyExiting => {
                info!(signal = %notice, "received signal, cleaning up");
            }
            ComplianceState::Ignoring => {
                warn!(signal = %notice, "ignoring signal");
            }
            other => debug!(signal = %notice, state = %other, "signal observed"),
        }
        state
    }

    async fn clean_up(&mut self, listener: &mut TerminationListener) {
        let cleanup = self.timing.cleanup.unwrap_or_default();
        let done = tokio::time::sleep(cleanup);
        tokio::pin!(done);

        let mut listening = true;
        loop {
            tokio::select! {
                _ = &mut done => break,
                notice = listener.recv(), if listening => match notice {
                    Some(notice) => {
                        self.advance_signal();
                        info!(signal = %notice, "already exiting");
                    }
                    None => listening = false,
                },
            }
        }

        self.advance(ComplianceEvent::CleanupComplete);
        info!("cleanup done");
    }

    fn advance_signal(&mut self) -> ComplianceState {
        let state = match self.machine.deliver_signal() {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "unexpected compliance transition");
                self.machine.state()
            }
        };
        self.publish(state);
        state
    }

    fn advance(&mut self, event: ComplianceEvent) -> ComplianceState {
        let state = match self.machine.apply(event) {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "unexpected compliance transition");
                self.machine.state()
            }
        };
        self.publish(state);
        state
    }

    fn publish(&self, state: ComplianceState) {
        // A terminal state set from outside (a kill) is final.
        self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::termination;

    fn timing(work_ms: Option<u64>, cleanup_ms: u64) -> WorkerTiming {
        WorkerTiming {
            work: work_ms.map(Duration::from_millis),
            cleanup: Some(Duration::from_millis(cleanup_ms)),
        }
    }

    #[test]
    fn test_timing_defaults() {
        let compliant = WorkerTiming::for_variant(WorkerVariant::Compliant);
        assert_eq!(compliant.work, Some(DEFAULT_WORK));
        assert_eq!(compliant.cleanup, Some(Duration::from_millis(500)));

        let slow = WorkerTiming::for_variant(WorkerVariant::SlowCompliant);
        assert_eq!(slow.work, None);
        assert_eq!(slow.cleanup, Some(Duration::from_secs(10)));

        let bad = WorkerTiming::for_variant(WorkerVariant::BadCitizenIgnore);
        assert_eq!(bad.work, None);
        assert_eq!(bad.cleanup, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_citizen_never_completes_on_its_own() {
        let (_trigger, listener) = termination::channel();
        let worker = Worker::new(
            WorkerVariant::SlowCompliant,
            WorkerTiming::for_variant(WorkerVariant::SlowCompliant),
        );
        let state = worker.subscribe();
        let handle = tokio::spawn(worker.run(listener));

        let outcome = tokio::time::timeout(Duration::from_secs(3600), handle).await;
        assert!(outcome.is_err());
        assert_eq!(*state.borrow(), ComplianceState::Running);
    }

    #[test]
    fn test_timing_overrides() {
        let invocation = Invocation::from_vars([
            ("TRELLIS_ARG_WORK_MS", "20"),
            ("TRELLIS_ARG_CLEANUP_MS", "5"),
        ]);
        let timing = WorkerTiming::from_invocation(WorkerVariant::SlowCompliant, &invocation).unwrap();
        assert_eq!(timing.work, Some(Duration::from_millis(20)));
        assert_eq!(timing.cleanup, Some(Duration::from_millis(5)));
    }

    #[test]
    fn test_timing_rejects_bad_number() {
        let invocation = Invocation::from_vars([("TRELLIS_ARG_WORK_MS", "-1")]);
        assert!(WorkerTiming::from_invocation(WorkerVariant::Compliant, &invocation).is_err());
    }

    #[test]
    fn test_completion_record() {
        let record = completion_record(WorkerVariant::SlowCompliant);
        assert_eq!(record.field("status"), Some("completed"));
        assert_eq!(record.field("variant"), Some("slow_compliant"));
        assert_eq!(record.field("source"), Some("Process Adapter"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_without_notice() {
        let (_trigger, listener) = termination::channel();
        let worker = Worker::new(WorkerVariant::Compliant, timing(Some(50), 10));
        let state = worker.subscribe();

        assert_eq!(worker.run(listener).await, WorkerExit::Completed);
        assert_eq!(*state.borrow(), ComplianceState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notice_wins_over_finished_work() {
        let (trigger, listener) = termination::channel();
        trigger.send(TerminationNotice::Terminate);
        let worker = Worker::new(WorkerVariant::Compliant, timing(Some(0), 10));
        let state = worker.subscribe();

        let exit = worker.run(listener).await;
        assert_eq!(exit, WorkerExit::Terminated(TerminationNotice::Terminate));
        assert_eq!(exit.exit_code(), 143);
        assert_eq!(*state.borrow(), ComplianceState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_compliant_exits_after_cleanup() {
        let (trigger, listener) = termination::channel();
        let worker = Worker::new(WorkerVariant::Compliant, WorkerTiming::for_variant(WorkerVariant::Compliant));
        let state = worker.subscribe();
        let started = tokio::time::Instant::now();
        let handle = tokio::spawn(worker.run(listener));

        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.send(TerminationNotice::Interrupt);
        // Repeated requests during cleanup change nothing
        trigger.send(TerminationNotice::Interrupt);

        let exit = handle.await.unwrap();
        assert_eq!(exit, WorkerExit::Terminated(TerminationNotice::Interrupt));
        assert_eq!(exit.exit_code(), 130);
        assert_eq!(*state.borrow(), ComplianceState::Terminated);
        assert!(started.elapsed() >= Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_citizen_keeps_running() {
        let (trigger, listener) = termination::channel();
        let worker = Worker::new(
            WorkerVariant::BadCitizenIgnore,
            WorkerTiming::for_variant(WorkerVariant::BadCitizenIgnore),
        );
        let mut state = worker.subscribe();
        let handle = tokio::spawn(worker.run(listener));

        for _ in 0..3 {
            trigger.send(TerminationNotice::Terminate);
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        state
            .wait_for(|s| *s == ComplianceState::Ignoring)
            .await
            .unwrap();

        // Even with the source closed it never returns on its own
        drop(trigger);
        let outcome = tokio::time::timeout(Duration::from_secs(3600), handle).await;
        assert!(outcome.is_err());
        assert_eq!(*state.borrow(), ComplianceState::Ignoring);
    }
}
