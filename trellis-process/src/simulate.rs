//! In-process simulation of the worker variants.
//!
//! A `SimulatedWorker` runs the real `Worker` logic on a tokio task and
//! replaces OS signals with an in-memory trigger. Aborting the task plays
//! the role of the unmaskable kill: the worker has no way to observe or
//! resist it.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::compliance::{ComplianceState, WorkerVariant};
use crate::escalation::{ExitKind, Supervised};
use crate::termination::{self, TerminationNotice, TerminationTrigger};
use crate::worker::{Worker, WorkerExit, WorkerTiming};

pub struct SimulatedWorker {
    variant: WorkerVariant,
    trigger: TerminationTrigger,
    state: Arc<watch::Sender<ComplianceState>>,
    handle: JoinHandle<WorkerExit>,
    killed: bool,
}

impl SimulatedWorker {
    /// Start a worker on the current tokio runtime.
    pub fn spawn(variant: WorkerVariant, timing: WorkerTiming) -> Self {
        let worker = Worker::new(variant, timing);
        let state = worker.state_handle();
        let (trigger, listener) = termination::channel();
        let handle = tokio::spawn(worker.run(listener));

        Self {
            variant,
            trigger,
            state,
            handle,
            killed: false,
        }
    }

    pub fn variant(&self) -> WorkerVariant {
        self.variant
    }

    pub fn state(&self) -> ComplianceState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ComplianceState> {
        self.state.subscribe()
    }

    /// Deliver a graceful request. False if the worker is already gone.
    pub fn signal(&self) -> bool {
        if self.state().is_terminal() || self.handle.is_finished() {
            return false;
        }
        self.trigger.send(TerminationNotice::Terminate)
    }

    /// The unmaskable kill. Idempotent.
    pub fn kill(&mut self) {
        if self.handle.is_finished() && !self.killed {
            return;
        }
        self.handle.abort();
        self.killed = true;
        self.state.send_if_modified(|current| {
            if current.is_terminal() {
                false
            } else {
                *current = ComplianceState::Killed;
                true
            }
        });
        debug!(variant = %self.variant, "simulated worker killed");
    }

    /// Wait until the state satisfies `pred`, or `None` after `timeout`.
    pub async fn wait_for_state<F>(&self, timeout: Duration, pred: F) -> Option<ComplianceState>
    where
        F: FnMut(&ComplianceState) -> bool,
    {
        let mut rx = self.state.subscribe();
        let reached = match tokio::time::timeout(timeout, rx.wait_for(pred)).await {
            Ok(Ok(state)) => Some(*state),
            _ => None,
        };
        reached
    }
}

impl Supervised for SimulatedWorker {
    fn request_termination(&mut self) -> io::Result<bool> {
        Ok(self.signal())
    }

    fn force_kill(&mut self) -> io::Result<()> {
        self.kill();
        Ok(())
    }

    fn try_exit(&mut self) -> io::Result<Option<ExitKind>> {
        let exit = match self.state() {
            ComplianceState::Killed => Some(ExitKind::Killed),
            ComplianceState::Terminated => {
                Some(ExitKind::Exited(TerminationNotice::Terminate.exit_code() as i32))
            }
            // Work completed undisturbed
            ComplianceState::Running if self.handle.is_finished() => Some(ExitKind::Exited(0)),
            _ => None,
        };
        Ok(exit)
    }
}

impl Drop for SimulatedWorker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
