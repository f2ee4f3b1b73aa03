//! Termination-compliance model
//!
//! Describes how a supervised worker reacts to termination requests:
//! - Compliant workers move `Running -> SignalReceived -> GracefullyExiting -> Terminated`
//! - Bad citizens move `Running -> SignalReceived -> Ignoring` and stay there
//! - Only the unmaskable kill leaves `Ignoring`, always into `Killed`

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ComplianceError;

/// A worker's relationship to termination requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceState {
    Running,
    SignalReceived,
    GracefullyExiting,
    Ignoring,
    Terminated,
    Killed,
}

impl ComplianceState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ComplianceState::Terminated | ComplianceState::Killed)
    }
}

impl fmt::Display for ComplianceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComplianceState::Running => "running",
            ComplianceState::SignalReceived => "signal_received",
            ComplianceState::GracefullyExiting => "gracefully_exiting",
            ComplianceState::Ignoring => "ignoring",
            ComplianceState::Terminated => "terminated",
            ComplianceState::Killed => "killed",
        };
        write!(f, "{}", s)
    }
}

/// Which compliance behaviour a fixture implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerVariant {
    /// Exits shortly after the first graceful signal.
    Compliant,
    /// Exits on the first graceful signal, but only after a cleanup longer
    /// than the default grace period.
    SlowCompliant,
    /// Intercepts graceful signals and keeps running until killed.
    BadCitizenIgnore,
}

impl WorkerVariant {
    /// Cleanup performed between receiving the signal and exiting.
    /// `None` for variants that never exit on a graceful signal.
    pub fn cleanup_delay(self) -> Option<Duration> {
        match self {
            WorkerVariant::Compliant => Some(Duration::from_millis(500)),
            WorkerVariant::SlowCompliant => Some(Duration::from_secs(10)),
            WorkerVariant::BadCitizenIgnore => None,
        }
    }

    pub fn honours_termination(self) -> bool {
        !matches!(self, WorkerVariant::BadCitizenIgnore)
    }
}

impl fmt::Display for WorkerVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerVariant::Compliant => write!(f, "compliant"),
            WorkerVariant::SlowCompliant => write!(f, "slow_compliant"),
            WorkerVariant::BadCitizenIgnore => write!(f, "bad_citizen_ignore"),
        }
    }
}

/// Inputs that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplianceEvent {
    /// A maskable termination request was delivered.
    Signal,
    /// The worker's handler decided how to react to the pending signal.
    Handle,
    /// Graceful cleanup finished.
    CleanupComplete,
    /// The unmaskable kill. Cannot be intercepted.
    Kill,
}

impl fmt::Display for ComplianceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComplianceEvent::Signal => write!(f, "signal"),
            ComplianceEvent::Handle => write!(f, "handle"),
            ComplianceEvent::CleanupComplete => write!(f, "cleanup_complete"),
            ComplianceEvent::Kill => write!(f, "kill"),
        }
    }
}

/// Compute the state following `event` for a worker of `variant`.
pub fn next_state(
    variant: WorkerVariant,
    from: ComplianceState,
    event: ComplianceEvent,
) -> Result<ComplianceState, ComplianceError> {
    use crate::compliance::{ComplianceEvent as E, ComplianceState as S};

    let to = match (from, event) {
        // Nothing reaches a finished process; kill on a corpse is a no-op.
        (S::Terminated | S::Killed, _) => from,
        (_, E::Kill) => S::Killed,

        (S::Running, E::Signal) => S::SignalReceived,
        (S::SignalReceived, E::Handle) if variant.honours_termination() => S::GracefullyExiting,
        (S::SignalReceived, E::Handle) => S::Ignoring,
        (S::GracefullyExiting, E::Signal) => S::GracefullyExiting,
        (S::GracefullyExiting, E::CleanupComplete) => S::Terminated,
        (S::Ignoring, E::Signal) => S::Ignoring,

        _ => return Err(ComplianceError::InvalidTransition { from, event }),
    };
    Ok(to)
}

/// State machine for one worker, with the path it took.
#[derive(Debug, Clone)]
pub struct ComplianceMachine {
    variant: WorkerVariant,
    state: ComplianceState,
    history: Vec<ComplianceState>,
}

impl ComplianceMachine {
    pub fn new(variant: WorkerVariant) -> Self {
        Self {
            variant,
            state: ComplianceState::Running,
            history: vec![ComplianceState::Running],
        }
    }

    pub fn variant(&self) -> WorkerVariant {
        self.variant
    }

    pub fn state(&self) -> ComplianceState {
        self.state
    }

    /// Every distinct state visited, starting with `Running`.
    pub fn history(&self) -> &[ComplianceState] {
        &self.history
    }

    pub fn apply(&mut self, event: ComplianceEvent) -> Result<ComplianceState, ComplianceError> {
        let to = next_state(self.variant, self.state, event)?;
        if to != self.state {
            self.history.push(to);
            self.state = to;
        }
        Ok(to)
    }

    /// Deliver a graceful signal and let the handler react to it.
    ///
    /// A signal arriving while the worker is already exiting or ignoring
    /// does not pass through `SignalReceived` again.
    pub fn deliver_signal(&mut self) -> Result<ComplianceState, ComplianceError> {
        if self.apply(ComplianceEvent::Signal)? == ComplianceState::SignalReceived {
            self.apply(ComplianceEvent::Handle)
        } else {
            Ok(self.state)
        }
    }
}
