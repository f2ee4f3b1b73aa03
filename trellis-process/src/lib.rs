//! trellis-process library
//!
//! Worker side of the Trellis process contract: environment-in/JSON-out
//! adapter protocol, the termination-compliance model, and the fixtures that
//! exercise a supervisor's escalation path.

pub mod adapter;
pub mod compliance;
pub mod error;
pub mod escalation;
pub mod fixture;
pub mod logging;
pub mod simulate;
pub mod termination;
pub mod worker;

pub use adapter::{Invocation, ResultRecord};
pub use compliance::{ComplianceMachine, ComplianceState, WorkerVariant};
pub use escalation::{Escalator, ExitKind, StopReport, Supervised, Verdict};
pub use error::{AdapterError, ComplianceError};
