//! trellis-harness library
//!
//! Supervisor side of the Trellis process contract: invoke adapters,
//! stop workers, and escalate when they refuse to leave.

pub mod child;
pub mod commands;
pub mod config;
pub mod error;
pub mod failure;

pub use child::{ProcessSpec, SupervisedChild};
pub use config::HarnessConfig;
pub use error::InvokeError;
