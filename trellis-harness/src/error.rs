use std::io;

use thiserror::Error;
use trellis_process::{AdapterError, ExitKind, StopReport};

/// Ways an adapter invocation can fail, from the supervisor's side.
#[derive(Error, Debug)]
pub enum InvokeError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Non-success exit. An adapter failure, never a parse error.
    #[error("Process {exit}. Stderr: {stderr}")]
    Failed { exit: ExitKind, stderr: String },

    #[error("Process did not finish within {timeout_ms} ms and was stopped ({})", .report.verdict)]
    TimedOut { timeout_ms: u64, report: StopReport },

    /// The process exited, but something it started kept its output open.
    #[error("Process {exit} but its output was still open after {timeout_ms} ms")]
    OutputHeld { exit: ExitKind, timeout_ms: u64 },

    /// Exit 0 but no usable record.
    #[error("Protocol error: {0}")]
    Protocol(#[from] AdapterError),

    #[error("I/O error while supervising process: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, InvokeError>;
