//! Entry points of the fixture binaries.

use std::io;

use anyhow::Context;
use tracing::{error, info};

use crate::adapter::{self, Invocation};
use crate::compliance::WorkerVariant;
use crate::error::AdapterError;
use crate::termination;
use crate::worker::{completion_record, Worker, WorkerExit, WorkerTiming};

/// Greeting adapter: read `name`, write one record, exit 0.
pub fn run_adapter() -> anyhow::Result<u8> {
    let invocation = Invocation::from_env();
    info!(params = invocation.len(), "invoked");

    let record = adapter::greeting(&invocation);
    record
        .emit(io::stdout().lock())
        .context("failed to write result")?;
    Ok(0)
}

/// Exit status of the crashing adapter unless `exit_code` says otherwise.
pub const CRASH_EXIT: u8 = 123;

pub const CRASH_MESSAGE: &str = "Something went terribly wrong";

/// Crashing adapter: diagnostic on stderr, no record, non-zero exit.
///
/// `message` and `exit_code` adjust the failure. An unusable `exit_code` is
/// itself an input error and fails the invocation through `Err`.
pub fn run_crashy() -> anyhow::Result<u8> {
    let invocation = Invocation::from_env();
    let code: u8 = invocation.parse_or("exit_code", CRASH_EXIT)?;
    if code == 0 {
        return Err(AdapterError::InvalidValue {
            key: "exit_code".to_string(),
            value: "0".to_string(),
            reason: "a crash must exit non-zero".to_string(),
        }
        .into());
    }

    error!(exit_code = code, "{}", invocation.get_or("message", CRASH_MESSAGE));
    Ok(code)
}

/// Compliance worker of the given variant, wired to the real OS signals.
///
/// Exit code 0 with a completion record when the work finishes first,
/// `128 + signo` without a record after a graceful exit.
pub async fn run_worker(variant: WorkerVariant) -> anyhow::Result<u8> {
    let invocation = Invocation::from_env();
    let timing = match variant {
        // Unbounded; no parameter shortens it
        WorkerVariant::BadCitizenIgnore => WorkerTiming::for_variant(variant),
        _ => WorkerTiming::from_invocation(variant, &invocation)?,
    };

    let listener = termination::os_listener().context("failed to install signal handlers")?;
    info!(
        variant = %variant,
        pid = std::process::id(),
        "worker started"
    );

    match Worker::new(variant, timing).run(listener).await {
        WorkerExit::Completed => {
            completion_record(variant)
                .emit(io::stdout().lock())
                .context("failed to write result")?;
            Ok(0)
        }
        exit @ WorkerExit::Terminated(notice) => {
            info!(signal = %notice, "exiting gracefully");
            Ok(exit.exit_code())
        }
    }
}
