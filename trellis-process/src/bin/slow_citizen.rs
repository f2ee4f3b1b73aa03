//! Slow worker: honours the first graceful signal but needs longer than the grace period to exit.

use std::process::ExitCode;

use trellis_process::compliance::WorkerVariant;
use trellis_process::{fixture, logging};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    logging::init();

    match fixture::run_worker(WorkerVariant::SlowCompliant).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "worker failed");
            ExitCode::FAILURE
        }
    }
}
