//! Bad citizen: intercepts graceful signals, logs them and keeps running until killed.

use std::process::ExitCode;

use trellis_process::compliance::WorkerVariant;
use trellis_process::{fixture, logging};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    logging::init();

    match fixture::run_worker(WorkerVariant::BadCitizenIgnore).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "worker failed");
            ExitCode::FAILURE
        }
    }
}
