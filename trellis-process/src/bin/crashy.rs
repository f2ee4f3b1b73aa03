//! Crashing adapter: reports a failure on stderr and exits 123 without a result.

use std::process::ExitCode;

use trellis_process::{fixture, logging};

fn main() -> ExitCode {
    logging::init();

    match fixture::run_crashy() {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "invocation failed");
            ExitCode::FAILURE
        }
    }
}
