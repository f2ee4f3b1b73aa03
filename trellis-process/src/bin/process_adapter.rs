//! Process adapter fixture: `TRELLIS_ARG_NAME` in, one JSON greeting out.

use std::process::ExitCode;

use trellis_process::{fixture, logging};

fn main() -> ExitCode {
    logging::init();

    match fixture::run_adapter() {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "invocation failed");
            ExitCode::FAILURE
        }
    }
}
