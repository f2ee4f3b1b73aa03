//! Invoke command implementation
//!
//! Runs one process adapter invocation: parameters in through the
//! environment, one result record out through standard output.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{info, warn};
use trellis_process::{Escalator, Invocation, ResultRecord};

use crate::child::{ProcessSpec, SupervisedChild};
use crate::error::{InvokeError, Result};

/// Options for one invocation
#[derive(Debug, Clone, Copy)]
pub struct InvokeOptions {
    /// How long the process may run before the harness stops it
    pub timeout: Duration,
    pub escalator: Escalator,
}

/// Successful invocation
#[derive(Debug, Clone)]
pub struct InvokeOutcome {
    pub record: ResultRecord,
    /// Diagnostics the worker wrote to stderr
    pub stderr: String,
    pub elapsed: Duration,
}

pub async fn invoke(
    spec: &ProcessSpec,
    invocation: &Invocation,
    options: &InvokeOptions,
) -> Result<InvokeOutcome> {
    let started = Instant::now();
    let deadline = started + options.timeout;
    let mut command = spec.command(invocation);
    command
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

    let child = command.spawn().map_err(|source| InvokeError::Spawn {
        program: spec.program.clone(),
        source,
    })?;
    let mut child = SupervisedChild::new(child);
    info!(program = %spec.program, pid = ?child.pid(), params = invocation.len(), "invoking");

    // Drain both pipes concurrently so a chatty worker cannot block on a full pipe.
    let stdout = drain(child.child_mut().stdout.take());
    let stderr = drain(child.child_mut().stderr.take());

    let exit = match options
        .escalator
        .wait_for_exit(&mut child, options.timeout)
        .await?
    {
        Some(exit) => exit,
        None => {
            warn!(program = %spec.program, timeout_ms = options.timeout.as_millis() as u64, "invocation timed out");
            let report = options.escalator.stop(&mut child).await?;
            stdout.abort();
            stderr.abort();
            return Err(InvokeError::TimedOut {
                timeout_ms: options.timeout.as_millis() as u64,
                report,
            });
        }
    };

    // A background process the worker left behind may still hold the pipes.
    let (stdout_abort, stderr_abort) = (stdout.abort_handle(), stderr.abort_handle());
    let remaining = deadline
        .saturating_duration_since(Instant::now())
        .max(options.escalator.poll_interval);
    let (stdout, stderr) = match timeout(remaining, async {
        Ok::<_, InvokeError>((collect(stdout).await?, collect(stderr).await?))
    })
    .await
    {
        Ok(output) => output?,
        Err(_) => {
            stdout_abort.abort();
            stderr_abort.abort();
            warn!(program = %spec.program, exit = %exit, "output still open after exit");
            return Err(InvokeError::OutputHeld {
                exit,
                timeout_ms: options.timeout.as_millis() as u64,
            });
        }
    };

    if !exit.is_success() {
        return Err(InvokeError::Failed { exit, stderr });
    }

    let record = ResultRecord::parse(&stdout)?;
    Ok(InvokeOutcome {
        record,
        stderr,
        elapsed: started.elapsed(),
    })
}

fn drain<R>(pipe: Option<R>) -> JoinHandle<std::io::Result<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf).await?;
        }
        Ok(buf)
    })
}

async fn collect(handle: JoinHandle<std::io::Result<Vec<u8>>>) -> Result<String> {
    let bytes = handle
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Run an invocation and log the outcome. Used by the CLI.
pub async fn run(
    spec: &ProcessSpec,
    invocation: &Invocation,
    options: &InvokeOptions,
) -> Result<ResultRecord> {
    let outcome = invoke(spec, invocation, options).await?;
    info!(
        elapsed_ms = outcome.elapsed.as_millis() as u64,
        fields = outcome.record.fields().len(),
        "invocation succeeded"
    );
    Ok(outcome.record)
}

