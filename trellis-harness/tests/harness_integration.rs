//! Integration tests for the supervisor side, using `sh` as the worker.
#![cfg(unix)]

use std::time::Duration;

use trellis_harness::commands::invoke::{invoke, InvokeOptions};
use trellis_harness::commands::stop::{self, StopOptions};
use trellis_harness::{InvokeError, ProcessSpec};
use trellis_process::{AdapterError, Escalator, ExitKind, Invocation, Verdict};

fn sh(script: &str) -> ProcessSpec {
    ProcessSpec::new("sh").arg("-c").arg(script)
}

fn fast_escalator() -> Escalator {
    Escalator::new(Duration::from_millis(300)).with_poll_interval(Duration::from_millis(10))
}

fn options(timeout_ms: u64) -> InvokeOptions {
    InvokeOptions {
        timeout: Duration::from_millis(timeout_ms),
        escalator: fast_escalator(),
    }
}

const GREETER: &str = r#"echo "greeting for ${TRELLIS_ARG_NAME:-World}" >&2
printf '{"greeting":"Hello, %s!","source":"Process Adapter","version":2}\n' "${TRELLIS_ARG_NAME:-World}""#;

#[tokio::test]
async fn invoke_passes_parameters_through_environment() {
    let invocation = Invocation::new().with("name", "Ada").unwrap();
    let outcome = invoke(&sh(GREETER), &invocation, &options(5_000))
        .await
        .unwrap();

    assert_eq!(outcome.record.field("greeting"), Some("Hello, Ada!"));
    assert_eq!(outcome.record.field("source"), Some("Process Adapter"));
    assert!(outcome.stderr.contains("greeting for Ada"));
}

#[tokio::test]
async fn invoke_without_parameters_gets_default() {
    let outcome = invoke(&sh(GREETER), &Invocation::new(), &options(5_000))
        .await
        .unwrap();
    assert_eq!(outcome.record.field("greeting"), Some("Hello, World!"));
}

#[tokio::test]
async fn invoke_sees_aggregate_variable() {
    let invocation = Invocation::new().with("name", "Ada").unwrap();
    let outcome = invoke(
        &sh(r#"printf '{"args":%s}\n' "$TRELLIS_ARGS""#),
        &invocation,
        &options(5_000),
    )
    .await
    .unwrap();
    assert_eq!(
        outcome.record.fields()["args"],
        serde_json::json!({ "name": "Ada" })
    );
}

#[tokio::test]
async fn non_zero_exit_is_adapter_failure_even_with_output() {
    let err = invoke(
        &sh(r#"echo '{"greeting":"partial"}'; echo boom >&2; exit 3"#),
        &Invocation::new(),
        &options(5_000),
    )
    .await
    .unwrap_err();

    match err {
        InvokeError::Failed { exit, stderr } => {
            assert_eq!(exit, ExitKind::Exited(3));
            assert!(stderr.contains("boom"));
        }
        other => panic!("expected adapter failure, got {:?}", other),
    }
}

#[tokio::test]
async fn success_without_record_is_protocol_error() {
    let err = invoke(&sh("exit 0"), &Invocation::new(), &options(5_000))
        .await
        .unwrap_err();
    assert!(matches!(err, InvokeError::Protocol(AdapterError::MissingResult)));

    let err = invoke(&sh("echo hello"), &Invocation::new(), &options(5_000))
        .await
        .unwrap_err();
    assert!(matches!(err, InvokeError::Protocol(AdapterError::MalformedResult(_))));
}

#[tokio::test]
async fn missing_program_is_spawn_error() {
    let err = invoke(
        &ProcessSpec::new("/nonexistent/trellis-worker"),
        &Invocation::new(),
        &options(1_000),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, InvokeError::Spawn { .. }));
}

#[tokio::test]
async fn slow_invocation_is_stopped() {
    let err = invoke(&sh("exec sleep 30"), &Invocation::new(), &options(200))
        .await
        .unwrap_err();

    match err {
        InvokeError::TimedOut { timeout_ms, report } => {
            assert_eq!(timeout_ms, 200);
            assert_eq!(report.verdict, Verdict::Compliant);
            assert_eq!(report.exit, ExitKind::Signalled(libc::SIGTERM));
        }
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn background_process_holding_output_cannot_outlast_timeout() {
    let started = std::time::Instant::now();
    let err = invoke(
        &sh(r#"sleep 6 & printf '{"greeting":"hi"}\n'"#),
        &Invocation::new(),
        &options(500),
    )
    .await
    .unwrap_err();

    assert!(
        started.elapsed() < Duration::from_secs(3),
        "invoke ran for {:?}",
        started.elapsed()
    );
    match err {
        InvokeError::OutputHeld { exit, timeout_ms } => {
            assert_eq!(exit, ExitKind::Exited(0));
            assert_eq!(timeout_ms, 500);
        }
        other => panic!("expected held output, got {:?}", other),
    }
}

#[tokio::test]
async fn more_than_one_stdout_line_is_protocol_error() {
    let err = invoke(
        &sh(r#"echo '{"greeting":"first"}'; echo '{"greeting":"second"}'"#),
        &Invocation::new(),
        &options(5_000),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, InvokeError::Protocol(AdapterError::MalformedResult(_))));
}

fn stop_options(signals: u32) -> StopOptions {
    StopOptions {
        escalator: fast_escalator(),
        settle: Duration::from_millis(300),
        signals,
        interval: Duration::from_millis(100),
    }
}

#[tokio::test]
async fn stop_compliant_worker() {
    let run = stop::run(&sh("exec sleep 30"), &Invocation::new(), &stop_options(1))
        .await
        .unwrap();

    assert_eq!(run.report.verdict, Verdict::Compliant);
    assert_eq!(run.report.graceful_signals, 1);
    assert!(!run.exited_early);
    assert!(run.report.elapsed < Duration::from_millis(300));
}

#[tokio::test]
async fn stop_escalates_against_ignoring_worker() {
    let run = stop::run(
        &sh(r#"trap '' TERM; while :; do sleep 1; done"#),
        &Invocation::new(),
        &stop_options(2),
    )
    .await
    .unwrap();

    assert_eq!(run.report.verdict, Verdict::Escalated);
    assert_eq!(run.report.exit, ExitKind::Killed);
    assert_eq!(run.report.graceful_signals, 2);
    assert!(run.report.elapsed >= Duration::from_millis(400));

    let json = serde_json::to_value(&run).unwrap();
    assert_eq!(json["verdict"], "escalated");
    assert_eq!(json["exit"], "killed");
}

#[tokio::test]
async fn stop_worker_that_already_exited() {
    let run = stop::run(&sh("exit 0"), &Invocation::new(), &stop_options(3))
        .await
        .unwrap();

    assert!(run.exited_early);
    assert_eq!(run.report.verdict, Verdict::Compliant);
    assert_eq!(run.report.graceful_signals, 0);
    assert_eq!(run.report.exit, ExitKind::Exited(0));
}
