//! trellis-harness CLI
//!
//! Drives Trellis process fixtures from the supervisor side.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use trellis_harness::commands::invoke::{self, InvokeOptions};
use trellis_harness::commands::stop::{self, StopOptions};
use trellis_harness::failure::CategorizedFailure;
use trellis_harness::{HarnessConfig, ProcessSpec};
use trellis_process::{logging, Escalator, Invocation};

#[derive(Parser)]
#[command(name = "trellis-harness")]
#[command(about = "Drive Trellis process fixtures from the supervisor side")]
struct Cli {
    /// Path to config file (default: ~/.config/trellis/harness.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Invoke a process adapter and print its result record
    Invoke {
        /// Parameter passed through the environment (repeatable)
        #[arg(long = "arg", value_name = "KEY=VALUE", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Deadline before the harness stops the process
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Grace period between the termination request and the kill
        #[arg(long)]
        grace_ms: Option<u64>,

        /// Program to run
        program: String,

        /// Fixed arguments for the program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Start a worker, ask it to stop, and escalate if it refuses
    Stop {
        /// Parameter passed through the environment (repeatable)
        #[arg(long = "arg", value_name = "KEY=VALUE", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Grace period between the last request and the kill
        #[arg(long)]
        grace_ms: Option<u64>,

        /// Wait after spawning before the first request
        #[arg(long)]
        settle_ms: Option<u64>,

        /// Number of graceful requests before escalating
        #[arg(long, default_value = "1")]
        signals: u32,

        /// Spacing between graceful requests
        #[arg(long, default_value = "200")]
        interval_ms: u64,

        /// Program to run
        program: String,

        /// Fixed arguments for the program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    Ok((key.to_string(), value.to_string()))
}

fn build_invocation(params: &[(String, String)]) -> anyhow::Result<Invocation> {
    params
        .iter()
        .try_fold(Invocation::new(), |inv, (k, v)| inv.with(k, v.as_str()))
        .context("invalid --arg")
}

fn escalator(config: &HarnessConfig, grace_ms: Option<u64>) -> Escalator {
    let mut escalator = config.escalator();
    if let Some(ms) = grace_ms {
        escalator.grace = Duration::from_millis(ms);
    }
    escalator
}

fn main() -> ExitCode {
    logging::init();

    match run() {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<u8> {
    let cli = Cli::parse();
    let config = HarnessConfig::load(cli.config.as_deref())?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Commands::Invoke {
            params,
            timeout_ms,
            grace_ms,
            program,
            args,
        } => {
            let invocation = build_invocation(&params)?;
            let spec = ProcessSpec::new(program).args(args);
            let options = InvokeOptions {
                timeout: timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(config.invoke_timeout),
                escalator: escalator(&config, grace_ms),
            };

            match runtime.block_on(invoke::run(&spec, &invocation, &options)) {
                Ok(record) => {
                    println!("{}", serde_json::to_string(&record)?);
                    Ok(0)
                }
                Err(e) => {
                    let failure = CategorizedFailure::from(&e);
                    println!("FAIL: {}", failure);
                    Ok(failure.category.exit_code())
                }
            }
        }
        Commands::Stop {
            params,
            grace_ms,
            settle_ms,
            signals,
            interval_ms,
            program,
            args,
        } => {
            let invocation = build_invocation(&params)?;
            let spec = ProcessSpec::new(program).args(args);
            let options = StopOptions {
                escalator: escalator(&config, grace_ms),
                settle: settle_ms.map(Duration::from_millis).unwrap_or(config.settle),
                signals,
                interval: Duration::from_millis(interval_ms),
            };

            let result = runtime.block_on(stop::run(&spec, &invocation, &options))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(0)
        }
    }
}
