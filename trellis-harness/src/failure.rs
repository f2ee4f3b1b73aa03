//! Failure categorization for adapter invocations
//!
//! Categorizes failures to help identify root causes:
//! - Setup: the process could not be started or supervised
//! - Adapter: the worker reported failure through its exit status
//! - Protocol: the worker claimed success but broke the output contract
//! - Timeout: the worker had to be stopped by the harness

use std::fmt;

use crate::error::InvokeError;

/// Category of failure for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    Setup,
    Adapter,
    Protocol,
    Timeout,
}

impl FailureCategory {
    /// Exit code the CLI uses for this category.
    pub fn exit_code(self) -> u8 {
        match self {
            FailureCategory::Adapter => 1,
            FailureCategory::Protocol => 2,
            FailureCategory::Timeout => 3,
            FailureCategory::Setup => 4,
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCategory::Setup => write!(f, "Setup"),
            FailureCategory::Adapter => write!(f, "Adapter"),
            FailureCategory::Protocol => write!(f, "Protocol"),
            FailureCategory::Timeout => write!(f, "Timeout"),
        }
    }
}

/// A failure with category and details
#[derive(Debug, Clone)]
pub struct CategorizedFailure {
    pub category: FailureCategory,
    /// Short description of what failed
    pub message: String,
    pub details: Option<String>,
}

impl CategorizedFailure {
    pub fn new(category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl From<&InvokeError> for CategorizedFailure {
    fn from(err: &InvokeError) -> Self {
        match err {
            InvokeError::Spawn { program, source } => {
                Self::new(FailureCategory::Setup, format!("Could not start {}", program))
                    .with_details(source.to_string())
            }
            InvokeError::Io(e) => {
                Self::new(FailureCategory::Setup, "Supervision failed").with_details(e.to_string())
            }
            InvokeError::Failed { exit, stderr } => {
                let failure = Self::new(FailureCategory::Adapter, format!("Process {}", exit));
                match stderr.trim() {
                    "" => failure,
                    trimmed => failure.with_details(trimmed.to_string()),
                }
            }
            InvokeError::OutputHeld { exit, timeout_ms } => Self::new(
                FailureCategory::Timeout,
                format!("Output still open {} ms after start", timeout_ms),
            )
            .with_details(format!("process {}", exit)),
            InvokeError::Protocol(e) => Self::new(FailureCategory::Protocol, e.to_string()),
            InvokeError::TimedOut { timeout_ms, report } => Self::new(
                FailureCategory::Timeout,
                format!("No result within {} ms", timeout_ms),
            )
            .with_details(format!("stop {} after {} ms, {}", report.verdict, report.elapsed.as_millis(), report.exit)),
        }
    }
}

impl fmt::Display for CategorizedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)?;
        if let Some(ref details) = self.details {
            write!(f, " - {}", details)?;
        }
        Ok(())
    }
}
