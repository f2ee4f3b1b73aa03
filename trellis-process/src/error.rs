use thiserror::Error;

use crate::compliance::{ComplianceEvent, ComplianceState};

/// Error types for the process adapter contract.
/// Used by both the worker fixtures and the supervisor-side reader.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Invalid parameter key '{0}': only ASCII letters, digits and '_' are allowed")]
    InvalidKey(String),

    #[error("Missing required parameter: {0}")]
    MissingField(String),

    #[error("Invalid value for parameter '{key}': {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Failed to write result record: {0}")]
    Output(String),

    #[error("No result record on standard output")]
    MissingResult,

    #[error("Malformed result record: {0}")]
    MalformedResult(String),
}

/// Errors raised by the termination-compliance state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComplianceError {
    #[error("Invalid compliance transition: cannot apply '{event}' in state '{from}'")]
    InvalidTransition {
        from: ComplianceState,
        event: ComplianceEvent,
    },
}

pub type Result<T> = std::result::Result<T, AdapterError>;
