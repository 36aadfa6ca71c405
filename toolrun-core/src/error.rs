//! Core error types for toolrun

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::execution::RunStatus;

/// Reason a tool run failed
///
/// Every failed run records exactly one of these kinds alongside a human
/// readable message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    /// The tool name/version could not be resolved to a pullable image
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// The container exited with a non-zero code
    #[error("Container exited with code {exit_code}")]
    ContainerExit { exit_code: i64 },

    /// The run exceeded its wall-clock limit
    #[error("Execution timed out after {}s", .timeout.as_secs())]
    ExecutionTimeout { timeout: Duration },

    /// The container runtime failed or was unreachable
    #[error("Container runtime error: {0}")]
    Runtime(String),

    /// The context store rejected a write the run depends on
    #[error("Context store error: {0}")]
    ContextStore(String),

    /// Cancellation was requested for the run
    #[error("Execution was cancelled")]
    Cancelled,
}

/// Result type alias for toolrun
pub type Result<T> = std::result::Result<T, ToolError>;

impl ToolError {
    /// The kind recorded on the run for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::ToolNotFound(_) => ErrorKind::ToolNotFound,
            ToolError::ContainerExit { .. } => ErrorKind::ContainerExitError,
            ToolError::ExecutionTimeout { .. } => ErrorKind::ExecutionTimeout,
            ToolError::Runtime(_) => ErrorKind::RuntimeError,
            ToolError::ContextStore(_) => ErrorKind::ContextStoreError,
            ToolError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Project into the serializable error recorded on a failed run
    pub fn to_run_error(&self) -> RunError {
        RunError {
            kind: self.kind(),
            message: self.to_string(),
            exit_code: match self {
                ToolError::ContainerExit { exit_code } => Some(*exit_code),
                _ => None,
            },
        }
    }
}

/// Stable error kinds exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ToolNotFound,
    ContainerExitError,
    ExecutionTimeout,
    RuntimeError,
    ContextStoreError,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ToolNotFound => "ToolNotFound",
            ErrorKind::ContainerExitError => "ContainerExitError",
            ErrorKind::ExecutionTimeout => "ExecutionTimeout",
            ErrorKind::RuntimeError => "RuntimeError",
            ErrorKind::ContextStoreError => "ContextStoreError",
            ErrorKind::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error recorded on a failed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
}

impl From<&ToolError> for RunError {
    fn from(error: &ToolError) -> Self {
        error.to_run_error()
    }
}

impl From<ToolError> for RunError {
    fn from(error: ToolError) -> Self {
        error.to_run_error()
    }
}

/// Rejected status transition
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Invalid status transition from {from} to {to}")]
pub struct TransitionError {
    pub from: RunStatus,
    pub to: RunStatus,
}

/// Parsing errors for string-backed enums
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("Invalid run status: {0}")]
    InvalidRunStatus(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(ToolError::ToolNotFound("x".into()).kind(), ErrorKind::ToolNotFound);
        assert_eq!(ToolError::Runtime("down".into()).kind(), ErrorKind::RuntimeError);
        assert_eq!(
            ToolError::ExecutionTimeout { timeout: Duration::from_secs(5) }.to_string(),
            "Execution timed out after 5s"
        );
    }

    #[test]
    fn test_run_error_carries_exit_code() {
        let err = RunError::from(ToolError::ContainerExit { exit_code: 3 });
        assert_eq!(err.kind, ErrorKind::ContainerExitError);
        assert_eq!(err.exit_code, Some(3));

        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "ContainerExitError");

        let err = RunError::from(ToolError::Cancelled);
        let json = serde_json::to_value(&err).unwrap();
        assert!(json.get("exit_code").is_none());
    }
}
