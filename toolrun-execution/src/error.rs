//! Error types for tool execution

use thiserror::Error;
use toolrun_core::{RunId, ToolError};
use toolrun_storage::ContextStoreError;

/// Errors raised by the tool executor itself
///
/// Failures of an accepted run are not reported here; they are recorded on
/// the run as a [`toolrun_core::RunError`].
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Run already exists: {0}")]
    RunAlreadyExists(RunId),

    #[error("Context store error: {0}")]
    ContextStore(#[from] ContextStoreError),

    #[error("Container runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Run task failed: {0}")]
    TaskFailed(String),
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Cancellation registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CancellationError {
    #[error("Cancellation token already exists for run {0}")]
    AlreadyExists(RunId),
}

impl From<CancellationError> for ExecutorError {
    fn from(err: CancellationError) -> Self {
        match err {
            CancellationError::AlreadyExists(run_id) => ExecutorError::RunAlreadyExists(run_id),
        }
    }
}

/// Container runtime errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Container runtime unavailable: {0}")]
    Unavailable(String),

    #[error("Container runtime API error: {0}")]
    Api(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

impl From<RuntimeError> for ToolError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::ImageNotFound(image) => ToolError::ToolNotFound(image),
            other => ToolError::Runtime(other.to_string()),
        }
    }
}
