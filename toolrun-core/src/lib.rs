//! Core domain models and types for toolrun
//!
//! This crate contains the fundamental types used throughout the
//! orchestrator: the per-run execution record, its status state machine,
//! the error taxonomy recorded on failed runs, image resolution and the
//! transport-facing request/response shapes. It has minimal dependencies
//! and defines the domain language of the application.

pub mod api;
pub mod error;
pub mod execution;
pub mod image;
pub mod types;

// Re-export commonly used types at the crate root
pub use api::{CancelRequest, CancelResponse, ExecuteRequest, ExecuteResponse, StatusResponse};
pub use error::{ErrorKind, Result, RunError, ToolError, TransitionError};
pub use execution::{RunId, RunStatus, ToolExecution};
pub use image::{normalize_tool_name, resolve_image, ImageRef};
pub use types::{LogEntry, LogLevel};
