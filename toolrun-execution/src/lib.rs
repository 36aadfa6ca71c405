//! Tool execution for toolrun
//!
//! This crate runs tools as containers:
//! - [`cancellation`]: per-run cancellation tokens and their registry
//! - [`runtime`]: the [`ContainerRuntime`] seam, with a Docker
//!   implementation behind the `docker` feature
//! - [`parser`]: `PROGRESS:` and `RESULT:` lines in tool output
//! - [`executor`]: the [`ToolExecutor`] driving each run to a terminal state

pub mod cancellation;
#[cfg(feature = "docker")]
pub mod docker;
pub mod error;
pub mod executor;
mod lifecycle;
pub mod parser;
pub mod runtime;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cancellation::{CallbackHandle, CancellationRegistry, CancellationState, CancellationToken};
#[cfg(feature = "docker")]
pub use docker::DockerRuntime;
pub use error::{CancellationError, ExecutorError, ExecutorResult, RuntimeError, RuntimeResult};
pub use executor::{ExecutorOptions, RunHandle, ToolExecutor};
pub use lifecycle::DEFAULT_RESULT_MESSAGE;
pub use runtime::{ContainerHandle, ContainerRuntime, ContainerSpec, ContainerState, LogStream};
