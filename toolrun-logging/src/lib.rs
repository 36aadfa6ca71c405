//! Logging initialisation for toolrun
//!
//! All crates in the workspace log through `tracing`. This crate installs
//! the global subscriber from a [`LoggingConfig`], so binaries and tests
//! only need a single call at startup.

mod filter;
mod init;

pub use filter::build_env_filter;
pub use init::{init_logging_from_config, init_simple_tracing, init_test_logging};
pub use toolrun_config::domains::logging::{LogFormat, LogLevel};
pub use toolrun_config::LoggingConfig;
