//! Domain-specific configuration modules

pub mod context_store;
pub mod execution;
pub mod logging;
pub mod runtime;
pub mod streaming;
pub mod utils;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main toolrun configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ToolrunConfig {
    /// Tool execution configuration
    #[serde(default)]
    pub execution: execution::ExecutionConfig,

    /// Context store configuration
    #[serde(default)]
    pub context_store: context_store::ContextStoreConfig,

    /// Event streaming configuration
    #[serde(default)]
    pub streaming: streaming::StreamingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,

    /// Container runtime configuration
    #[serde(default)]
    pub runtime: runtime::RuntimeConfig,
}

impl ToolrunConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.execution.validate()?;
        self.context_store.validate()?;
        self.streaming.validate()?;
        self.logging.validate()?;
        self.runtime.validate()?;
        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = ToolrunConfig::default();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
