//! Configuration loading and environment variable handling

use crate::domains::ToolrunConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "TOOLRUN".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<ToolrunConfig> {
        let content = std::fs::read_to_string(path)?;
        self.from_yaml_str(&content)
    }

    /// Load configuration from YAML text with environment overrides
    pub fn from_yaml_str(&self, content: &str) -> ConfigResult<ToolrunConfig> {
        let mut config: ToolrunConfig = if content.trim().is_empty() {
            ToolrunConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<ToolrunConfig> {
        let mut config = ToolrunConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<ToolrunConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut ToolrunConfig) -> ConfigResult<()> {
        self.apply_execution_overrides(&mut config.execution)?;
        self.apply_context_store_overrides(&mut config.context_store)?;
        self.apply_streaming_overrides(&mut config.streaming)?;
        self.apply_logging_overrides(&mut config.logging)?;
        self.apply_runtime_overrides(&mut config.runtime);
        Ok(())
    }

    /// Apply execution config overrides
    fn apply_execution_overrides(
        &self,
        config: &mut crate::domains::execution::ExecutionConfig,
    ) -> ConfigResult<()> {
        if let Ok(network) = self.get_env_var("CONTAINER_NETWORK") {
            config.container_network = network;
        }

        if let Some(seconds) = self.parse_env_var::<u64>("EXECUTION_TIMEOUT")? {
            config.default_timeout = Duration::from_secs(seconds);
        }

        if let Some(seconds) = self.parse_env_var::<u64>("STOP_GRACE_PERIOD")? {
            config.stop_grace_period = Duration::from_secs(seconds);
        }

        if let Ok(prefix) = self.get_env_var("IMAGE_PREFIX") {
            config.image_prefix = prefix;
        }

        Ok(())
    }

    /// Apply context store config overrides
    fn apply_context_store_overrides(
        &self,
        config: &mut crate::domains::context_store::ContextStoreConfig,
    ) -> ConfigResult<()> {
        if let Ok(backend) = self.get_env_var("CONTEXT_BACKEND") {
            config.backend = crate::domains::context_store::ContextBackendKind::from_str(&backend)
                .map_err(ConfigError::EnvError)?;
        }

        if let Some(seconds) = self.parse_env_var::<u64>("CONTEXT_TTL")? {
            // 0 disables expiry
            config.ttl = (seconds > 0).then(|| Duration::from_secs(seconds));
        }

        if let Ok(url) = self.get_env_var("DATABASE_URL") {
            config.database_url = url;
        }

        Ok(())
    }

    /// Apply streaming config overrides
    fn apply_streaming_overrides(
        &self,
        config: &mut crate::domains::streaming::StreamingConfig,
    ) -> ConfigResult<()> {
        if let Some(seconds) = self.parse_env_var::<u64>("KEEPALIVE_INTERVAL")? {
            config.keepalive_interval = Duration::from_secs(seconds);
        }
        Ok(())
    }

    /// Apply logging config overrides
    fn apply_logging_overrides(
        &self,
        config: &mut crate::domains::logging::LoggingConfig,
    ) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = crate::domains::logging::LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = crate::domains::logging::LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    /// Apply runtime config overrides
    fn apply_runtime_overrides(&self, config: &mut crate::domains::runtime::RuntimeConfig) {
        if let Ok(host) = self.get_env_var("DOCKER_HOST") {
            config.docker_host = Some(host);
        }
    }

    /// Parse a prefixed environment variable, if set
    fn parse_env_var<T>(&self, name: &str) -> ConfigResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_env_var(name) {
            Ok(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|e| ConfigError::EnvError(format!("Invalid {}: {}", name, e))),
            Err(_) => Ok(None),
        }
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
