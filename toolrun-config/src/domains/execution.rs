//! Tool execution configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_required_string, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tool execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Network every tool container is attached to
    #[serde(default = "default_container_network")]
    pub container_network: String,

    /// Wall-clock limit applied when a request carries none
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_timeout")]
    pub default_timeout: Duration,

    /// Time a container is given to stop before it is killed
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_stop_grace_period")]
    pub stop_grace_period: Duration,

    /// How often container state and cancellation are polled (milliseconds)
    #[serde(with = "crate::domains::utils::serde_duration_millis", default = "default_poll_interval")]
    pub poll_interval: Duration,

    /// Image repository prefix prepended to the normalised tool name
    #[serde(default = "default_image_prefix")]
    pub image_prefix: String,

    /// Tag used when a request names no version
    #[serde(default = "default_version")]
    pub default_version: String,

    /// Container name prefix, followed by the run id
    #[serde(default = "default_container_name_prefix")]
    pub container_name_prefix: String,

    /// Number of log lines included in status views
    #[serde(default = "default_status_log_tail")]
    pub status_log_tail: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            container_network: default_container_network(),
            default_timeout: default_timeout(),
            stop_grace_period: default_stop_grace_period(),
            poll_interval: default_poll_interval(),
            image_prefix: default_image_prefix(),
            default_version: default_version(),
            container_name_prefix: default_container_name_prefix(),
            status_log_tail: default_status_log_tail(),
        }
    }
}

impl Validatable for ExecutionConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(&self.container_network, "container_network", self.domain_name())?;
        validate_required_string(&self.default_version, "default_version", self.domain_name())?;
        validate_required_string(
            &self.container_name_prefix,
            "container_name_prefix",
            self.domain_name(),
        )?;

        validate_positive(
            self.default_timeout.as_secs(),
            "default_timeout",
            self.domain_name(),
        )?;
        validate_positive(
            self.poll_interval.as_millis(),
            "poll_interval",
            self.domain_name(),
        )?;

        if self.stop_grace_period > self.default_timeout {
            return Err(self.validation_error(
                "stop_grace_period cannot exceed default_timeout",
            ));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "execution"
    }
}

// Default value functions
fn default_container_network() -> String {
    "mcp-tools".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(300) // 5 minutes
}

fn default_stop_grace_period() -> Duration {
    Duration::from_secs(2)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_image_prefix() -> String {
    "mcp/tool-".to_string()
}

fn default_version() -> String {
    "latest".to_string()
}

fn default_container_name_prefix() -> String {
    "mcp-tool-".to_string()
}

fn default_status_log_tail() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_config_defaults() {
        let config = ExecutionConfig::default();
        assert_eq!(config.container_network, "mcp-tools");
        assert_eq!(config.default_timeout, Duration::from_secs(300));
        assert_eq!(config.stop_grace_period, Duration::from_secs(2));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_execution_config_validation() {
        let mut config = ExecutionConfig::default();
        config.default_timeout = Duration::from_secs(0);
        assert!(config.validate().is_err());

        let mut config = ExecutionConfig::default();
        config.poll_interval = Duration::from_millis(0);
        assert!(config.validate().is_err());

        let mut config = ExecutionConfig::default();
        config.container_network = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_poll_interval_in_millis() {
        let config: ExecutionConfig = serde_yaml::from_str("poll_interval: 250").unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.default_timeout, Duration::from_secs(300));
    }
}
