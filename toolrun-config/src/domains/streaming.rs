//! Event streaming configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Event streaming configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Idle time after which a subscriber receives a keep-alive
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_keepalive_interval")]
    pub keepalive_interval: Duration,

    /// Events buffered per subscriber before its delivery task waits
    #[serde(default = "default_subscriber_queue_capacity")]
    pub subscriber_queue_capacity: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: default_keepalive_interval(),
            subscriber_queue_capacity: default_subscriber_queue_capacity(),
        }
    }
}

impl Validatable for StreamingConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(
            self.keepalive_interval.as_secs(),
            "keepalive_interval",
            self.domain_name(),
        )?;
        validate_positive(
            self.subscriber_queue_capacity,
            "subscriber_queue_capacity",
            self.domain_name(),
        )?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "streaming"
    }
}

fn default_keepalive_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_subscriber_queue_capacity() -> usize {
    256
}
