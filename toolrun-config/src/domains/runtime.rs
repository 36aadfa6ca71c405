//! Container runtime configuration

use crate::error::ConfigResult;
use crate::validation::{validate_required_string, Validatable};
use serde::{Deserialize, Serialize};

/// Container runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Docker daemon address; local defaults are used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_host: Option<String>,
}

impl Validatable for RuntimeConfig {
    fn validate(&self) -> ConfigResult<()> {
        if let Some(ref host) = self.docker_host {
            validate_required_string(host, "docker_host", self.domain_name())?;
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "runtime"
    }
}
