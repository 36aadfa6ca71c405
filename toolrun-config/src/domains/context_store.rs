//! Context store configuration

use crate::error::ConfigResult;
use crate::validation::{validate_enum_choice, validate_positive, validate_required_string, Validatable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Context store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextStoreConfig {
    /// Storage backend
    #[serde(default)]
    pub backend: ContextBackendKind,

    /// Database URL for durable backends
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Lifetime of a stored context; `None` keeps contexts until deleted
    #[serde(
        with = "crate::domains::utils::serde_duration_option",
        default = "default_ttl"
    )]
    pub ttl: Option<Duration>,

    /// Maximum pooled database connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How often expired contexts are purged
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_purge_interval")]
    pub purge_interval: Duration,
}

/// Available context store backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContextBackendKind {
    /// Process-local, lost on restart
    #[default]
    Memory,
    /// SQLite database via sqlx
    Sqlite,
}

impl ContextBackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextBackendKind::Memory => "memory",
            ContextBackendKind::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for ContextBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(ContextBackendKind::Memory),
            "sqlite" => Ok(ContextBackendKind::Sqlite),
            _ => Err(format!("Invalid context backend: {}", s)),
        }
    }
}

impl Default for ContextStoreConfig {
    fn default() -> Self {
        Self {
            backend: ContextBackendKind::default(),
            database_url: default_database_url(),
            ttl: default_ttl(),
            max_connections: default_max_connections(),
            purge_interval: default_purge_interval(),
        }
    }
}

impl Validatable for ContextStoreConfig {
    fn validate(&self) -> ConfigResult<()> {
        if let Some(ttl) = self.ttl {
            validate_positive(ttl.as_secs(), "ttl", self.domain_name())?;
        }
        validate_positive(self.purge_interval.as_secs(), "purge_interval", self.domain_name())?;

        if self.backend == ContextBackendKind::Sqlite {
            validate_required_string(&self.database_url, "database_url", self.domain_name())?;
            let scheme = self.database_url.split(':').next().unwrap_or_default();
            validate_enum_choice(scheme, &["sqlite"], "database_url scheme", self.domain_name())?;
            validate_positive(self.max_connections, "max_connections", self.domain_name())?;
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "context_store"
    }
}

// Default value functions
fn default_database_url() -> String {
    "sqlite://toolrun.db".to_string()
}

fn default_ttl() -> Option<Duration> {
    Some(Duration::from_secs(86400)) // 24 hours
}

fn default_max_connections() -> u32 {
    5
}

fn default_purge_interval() -> Duration {
    Duration::from_secs(300)
}
