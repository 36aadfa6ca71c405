//! Context store error types

use thiserror::Error;

/// Result type for context store operations
pub type ContextStoreResult<T> = std::result::Result<T, ContextStoreError>;

/// Context store errors
#[derive(Debug, Error, Clone)]
pub enum ContextStoreError {
    /// Backend could not be reached
    #[error("Context store connection failed: {0}")]
    ConnectionFailed(String),

    /// A read or write against the backend failed
    #[error("Context store query failed: {0}")]
    QueryFailed(String),

    /// Schema setup failed
    #[error("Context store migration failed: {0}")]
    MigrationFailed(String),

    /// A stored document could not be encoded or decoded
    #[error("Context serialization error: {0}")]
    SerializationError(String),

    /// The backend is not available in this build or misconfigured
    #[error("Context store configuration error: {0}")]
    ConfigError(String),
}

impl ContextStoreError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ContextStoreError::ConnectionFailed(_) | ContextStoreError::QueryFailed(_)
        )
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            ContextStoreError::ConnectionFailed(_) => "CONNECTION_ERROR",
            ContextStoreError::QueryFailed(_) => "QUERY_ERROR",
            ContextStoreError::MigrationFailed(_) => "MIGRATION_ERROR",
            ContextStoreError::SerializationError(_) => "SERIALIZATION_ERROR",
            ContextStoreError::ConfigError(_) => "CONFIG_ERROR",
        }
    }
}

impl From<serde_json::Error> for ContextStoreError {
    fn from(err: serde_json::Error) -> Self {
        ContextStoreError::SerializationError(err.to_string())
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for ContextStoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                ContextStoreError::ConnectionFailed(err.to_string())
            }
            other => ContextStoreError::QueryFailed(other.to_string()),
        }
    }
}

impl From<ContextStoreError> for toolrun_core::ToolError {
    fn from(err: ContextStoreError) -> Self {
        toolrun_core::ToolError::ContextStore(err.to_string())
    }
}
