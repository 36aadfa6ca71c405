//! Request and response shapes for the transport layer
//!
//! The HTTP surface itself lives outside this workspace; these types fix the
//! wire contract it speaks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

use crate::error::RunError;
use crate::execution::{RunId, RunStatus, ToolExecution};

/// Request to run a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub tool_name: String,
    #[serde(default)]
    pub tool_version: Option<String>,
    #[serde(default = "empty_object")]
    pub parameters: JsonValue,
    #[serde(default)]
    pub context_id: Option<String>,
    /// Wall-clock limit in seconds; the configured default applies when
    /// absent or zero
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Caller-chosen run id; one is generated when absent
    #[serde(default)]
    pub run_id: Option<String>,
}

impl ExecuteRequest {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_version: None,
            parameters: empty_object(),
            context_id: None,
            timeout: None,
            run_id: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.tool_version = Some(version.into());
        self
    }

    pub fn with_parameters(mut self, parameters: JsonValue) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_context_id(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout.as_secs());
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Effective timeout given the configured default
    pub fn effective_timeout(&self, default: Duration) -> Duration {
        self.timeout
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(default)
    }
}

fn empty_object() -> JsonValue {
    JsonValue::Object(Default::default())
}

/// Acknowledgement of an accepted run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub run_id: RunId,
    pub status: RunStatus,
    pub message: String,
}

impl ExecuteResponse {
    pub fn queued(run_id: RunId) -> Self {
        Self {
            run_id,
            status: RunStatus::Queued,
            message: "Tool execution queued".to_string(),
        }
    }
}

/// Point-in-time view of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub run_id: RunId,
    pub tool_name: String,
    pub tool_version: Option<String>,
    pub status: RunStatus,
    pub progress: f64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub result: Option<JsonValue>,
    pub error: Option<RunError>,
    /// Most recent log messages, oldest first
    #[serde(default)]
    pub logs: Vec<String>,
}

impl StatusResponse {
    pub fn from_execution(execution: &ToolExecution, log_tail: usize) -> Self {
        Self {
            run_id: execution.run_id.clone(),
            tool_name: execution.tool_name.clone(),
            tool_version: execution.tool_version.clone(),
            status: execution.status,
            progress: execution.progress,
            start_time: execution.start_time,
            end_time: execution.end_time,
            result: execution.result.clone(),
            error: execution.error.clone(),
            logs: execution.log_tail(log_tail),
        }
    }
}

/// Request to cancel a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    pub run_id: RunId,
}

/// Outcome of a cancel request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelResponse {
    pub run_id: RunId,
    /// `cancelling` when accepted, otherwise the run's current status or `not_found`
    pub status: String,
    pub message: String,
}

impl CancelResponse {
    pub fn accepted(run_id: RunId) -> Self {
        Self {
            run_id,
            status: "cancelling".to_string(),
            message: "Cancellation requested".to_string(),
        }
    }

    pub fn rejected(run_id: RunId, status: Option<RunStatus>) -> Self {
        match status {
            Some(status) => Self {
                run_id,
                status: status.as_str().to_string(),
                message: format!("Run is already {}", status),
            },
            None => Self {
                run_id,
                status: "not_found".to_string(),
                message: "Run not found".to_string(),
            },
        }
    }
}
