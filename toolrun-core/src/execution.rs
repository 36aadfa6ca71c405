//! Run domain model and its status state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{ParseError, RunError, TransitionError};
use crate::types::LogEntry;

/// Unique identifier for a run
///
/// Run ids are opaque strings so that callers may supply their own;
/// generated ids are random UUIDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Create a new random run ID
    pub fn new() -> Self {
        RunId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RunId {
    fn from(id: String) -> Self {
        RunId(id)
    }
}

impl From<&str> for RunId {
    fn from(id: &str) -> Self {
        RunId(id.to_string())
    }
}

impl From<Uuid> for RunId {
    fn from(uuid: Uuid) -> Self {
        RunId(uuid.to_string())
    }
}

impl AsRef<str> for RunId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Accepted, container not yet running
    #[default]
    Queued,
    /// Container is running
    Running,
    /// Container exited with code 0
    Completed,
    /// Resolution, launch, exit code or timeout failure
    Failed,
    /// Cancellation was requested and honoured
    Cancelled,
}

impl RunStatus {
    /// Check if the run is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// Check if the run is still active
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Failed)
                | (Queued, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(RunStatus::Queued),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            _ => Err(ParseError::InvalidRunStatus(s.to_string())),
        }
    }
}

/// One tool run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub run_id: RunId,
    pub tool_name: String,
    pub tool_version: Option<String>,
    /// Resolved image reference, once resolution succeeded
    pub image: Option<String>,
    pub parameters: JsonValue,
    pub context_id: Option<String>,
    pub status: RunStatus,
    pub progress: f64,
    pub logs: Vec<LogEntry>,
    pub result: Option<JsonValue>,
    pub error: Option<RunError>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub container_id: Option<String>,
    pub timeout: Duration,
}

impl ToolExecution {
    /// Create a queued run
    pub fn new(run_id: RunId, tool_name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            run_id,
            tool_name: tool_name.into(),
            tool_version: None,
            image: None,
            parameters: JsonValue::Object(Default::default()),
            context_id: None,
            status: RunStatus::Queued,
            progress: 0.0,
            logs: Vec::new(),
            result: None,
            error: None,
            start_time: None,
            end_time: None,
            container_id: None,
            timeout,
        }
    }

    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.tool_version = version;
        self
    }

    pub fn with_parameters(mut self, parameters: JsonValue) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_context_id(mut self, context_id: Option<String>) -> Self {
        self.context_id = context_id;
        self
    }

    /// Move to `next`, stamping `start_time` on entering running and
    /// `end_time` on entering a terminal state. Each is set at most once.
    pub fn transition(&mut self, next: RunStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        if next == RunStatus::Running && self.start_time.is_none() {
            self.start_time = Some(now);
        }
        if next.is_terminal() && self.end_time.is_none() {
            self.end_time = Some(now);
        }
        self.status = next;
        Ok(())
    }

    /// Finish successfully with `result`
    pub fn complete(&mut self, result: JsonValue) -> Result<(), TransitionError> {
        self.transition(RunStatus::Completed)?;
        self.result = Some(result);
        Ok(())
    }

    /// Finish with `error`
    pub fn fail(&mut self, error: RunError) -> Result<(), TransitionError> {
        self.transition(RunStatus::Failed)?;
        self.error = Some(error);
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), TransitionError> {
        self.transition(RunStatus::Cancelled)
    }

    /// Apply a reported progress value.
    ///
    /// The value is clamped to `[0, 100]`. NaN and values lower than the
    /// current progress are ignored. Returns the new progress when applied.
    pub fn record_progress(&mut self, value: f64) -> Option<f64> {
        if value.is_nan() {
            return None;
        }
        let clamped = value.clamp(0.0, 100.0);
        if clamped < self.progress {
            return None;
        }
        self.progress = clamped;
        Some(clamped)
    }

    pub fn append_log(&mut self, entry: LogEntry) {
        self.logs.push(entry);
    }

    /// The last `n` log messages, oldest first
    pub fn log_tail(&self, n: usize) -> Vec<String> {
        let skip = self.logs.len().saturating_sub(n);
        self.logs[skip..].iter().map(|e| e.message.clone()).collect()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall-clock time between start and end, if both are known
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, ToolError};
    use serde_json::json;

    fn run() -> ToolExecution {
        ToolExecution::new(RunId::from("run-1"), "echo", Duration::from_secs(30))
    }

    #[test]
    fn test_status_transitions() {
        use RunStatus::*;
        assert!(Queued.can_transition_to(Running));
        assert!(Queued.can_transition_to(Failed));
        assert!(Queued.can_transition_to(Cancelled));
        assert!(!Queued.can_transition_to(Completed));
        assert!(Running.can_transition_to(Completed));
        assert!(!Running.can_transition_to(Queued));

        for terminal in [Completed, Failed, Cancelled] {
            assert!(terminal.is_terminal());
            for next in [Queued, Running, Completed, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_end_time_set_only_when_terminal() {
        let mut exec = run();
        assert!(exec.end_time.is_none());

        exec.transition(RunStatus::Running).unwrap();
        let started = exec.start_time;
        assert!(started.is_some());
        assert!(exec.end_time.is_none());

        exec.complete(json!({"x": 1})).unwrap();
        assert!(exec.end_time.is_some());
        assert_eq!(exec.start_time, started);
        assert_eq!(exec.result, Some(json!({"x": 1})));
    }

    #[test]
    fn test_terminal_state_is_sticky() {
        let mut exec = run();
        exec.transition(RunStatus::Running).unwrap();
        exec.cancel().unwrap();
        let ended = exec.end_time;

        let err = exec
            .fail(ToolError::Runtime("late".into()).to_run_error())
            .unwrap_err();
        assert_eq!(err.from, RunStatus::Cancelled);
        assert_eq!(exec.status, RunStatus::Cancelled);
        assert_eq!(exec.end_time, ended);
        assert!(exec.error.is_none());
    }

    #[test]
    fn test_failure_from_queued() {
        let mut exec = run();
        exec.fail(ToolError::ToolNotFound("nope".into()).into()).unwrap();
        assert_eq!(exec.status, RunStatus::Failed);
        assert!(exec.start_time.is_none());
        assert_eq!(exec.error.as_ref().unwrap().kind, ErrorKind::ToolNotFound);
    }

    #[test]
    fn test_progress_clamped_and_monotonic() {
        let mut exec = run();
        assert_eq!(exec.record_progress(-5.0), Some(0.0));
        assert_eq!(exec.record_progress(40.0), Some(40.0));
        assert_eq!(exec.record_progress(20.0), None);
        assert_eq!(exec.progress, 40.0);
        assert_eq!(exec.record_progress(f64::NAN), None);
        assert_eq!(exec.record_progress(150.0), Some(100.0));
        assert_eq!(exec.progress, 100.0);
    }

    #[test]
    fn test_log_tail() {
        let mut exec = run();
        for i in 0..15 {
            exec.append_log(LogEntry::info(format!("line {}", i)));
        }
        let tail = exec.log_tail(10);
        assert_eq!(tail.len(), 10);
        assert_eq!(tail[0], "line 5");
        assert_eq!(tail[9], "line 14");
        assert_eq!(run().log_tail(10).len(), 0);
    }

    #[test]
    fn test_run_id_serializes_transparently() {
        let id = RunId::from("abc");
        assert_eq!(serde_json::to_value(&id).unwrap(), json!("abc"));
        assert_ne!(RunId::new(), RunId::new());
        assert_eq!("Running".parse::<RunStatus>().unwrap(), RunStatus::Running);
    }
}
