//! Event types published for each run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use toolrun_core::{RunId, RunStatus};

/// Kind of a run event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Status,
    Progress,
    Log,
    Result,
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Status => "status",
            EventType::Progress => "progress",
            EventType::Log => "log",
            EventType::Result => "result",
            EventType::Error => "error",
        }
    }

    pub fn all() -> &'static [EventType] {
        &[
            EventType::Status,
            EventType::Progress,
            EventType::Log,
            EventType::Result,
            EventType::Error,
        ]
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One published event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
    /// Streamer-wide publish order
    pub sequence: u64,
    pub data: JsonValue,
}

impl Event {
    /// The status carried by a `status` event, if any
    pub fn status(&self) -> Option<RunStatus> {
        if self.event_type != EventType::Status {
            return None;
        }
        self.data
            .get("status")
            .and_then(JsonValue::as_str)
            .and_then(|s| s.parse().ok())
    }

    /// Whether this event announces a terminal status
    pub fn is_terminal(&self) -> bool {
        self.status().is_some_and(|status| status.is_terminal())
    }
}

/// Item produced by a subscription
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Event(Event),
    /// Nothing was published within the keep-alive interval
    KeepAlive,
}

impl StreamItem {
    pub fn as_event(&self) -> Option<&Event> {
        match self {
            StreamItem::Event(event) => Some(event),
            StreamItem::KeepAlive => None,
        }
    }

    pub fn into_event(self) -> Option<Event> {
        match self {
            StreamItem::Event(event) => Some(event),
            StreamItem::KeepAlive => None,
        }
    }
}
