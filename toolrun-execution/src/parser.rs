//! Tool output sentinels
//!
//! Tools report progress with `PROGRESS:<float>` and their result with
//! `RESULT:<json object>`, each on its own line. Anything else is plain log
//! output.

use serde_json::{Map, Value as JsonValue};

pub const PROGRESS_PREFIX: &str = "PROGRESS:";
pub const RESULT_PREFIX: &str = "RESULT:";

/// One classified line of tool output
#[derive(Debug, Clone, PartialEq)]
pub enum LogLine {
    /// Empty after trimming; not recorded
    Blank,
    Plain(String),
    Progress { line: String, value: f64 },
    Result { line: String, value: Map<String, JsonValue> },
    /// A sentinel whose payload did not parse; kept as a plain line
    Malformed { line: String, reason: String },
}

impl LogLine {
    /// The trimmed text of the line
    pub fn text(&self) -> &str {
        match self {
            LogLine::Blank => "",
            LogLine::Plain(line)
            | LogLine::Progress { line, .. }
            | LogLine::Result { line, .. }
            | LogLine::Malformed { line, .. } => line,
        }
    }
}

pub fn parse_line(raw: &str) -> LogLine {
    let line = raw.trim();
    if line.is_empty() {
        return LogLine::Blank;
    }

    if let Some(payload) = line.strip_prefix(PROGRESS_PREFIX) {
        return match payload.trim().parse::<f64>() {
            Ok(value) if !value.is_nan() => LogLine::Progress {
                line: line.to_string(),
                value,
            },
            Ok(_) => LogLine::Malformed {
                line: line.to_string(),
                reason: "progress is NaN".to_string(),
            },
            Err(e) => LogLine::Malformed {
                line: line.to_string(),
                reason: format!("invalid progress: {e}"),
            },
        };
    }

    if let Some(payload) = line.strip_prefix(RESULT_PREFIX) {
        return match serde_json::from_str::<JsonValue>(payload.trim()) {
            Ok(JsonValue::Object(value)) => LogLine::Result {
                line: line.to_string(),
                value,
            },
            Ok(_) => LogLine::Malformed {
                line: line.to_string(),
                reason: "result is not a JSON object".to_string(),
            },
            Err(e) => LogLine::Malformed {
                line: line.to_string(),
                reason: format!("invalid result JSON: {e}"),
            },
        };
    }

    LogLine::Plain(line.to_string())
}
