//! The persisted run document and the operations applied to it

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::time::Duration;
use toolrun_core::{RunError, RunId, RunStatus, ToolExecution};

use crate::error::ContextStoreResult;

/// Persisted projection of a run, keyed by run id
///
/// Fields the store does not know about are kept in `metadata` and written
/// back flattened into the same document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub run_id: RunId,
    pub tool_name: String,
    #[serde(default)]
    pub tool_version: Option<String>,
    #[serde(default = "empty_object")]
    pub parameters: JsonValue,
    #[serde(default)]
    pub context_id: Option<String>,
    #[serde(default)]
    pub status: RunStatus,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: Option<JsonValue>,
    #[serde(default)]
    pub error: Option<RunError>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub metadata: Map<String, JsonValue>,
}

fn empty_object() -> JsonValue {
    JsonValue::Object(Map::new())
}

impl ExecutionContext {
    pub fn new(run_id: RunId, tool_name: impl Into<String>) -> Self {
        Self {
            run_id,
            tool_name: tool_name.into(),
            tool_version: None,
            parameters: empty_object(),
            context_id: None,
            status: RunStatus::Queued,
            progress: 0.0,
            start_time: None,
            end_time: None,
            result: None,
            error: None,
            created_at: None,
            updated_at: None,
            expires_at: None,
            metadata: Map::new(),
        }
    }

    /// Project the persistent fields of a run.
    ///
    /// Timestamps owned by the store are left unset so that a save keeps
    /// the original `created_at`.
    pub fn from_execution(execution: &ToolExecution) -> Self {
        Self {
            run_id: execution.run_id.clone(),
            tool_name: execution.tool_name.clone(),
            tool_version: execution.tool_version.clone(),
            parameters: execution.parameters.clone(),
            context_id: execution.context_id.clone(),
            status: execution.status,
            progress: execution.progress,
            start_time: execution.start_time,
            end_time: execution.end_time,
            result: execution.result.clone(),
            error: execution.error.clone(),
            created_at: None,
            updated_at: None,
            expires_at: None,
            metadata: Map::new(),
        }
    }

    /// Rebuild a run view from its stored context.
    ///
    /// Logs and container bookkeeping are not persisted and come back empty.
    pub fn to_execution(&self, timeout: Duration) -> ToolExecution {
        let mut execution = ToolExecution::new(self.run_id.clone(), self.tool_name.clone(), timeout)
            .with_version(self.tool_version.clone())
            .with_parameters(self.parameters.clone())
            .with_context_id(self.context_id.clone());
        execution.status = self.status;
        execution.progress = self.progress;
        execution.start_time = self.start_time;
        execution.end_time = self.end_time;
        execution.result = self.result.clone();
        execution.error = self.error.clone();
        execution
    }

    /// Merge form of this context
    ///
    /// Leaves the store-owned timestamps out, so applying it keeps the
    /// stored `created_at` and any metadata this context does not carry.
    pub fn to_update(&self) -> ContextStoreResult<ContextUpdate> {
        let mut fields = match self.to_document()? {
            JsonValue::Object(fields) => fields,
            _ => Map::new(),
        };
        for owned in ["created_at", "updated_at", "expires_at"] {
            fields.remove(owned);
        }
        Ok(ContextUpdate::from(fields))
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Stamp the timestamps a save owns.
    ///
    /// `created_at` is kept from the incoming document, else from the
    /// previously stored one, else now. `expires_at` is refreshed on every
    /// write when a TTL is configured.
    pub(crate) fn stamp_for_save(
        &mut self,
        previous_created_at: Option<DateTime<Utc>>,
        ttl: Option<Duration>,
    ) {
        let now = Utc::now();
        if self.created_at.is_none() {
            self.created_at = Some(previous_created_at.unwrap_or(now));
        }
        self.updated_at = Some(now);
        self.expires_at = expiry(now, ttl);
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    pub fn to_document(&self) -> ContextStoreResult<JsonValue> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_document(document: JsonValue) -> ContextStoreResult<Self> {
        Ok(serde_json::from_value(document)?)
    }
}

pub(crate) fn expiry(now: DateTime<Utc>, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok())
        .map(|ttl| now + ttl)
}

/// Shallow merge applied by `update`
///
/// Each set field replaces the same top-level field of the stored
/// document; unknown fields land in the context's metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextUpdate {
    fields: Map<String, JsonValue>,
}

impl ContextUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn status(self, status: RunStatus) -> Self {
        self.set("status", status.as_str())
    }

    pub fn progress(self, progress: f64) -> Self {
        self.set("progress", progress)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Merge into `context`, returning the updated document.
    ///
    /// The run id is not patchable.
    pub fn apply_to(&self, context: &ExecutionContext) -> ContextStoreResult<ExecutionContext> {
        let mut document = context.to_document()?;
        if let JsonValue::Object(ref mut map) = document {
            for (field, value) in &self.fields {
                if field != "run_id" {
                    map.insert(field.clone(), value.clone());
                }
            }
        }
        ExecutionContext::from_document(document)
    }
}

impl From<Map<String, JsonValue>> for ContextUpdate {
    fn from(fields: Map<String, JsonValue>) -> Self {
        Self { fields }
    }
}

/// Equality filter over context fields
///
/// A context matches when every filter field is present, not null, and
/// equal to the expected value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextFilter {
    fields: BTreeMap<String, JsonValue>,
}

impl ContextFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn status(self, status: RunStatus) -> Self {
        self.eq("status", status.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn matches(&self, context: &ExecutionContext) -> bool {
        if self.is_empty() {
            return true;
        }
        match context.to_document() {
            Ok(document) => self.matches_document(&document),
            Err(_) => false,
        }
    }

    pub fn matches_document(&self, document: &JsonValue) -> bool {
        self.fields.iter().all(|(field, expected)| {
            match document.get(field) {
                Some(JsonValue::Null) | None => false,
                Some(actual) => actual == expected,
            }
        })
    }
}

/// Sort newest first and apply paging
pub(crate) fn page(
    mut contexts: Vec<ExecutionContext>,
    limit: usize,
    offset: usize,
) -> Vec<ExecutionContext> {
    contexts.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.run_id.cmp(&b.run_id))
    });
    contexts.into_iter().skip(offset).take(limit).collect()
}
