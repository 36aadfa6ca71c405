//! Backend abstraction for the context store

use async_trait::async_trait;
use toolrun_core::RunId;

use crate::context::{ContextFilter, ContextUpdate, ExecutionContext};
use crate::error::ContextStoreResult;

/// Storage backend for run contexts
///
/// Implementations own TTL enforcement: expired contexts are invisible to
/// every read and are dropped by [`purge_expired`](Self::purge_expired).
#[async_trait]
pub trait ContextBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Insert or replace the context stored under its run id.
    ///
    /// Stamps `updated_at`, and `created_at` only if the incoming context
    /// and any stored predecessor both lack one.
    async fn save(&self, context: ExecutionContext) -> ContextStoreResult<()>;

    async fn get(&self, run_id: &RunId) -> ContextStoreResult<Option<ExecutionContext>>;

    /// Merge `update` into an existing context. Returns `false`, writing
    /// nothing, when the run id is unknown.
    async fn update(&self, run_id: &RunId, update: &ContextUpdate) -> ContextStoreResult<bool>;

    async fn delete(&self, run_id: &RunId) -> ContextStoreResult<bool>;

    /// Matching contexts, newest `created_at` first, paged after filtering
    async fn list(
        &self,
        filter: &ContextFilter,
        limit: usize,
        offset: usize,
    ) -> ContextStoreResult<Vec<ExecutionContext>>;

    async fn count(&self, filter: &ContextFilter) -> ContextStoreResult<usize>;

    /// Remove expired contexts, returning how many were dropped
    async fn purge_expired(&self) -> ContextStoreResult<usize>;

    async fn health_check(&self) -> ContextStoreResult<()>;
}
