//! In-memory context backend

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use toolrun_core::RunId;

use crate::backend::ContextBackend;
use crate::context::{expiry, page, ContextFilter, ContextUpdate, ExecutionContext};
use crate::error::ContextStoreResult;

/// Process-local context backend
///
/// Not durable: contents are lost when the process exits.
pub struct MemoryContextBackend {
    ttl: Option<Duration>,
    store: RwLock<HashMap<RunId, ExecutionContext>>,
}

impl MemoryContextBackend {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            store: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored contexts, expired ones included
    pub fn len(&self) -> usize {
        self.store.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.read().is_empty()
    }

    fn live(&self) -> Vec<ExecutionContext> {
        let now = Utc::now();
        self.store
            .read()
            .values()
            .filter(|ctx| !ctx.is_expired_at(now))
            .cloned()
            .collect()
    }
}

impl Default for MemoryContextBackend {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl ContextBackend for MemoryContextBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn save(&self, mut context: ExecutionContext) -> ContextStoreResult<()> {
        let mut store = self.store.write();
        let now = Utc::now();
        let previous = store
            .get(&context.run_id)
            .filter(|existing| !existing.is_expired_at(now))
            .and_then(|existing| existing.created_at);
        context.stamp_for_save(previous, self.ttl);
        store.insert(context.run_id.clone(), context);
        Ok(())
    }

    async fn get(&self, run_id: &RunId) -> ContextStoreResult<Option<ExecutionContext>> {
        let now = Utc::now();
        Ok(self
            .store
            .read()
            .get(run_id)
            .filter(|ctx| !ctx.is_expired_at(now))
            .cloned())
    }

    async fn update(&self, run_id: &RunId, update: &ContextUpdate) -> ContextStoreResult<bool> {
        let mut store = self.store.write();
        let now = Utc::now();
        let Some(existing) = store.get(run_id).filter(|ctx| !ctx.is_expired_at(now)) else {
            return Ok(false);
        };

        let mut updated = update.apply_to(existing)?;
        updated.updated_at = Some(now);
        updated.expires_at = expiry(now, self.ttl);
        store.insert(run_id.clone(), updated);
        Ok(true)
    }

    async fn delete(&self, run_id: &RunId) -> ContextStoreResult<bool> {
        let now = Utc::now();
        let removed = self.store.write().remove(run_id);
        Ok(removed.is_some_and(|ctx| !ctx.is_expired_at(now)))
    }

    async fn list(
        &self,
        filter: &ContextFilter,
        limit: usize,
        offset: usize,
    ) -> ContextStoreResult<Vec<ExecutionContext>> {
        let matching = self
            .live()
            .into_iter()
            .filter(|ctx| filter.matches(ctx))
            .collect();
        Ok(page(matching, limit, offset))
    }

    async fn count(&self, filter: &ContextFilter) -> ContextStoreResult<usize> {
        Ok(self.live().iter().filter(|ctx| filter.matches(ctx)).count())
    }

    async fn purge_expired(&self) -> ContextStoreResult<usize> {
        let mut store = self.store.write();
        let now = Utc::now();
        let before = store.len();
        store.retain(|_, ctx| !ctx.is_expired_at(now));
        Ok(before - store.len())
    }

    async fn health_check(&self) -> ContextStoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use toolrun_core::RunStatus;

    fn context(run_id: &str) -> ExecutionContext {
        ExecutionContext::new(RunId::from(run_id), "echo")
    }

    #[tokio::test]
    async fn test_save_get_round_trip() {
        let backend = MemoryContextBackend::default();
        let mut ctx = context("r1").with_metadata("owner", json!("a"));
        ctx.parameters = json!({"message": "hi"});
        ctx.context_id = Some("ctx-1".to_string());
        backend.save(ctx.clone()).await.unwrap();

        let stored = backend.get(&RunId::from("r1")).await.unwrap().unwrap();
        assert_eq!(stored.parameters, ctx.parameters);
        assert_eq!(stored.context_id, ctx.context_id);
        assert_eq!(stored.metadata, ctx.metadata);
        assert!(stored.created_at.is_some());
        assert!(stored.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_update_unknown_creates_nothing() {
        let backend = MemoryContextBackend::default();
        let updated = backend
            .update(&RunId::from("ghost"), &ContextUpdate::new().status(RunStatus::Running))
            .await
            .unwrap();
        assert!(!updated);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_resave_keeps_created_at() {
        let backend = MemoryContextBackend::default();
        backend.save(context("r1")).await.unwrap();
        let first = backend.get(&RunId::from("r1")).await.unwrap().unwrap();

        let mut replacement = context("r1");
        replacement.status = RunStatus::Completed;
        backend.save(replacement).await.unwrap();

        let second = backend.get(&RunId::from("r1")).await.unwrap().unwrap();
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_expired_contexts_are_invisible() {
        let backend = MemoryContextBackend::new(Some(Duration::from_millis(20)));
        backend.save(context("r1")).await.unwrap();
        assert_eq!(backend.count(&ContextFilter::new()).await.unwrap(), 1);

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(backend.get(&RunId::from("r1")).await.unwrap().is_none());
        assert_eq!(backend.count(&ContextFilter::new()).await.unwrap(), 0);
        assert!(!backend
            .update(&RunId::from("r1"), &ContextUpdate::new().progress(1.0))
            .await
            .unwrap());
        assert_eq!(backend.len(), 1);
        assert_eq!(backend.purge_expired().await.unwrap(), 1);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let backend = MemoryContextBackend::default();
        backend.save(context("r1")).await.unwrap();
        assert!(backend.delete(&RunId::from("r1")).await.unwrap());
        assert!(!backend.delete(&RunId::from("r1")).await.unwrap());
    }
}
