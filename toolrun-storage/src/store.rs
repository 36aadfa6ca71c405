//! Context store facade

use std::sync::Arc;
use std::time::Duration;
use toolrun_config::{ContextBackendKind, ContextStoreConfig};
use toolrun_core::RunId;
use tracing::{debug, info, warn};

use crate::backend::ContextBackend;
use crate::backends::memory::MemoryContextBackend;
use crate::context::{ContextFilter, ContextUpdate, ExecutionContext};
use crate::error::ContextStoreResult;
#[cfg(not(feature = "sqlite"))]
use crate::error::ContextStoreError;

/// Persistent record of run contexts
///
/// Cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct ContextStore {
    backend: Arc<dyn ContextBackend>,
}

impl ContextStore {
    pub fn new(backend: Arc<dyn ContextBackend>) -> Self {
        Self { backend }
    }

    /// Non-durable store kept in process memory
    pub fn in_memory(ttl: Option<Duration>) -> Self {
        Self::new(Arc::new(MemoryContextBackend::new(ttl)))
    }

    /// Build the backend selected by configuration
    pub async fn from_config(config: &ContextStoreConfig) -> ContextStoreResult<Self> {
        info!(backend = %config.backend, "Initializing context store");

        match config.backend {
            ContextBackendKind::Memory => Ok(Self::in_memory(config.ttl)),
            #[cfg(feature = "sqlite")]
            ContextBackendKind::Sqlite => {
                let backend = crate::backends::sqlite::SqliteContextBackend::connect(
                    &config.database_url,
                    config.max_connections,
                    config.ttl,
                )
                .await?;
                Ok(Self::new(Arc::new(backend)))
            }
            #[cfg(not(feature = "sqlite"))]
            ContextBackendKind::Sqlite => Err(ContextStoreError::ConfigError(
                "sqlite backend requested but the `sqlite` feature is disabled".to_string(),
            )),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn save(&self, context: ExecutionContext) -> ContextStoreResult<()> {
        debug!(run_id = %context.run_id, status = %context.status, "Saving context");
        self.backend.save(context).await
    }

    pub async fn get(&self, run_id: &RunId) -> ContextStoreResult<Option<ExecutionContext>> {
        self.backend.get(run_id).await
    }

    /// Merge `update` into the stored context; `false` when the run is unknown
    pub async fn update(&self, run_id: &RunId, update: ContextUpdate) -> ContextStoreResult<bool> {
        let updated = self.backend.update(run_id, &update).await?;
        if !updated {
            debug!(run_id = %run_id, "Ignoring update for unknown context");
        }
        Ok(updated)
    }

    pub async fn delete(&self, run_id: &RunId) -> ContextStoreResult<bool> {
        self.backend.delete(run_id).await
    }

    pub async fn list(
        &self,
        filter: &ContextFilter,
        limit: usize,
        offset: usize,
    ) -> ContextStoreResult<Vec<ExecutionContext>> {
        self.backend.list(filter, limit, offset).await
    }

    pub async fn count(&self, filter: &ContextFilter) -> ContextStoreResult<usize> {
        self.backend.count(filter).await
    }

    pub async fn purge_expired(&self) -> ContextStoreResult<usize> {
        let purged = self.backend.purge_expired().await?;
        if purged > 0 {
            debug!(purged, backend = self.backend.name(), "Purged expired contexts");
        }
        Ok(purged)
    }

    pub async fn health_check(&self) -> ContextStoreResult<()> {
        self.backend.health_check().await
    }

    /// Start a background task purging expired contexts every `interval`
    pub fn start_purge_task(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                if let Err(e) = store.purge_expired().await {
                    warn!(error = %e, "Failed to purge expired contexts");
                }
            }
        })
    }
}

impl std::fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStore")
            .field("backend", &self.backend.name())
            .finish()
    }
}
