//! Mock implementations for testing
//!
//! Mocks of the storage seams using the mockall framework, for exercising
//! callers against store faults.

use async_trait::async_trait;
use mockall::mock;
use toolrun_core::RunId;

use crate::backend::ContextBackend;
use crate::context::{ContextFilter, ContextUpdate, ExecutionContext};
use crate::error::ContextStoreResult;

mock! {
    pub ContextBackend {}

    #[async_trait]
    impl ContextBackend for ContextBackend {
        fn name(&self) -> &'static str;
        async fn save(&self, context: ExecutionContext) -> ContextStoreResult<()>;
        async fn get(&self, run_id: &RunId) -> ContextStoreResult<Option<ExecutionContext>>;
        async fn update(&self, run_id: &RunId, update: &ContextUpdate) -> ContextStoreResult<bool>;
        async fn delete(&self, run_id: &RunId) -> ContextStoreResult<bool>;
        async fn list(
            &self,
            filter: &ContextFilter,
            limit: usize,
            offset: usize,
        ) -> ContextStoreResult<Vec<ExecutionContext>>;
        async fn count(&self, filter: &ContextFilter) -> ContextStoreResult<usize>;
        async fn purge_expired(&self) -> ContextStoreResult<usize>;
        async fn health_check(&self) -> ContextStoreResult<()>;
    }
}
