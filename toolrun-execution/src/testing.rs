//! Mock implementations for testing
//!
//! A mockall mock of [`ContainerRuntime`] for asserting exactly which
//! runtime calls a run makes.

use async_trait::async_trait;
use mockall::mock;
use std::time::Duration;

use crate::error::RuntimeResult;
use crate::runtime::{ContainerHandle, ContainerRuntime, ContainerSpec, ContainerState, LogStream};

mock! {
    pub ContainerRuntime {}

    #[async_trait]
    impl ContainerRuntime for ContainerRuntime {
        fn name(&self) -> &'static str;
        async fn ensure_network(&self, network: &str) -> RuntimeResult<()>;
        async fn image_exists(&self, image: &str) -> RuntimeResult<bool>;
        async fn pull_image(&self, image: &str) -> RuntimeResult<()>;
        async fn run(&self, spec: &ContainerSpec) -> RuntimeResult<ContainerHandle>;
        async fn stream_logs(&self, container_id: &str) -> RuntimeResult<LogStream>;
        async fn inspect(&self, container_id: &str) -> RuntimeResult<ContainerState>;
        async fn stop(&self, container_id: &str, grace: Duration) -> RuntimeResult<()>;
        async fn remove(&self, container_id: &str) -> RuntimeResult<()>;
        async fn health_check(&self) -> RuntimeResult<()>;
    }
}
