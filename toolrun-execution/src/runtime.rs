//! Container runtime abstraction

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::RuntimeResult;

/// Stream of a container's output, one line per item without the newline
pub type LogStream = BoxStream<'static, RuntimeResult<String>>;

/// Everything needed to launch one tool container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Environment, in the order it should be applied
    pub env: Vec<(String, String)>,
    pub network: String,
    pub auto_remove: bool,
    pub labels: HashMap<String, String>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            env: Vec::new(),
            network: network.into(),
            auto_remove: false,
            labels: HashMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A launched container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
}

/// Observed container state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Exited { exit_code: i64 },
}

impl ContainerState {
    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running)
    }
}

/// Operations the executor needs from a container engine
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    fn name(&self) -> &'static str;

    /// Create `network` unless it already exists
    async fn ensure_network(&self, network: &str) -> RuntimeResult<()>;

    async fn image_exists(&self, image: &str) -> RuntimeResult<bool>;

    /// Pull `image`; `RuntimeError::ImageNotFound` when no registry has it
    async fn pull_image(&self, image: &str) -> RuntimeResult<()>;

    /// Create and start a container
    async fn run(&self, spec: &ContainerSpec) -> RuntimeResult<ContainerHandle>;

    /// Follow the container's stdout and stderr from the start
    async fn stream_logs(&self, container_id: &str) -> RuntimeResult<LogStream>;

    async fn inspect(&self, container_id: &str) -> RuntimeResult<ContainerState>;

    /// Ask the container to stop, killing it after `grace`
    async fn stop(&self, container_id: &str, grace: Duration) -> RuntimeResult<()>;

    /// Force-remove the container; removing an unknown container succeeds
    async fn remove(&self, container_id: &str) -> RuntimeResult<()>;

    async fn health_check(&self) -> RuntimeResult<()>;
}
