//! Tool executor
//!
//! [`ToolExecutor`] accepts run requests, drives each run's container
//! through its lifecycle on an independent task, and answers status,
//! cancellation and subscription queries. Runs stay in an in-memory table
//! until [`ToolExecutor::forget`] drops them; their persisted context
//! outlives that according to the store's TTL.

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value as JsonValue};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use toolrun_config::{ExecutionConfig, ToolrunConfig};
use toolrun_core::{
    CancelRequest, CancelResponse, ExecuteRequest, RunId, RunStatus, StatusResponse, ToolExecution,
};
use toolrun_events::{EventStreamer, EventType, Subscription};
use toolrun_storage::{ContextFilter, ContextStore, ExecutionContext};
use tracing::{debug, info, warn};

use crate::cancellation::CancellationRegistry;
use crate::error::{ExecutorError, ExecutorResult};
use crate::runtime::ContainerRuntime;

/// Executor tunables, normally taken from [`ExecutionConfig`]
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub network: String,
    pub default_timeout: Duration,
    pub stop_grace_period: Duration,
    pub poll_interval: Duration,
    pub image_prefix: String,
    pub default_version: String,
    pub container_name_prefix: String,
    pub status_log_tail: usize,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self::from(&ExecutionConfig::default())
    }
}

impl From<&ExecutionConfig> for ExecutorOptions {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            network: config.container_network.clone(),
            default_timeout: config.default_timeout,
            stop_grace_period: config.stop_grace_period,
            poll_interval: config.poll_interval,
            image_prefix: config.image_prefix.clone(),
            default_version: config.default_version.clone(),
            container_name_prefix: config.container_name_prefix.clone(),
            status_log_tail: config.status_log_tail,
        }
    }
}

/// Mutable state of one run, shared by its task and status queries
pub(crate) struct RunState {
    pub(crate) execution: ToolExecution,
    /// Last valid `RESULT:` payload seen so far
    pub(crate) result: Option<Map<String, JsonValue>>,
    /// The container exited before any cancellation; the outcome is settled
    pub(crate) exited: bool,
}

pub(crate) type SharedRun = Arc<Mutex<RunState>>;

pub(crate) struct ExecutorInner {
    pub(crate) options: ExecutorOptions,
    pub(crate) runtime: Arc<dyn ContainerRuntime>,
    pub(crate) registry: Arc<CancellationRegistry>,
    pub(crate) store: ContextStore,
    pub(crate) streamer: EventStreamer,
    runs: RwLock<HashMap<RunId, SharedRun>>,
    purge_task: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutorInner {
    pub(crate) fn publish_status(&self, run_id: &RunId, status: RunStatus, message: &str) {
        self.streamer.publish(
            run_id,
            EventType::Status,
            json!({ "status": status.as_str(), "message": message }),
        );
    }
}

impl Drop for ExecutorInner {
    fn drop(&mut self) {
        if let Some(task) = self.purge_task.get_mut().take() {
            task.abort();
        }
    }
}

/// Runs tools in containers
///
/// Cheap to clone; clones share runs, store and streamer.
#[derive(Clone)]
pub struct ToolExecutor {
    inner: Arc<ExecutorInner>,
}

impl ToolExecutor {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        store: ContextStore,
        streamer: EventStreamer,
        options: ExecutorOptions,
    ) -> Self {
        Self::with_registry(runtime, store, streamer, options, Arc::new(CancellationRegistry::new()))
    }

    pub fn with_registry(
        runtime: Arc<dyn ContainerRuntime>,
        store: ContextStore,
        streamer: EventStreamer,
        options: ExecutorOptions,
        registry: Arc<CancellationRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                options,
                runtime,
                registry,
                store,
                streamer,
                runs: RwLock::new(HashMap::new()),
                purge_task: Mutex::new(None),
            }),
        }
    }

    /// Build the store and streamer described by `config` around `runtime`.
    ///
    /// When the store has a TTL, expired contexts are purged in the
    /// background for as long as the executor lives.
    pub async fn from_config(
        config: &ToolrunConfig,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> ExecutorResult<Self> {
        let store = ContextStore::from_config(&config.context_store).await?;
        let streamer = EventStreamer::from_config(&config.streaming);
        let executor = Self::new(
            runtime,
            store,
            streamer,
            ExecutorOptions::from(&config.execution),
        );

        if config.context_store.ttl.is_some() {
            let task = executor
                .inner
                .store
                .start_purge_task(config.context_store.purge_interval);
            *executor.inner.purge_task.lock() = Some(task);
        }

        info!(
            runtime = executor.inner.runtime.name(),
            store = executor.inner.store.backend_name(),
            network = %executor.inner.options.network,
            "Tool executor ready"
        );
        Ok(executor)
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.inner.options
    }

    pub fn store(&self) -> &ContextStore {
        &self.inner.store
    }

    pub fn streamer(&self) -> &EventStreamer {
        &self.inner.streamer
    }

    pub fn registry(&self) -> &Arc<CancellationRegistry> {
        &self.inner.registry
    }

    /// Accept a run and start it on its own task.
    ///
    /// Fails only if the run id is already known to this executor; every
    /// later failure is recorded on the run itself. Must be called from
    /// within a Tokio runtime.
    pub fn submit(&self, request: ExecuteRequest) -> ExecutorResult<RunHandle> {
        let inner = &self.inner;
        let run_id = request
            .run_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(RunId::from)
            .unwrap_or_default();
        let timeout = request.effective_timeout(inner.options.default_timeout);

        let execution = ToolExecution::new(run_id.clone(), request.tool_name, timeout)
            .with_version(request.tool_version)
            .with_parameters(request.parameters)
            .with_context_id(request.context_id);
        let tool_name = execution.tool_name.clone();
        let run = Arc::new(Mutex::new(RunState {
            execution,
            result: None,
            exited: false,
        }));

        let token = {
            let mut runs = inner.runs.write();
            if runs.contains_key(&run_id) {
                return Err(ExecutorError::RunAlreadyExists(run_id));
            }
            let token = inner.registry.try_create(&run_id)?;
            runs.insert(run_id.clone(), run.clone());
            token
        };

        let streamer = inner.streamer.clone();
        token.register_callback(move |run_id| {
            streamer.publish(
                run_id,
                EventType::Log,
                json!({ "level": "warn", "message": "Cancellation requested" }),
            );
        });

        inner.publish_status(&run_id, RunStatus::Queued, "Tool execution queued");
        info!(
            run_id = %run_id,
            tool = %tool_name,
            timeout_secs = timeout.as_secs(),
            "Run accepted"
        );

        let join = tokio::spawn(inner.clone().run(run, token));
        Ok(RunHandle { run_id, join })
    }

    /// Submit a run and wait for it to finish
    pub async fn execute(&self, request: ExecuteRequest) -> ExecutorResult<ToolExecution> {
        self.submit(request)?.wait().await
    }

    /// Request cancellation of an active run.
    ///
    /// Returns `false` for unknown runs, terminal runs, runs whose container
    /// has already exited and runs already being cancelled.
    pub fn cancel(&self, run_id: &RunId) -> bool {
        let Some(run) = self.live_run(run_id) else {
            debug!(run_id = %run_id, "Cancel requested for unknown run");
            return false;
        };

        // Held while cancelling so the run cannot turn terminal in between
        let state = run.lock();
        if state.execution.is_terminal() || state.exited {
            debug!(run_id = %run_id, status = %state.execution.status, "Run already finishing, cancel ignored");
            return false;
        }
        let accepted = self.inner.registry.cancel(run_id);
        if accepted {
            info!(run_id = %run_id, status = %state.execution.status, "Cancellation requested");
        }
        accepted
    }

    /// Transport form of [`cancel`](Self::cancel)
    pub async fn cancel_request(&self, request: &CancelRequest) -> CancelResponse {
        if self.cancel(&request.run_id) {
            return CancelResponse::accepted(request.run_id.clone());
        }
        let status = self.status(&request.run_id).await.map(|e| e.status);
        CancelResponse::rejected(request.run_id.clone(), status)
    }

    /// Current view of a run, falling back to its stored context
    pub async fn status(&self, run_id: &RunId) -> Option<ToolExecution> {
        if let Some(run) = self.live_run(run_id) {
            return Some(run.lock().execution.clone());
        }

        match self.inner.store.get(run_id).await {
            Ok(context) => context.map(|c| c.to_execution(self.inner.options.default_timeout)),
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Failed to load run context");
                None
            }
        }
    }

    /// Transport form of [`status`](Self::status)
    pub async fn status_response(&self, run_id: &RunId) -> Option<StatusResponse> {
        let execution = self.status(run_id).await?;
        Some(StatusResponse::from_execution(
            &execution,
            self.inner.options.status_log_tail,
        ))
    }

    /// Stored contexts matching `filter`, newest first
    pub async fn list_runs(
        &self,
        filter: &ContextFilter,
        limit: usize,
        offset: usize,
    ) -> ExecutorResult<Vec<ExecutionContext>> {
        Ok(self.inner.store.list(filter, limit, offset).await?)
    }

    /// Subscribe to a run's events; see [`EventStreamer::subscribe`]
    pub fn subscribe(&self, run_id: &RunId, include_history: bool) -> Subscription {
        self.inner.streamer.subscribe(run_id, include_history)
    }

    /// Drop a terminal run from memory along with its retained events.
    ///
    /// Its stored context is kept. Returns `false` for unknown or active runs.
    pub fn forget(&self, run_id: &RunId) -> bool {
        let mut runs = self.inner.runs.write();
        let terminal = runs
            .get(run_id)
            .is_some_and(|run| run.lock().execution.is_terminal());
        if !terminal {
            return false;
        }
        runs.remove(run_id);
        drop(runs);

        self.inner.streamer.clear(run_id);
        debug!(run_id = %run_id, "Forgot run");
        true
    }

    /// Runs that have not reached a terminal state
    pub fn active_runs(&self) -> usize {
        self.inner
            .runs
            .read()
            .values()
            .filter(|run| !run.lock().execution.is_terminal())
            .count()
    }

    /// Check the container runtime and the context store
    pub async fn health_check(&self) -> ExecutorResult<()> {
        self.inner.runtime.health_check().await?;
        self.inner.store.health_check().await?;
        Ok(())
    }

    fn live_run(&self, run_id: &RunId) -> Option<SharedRun> {
        self.inner.runs.read().get(run_id).cloned()
    }
}

impl fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("runtime", &self.inner.runtime.name())
            .field("store", &self.inner.store)
            .field("runs", &self.inner.runs.read().len())
            .finish()
    }
}

/// Handle to a submitted run
#[derive(Debug)]
pub struct RunHandle {
    run_id: RunId,
    join: JoinHandle<ToolExecution>,
}

impl RunHandle {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the run to reach a terminal state
    pub async fn wait(self) -> ExecutorResult<ToolExecution> {
        self.join
            .await
            .map_err(|e| ExecutorError::TaskFailed(e.to_string()))
    }
}
