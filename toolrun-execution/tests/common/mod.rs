//! Scripted container runtime for executor tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use toolrun_core::{RunId, RunStatus};
use toolrun_events::{Event, Subscription};
use toolrun_execution::{
    ContainerHandle, ContainerRuntime, ContainerSpec, ContainerState, ExecutorOptions, LogStream,
    RuntimeError, RuntimeResult, ToolExecutor,
};
use toolrun_events::{EventStreamer, StreamerOptions};
use toolrun_storage::ContextStore;

/// Exit code reported for a container that was stopped
pub const STOPPED_EXIT_CODE: i64 = 137;

/// What a scripted container prints and how it ends
#[derive(Debug, Clone, Default)]
pub struct ToolScript {
    pub lines: Vec<String>,
    pub line_delay: Duration,
    pub exit_code: i64,
    /// Keep running after the last line until stopped
    pub hang: bool,
}

impl ToolScript {
    pub fn lines(lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            line_delay: Duration::from_millis(5),
            ..Default::default()
        }
    }

    pub fn exit_code(mut self, exit_code: i64) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn hang(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn line_delay(mut self, delay: Duration) -> Self {
        self.line_delay = delay;
        self
    }

    fn runtime(&self) -> Duration {
        self.line_delay * self.lines.len() as u32
    }
}

/// A runtime call, as observed by the fake
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    EnsureNetwork(String),
    ImageExists(String),
    Pull(String),
    Run(ContainerSpec),
    StreamLogs(String),
    Stop(String),
    Remove(String),
}

struct Container {
    script: ToolScript,
    started: Instant,
    stopped: watch::Sender<bool>,
    removed: bool,
}

/// In-process stand-in for a container engine
///
/// Images are registered with a [`ToolScript`]; a launched container prints
/// the script's lines and exits with its code, or runs until stopped.
#[derive(Default)]
pub struct ScriptedRuntime {
    scripts: Mutex<HashMap<String, ToolScript>>,
    local_images: Mutex<HashSet<String>>,
    pull_delay: Mutex<Duration>,
    remove_delay: Mutex<Duration>,
    network_failure: Mutex<Option<RuntimeError>>,
    launch_failure: Mutex<Option<RuntimeError>>,
    containers: Mutex<HashMap<String, Container>>,
    calls: Mutex<Vec<Call>>,
    next_id: AtomicU64,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// An image the registry can serve but that is not present locally
    pub fn with_tool(self, image: &str, script: ToolScript) -> Self {
        self.scripts.lock().insert(image.to_string(), script);
        self
    }

    /// An image already present locally
    pub fn with_local_tool(self, image: &str, script: ToolScript) -> Self {
        self.local_images.lock().insert(image.to_string());
        self.with_tool(image, script)
    }

    pub fn with_pull_delay(self, delay: Duration) -> Self {
        *self.pull_delay.lock() = delay;
        self
    }

    pub fn with_remove_delay(self, delay: Duration) -> Self {
        *self.remove_delay.lock() = delay;
        self
    }

    pub fn with_network_failure(self, error: RuntimeError) -> Self {
        *self.network_failure.lock() = Some(error);
        self
    }

    pub fn with_launch_failure(self, error: RuntimeError) -> Self {
        *self.launch_failure.lock() = Some(error);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn launched(&self) -> Vec<ContainerSpec> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Run(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }

    pub fn pulls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Pull(_)))
            .count()
    }

    pub fn stops(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Stop(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn removals(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Remove(_)))
            .count()
    }

    pub fn was_removed(&self, container_id: &str) -> bool {
        self.containers
            .lock()
            .get(container_id)
            .is_some_and(|c| c.removed)
    }

    /// Containers created and not yet removed
    pub fn live_containers(&self) -> usize {
        self.containers.lock().values().filter(|c| !c.removed).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn ensure_network(&self, network: &str) -> RuntimeResult<()> {
        self.record(Call::EnsureNetwork(network.to_string()));
        match self.network_failure.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn image_exists(&self, image: &str) -> RuntimeResult<bool> {
        self.record(Call::ImageExists(image.to_string()));
        Ok(self.local_images.lock().contains(image))
    }

    async fn pull_image(&self, image: &str) -> RuntimeResult<()> {
        self.record(Call::Pull(image.to_string()));
        let delay = *self.pull_delay.lock();
        tokio::time::sleep(delay).await;

        if !self.scripts.lock().contains_key(image) {
            return Err(RuntimeError::ImageNotFound(image.to_string()));
        }
        self.local_images.lock().insert(image.to_string());
        Ok(())
    }

    async fn run(&self, spec: &ContainerSpec) -> RuntimeResult<ContainerHandle> {
        self.record(Call::Run(spec.clone()));
        if let Some(error) = self.launch_failure.lock().clone() {
            return Err(error);
        }

        let script = self
            .scripts
            .lock()
            .get(&spec.image)
            .cloned()
            .ok_or_else(|| RuntimeError::ImageNotFound(spec.image.clone()))?;

        let id = format!("container-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let (stopped, _) = watch::channel(false);
        self.containers.lock().insert(
            id.clone(),
            Container {
                script,
                started: Instant::now(),
                stopped,
                removed: false,
            },
        );

        Ok(ContainerHandle {
            id,
            name: spec.name.clone(),
        })
    }

    async fn stream_logs(&self, container_id: &str) -> RuntimeResult<LogStream> {
        self.record(Call::StreamLogs(container_id.to_string()));
        let (script, mut stopped) = {
            let containers = self.containers.lock();
            let container = containers
                .get(container_id)
                .ok_or_else(|| RuntimeError::ContainerNotFound(container_id.to_string()))?;
            (container.script.clone(), container.stopped.subscribe())
        };

        let delay = script.line_delay;
        let printed = stream::iter(script.lines).then(move |line| async move {
            tokio::time::sleep(delay).await;
            Ok(line)
        });
        let tail: BoxStream<'static, RuntimeResult<String>> = if script.hang {
            stream::pending().boxed()
        } else {
            stream::empty().boxed()
        };
        let until_stopped = async move {
            loop {
                if *stopped.borrow_and_update() {
                    break;
                }
                if stopped.changed().await.is_err() {
                    break;
                }
            }
        };

        Ok(printed.chain(tail).take_until(until_stopped).boxed())
    }

    async fn inspect(&self, container_id: &str) -> RuntimeResult<ContainerState> {
        let containers = self.containers.lock();
        let container = containers
            .get(container_id)
            .filter(|c| !c.removed)
            .ok_or_else(|| RuntimeError::ContainerNotFound(container_id.to_string()))?;

        if *container.stopped.borrow() {
            return Ok(ContainerState::Exited {
                exit_code: STOPPED_EXIT_CODE,
            });
        }
        if container.script.hang || container.started.elapsed() < container.script.runtime() {
            return Ok(ContainerState::Running);
        }
        Ok(ContainerState::Exited {
            exit_code: container.script.exit_code,
        })
    }

    async fn stop(&self, container_id: &str, _grace: Duration) -> RuntimeResult<()> {
        self.record(Call::Stop(container_id.to_string()));
        let containers = self.containers.lock();
        let container = containers
            .get(container_id)
            .ok_or_else(|| RuntimeError::ContainerNotFound(container_id.to_string()))?;
        container.stopped.send_replace(true);
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> RuntimeResult<()> {
        self.record(Call::Remove(container_id.to_string()));
        let delay = *self.remove_delay.lock();
        tokio::time::sleep(delay).await;

        if let Some(container) = self.containers.lock().get_mut(container_id) {
            container.stopped.send_replace(true);
            container.removed = true;
        }
        Ok(())
    }

    async fn health_check(&self) -> RuntimeResult<()> {
        Ok(())
    }
}

/// Options with short intervals so runs finish quickly
pub fn fast_options() -> ExecutorOptions {
    ExecutorOptions {
        poll_interval: Duration::from_millis(10),
        stop_grace_period: Duration::from_millis(300),
        default_timeout: Duration::from_secs(10),
        ..ExecutorOptions::default()
    }
}

pub fn streamer() -> EventStreamer {
    EventStreamer::new(StreamerOptions {
        keepalive_interval: Duration::from_secs(30),
        subscriber_queue_capacity: 64,
    })
}

pub fn executor(runtime: Arc<ScriptedRuntime>) -> ToolExecutor {
    executor_with(runtime, ContextStore::in_memory(None), fast_options())
}

pub fn executor_with(
    runtime: Arc<ScriptedRuntime>,
    store: ContextStore,
    options: ExecutorOptions,
) -> ToolExecutor {
    toolrun_logging::init_test_logging();
    ToolExecutor::new(runtime, store, streamer(), options)
}

/// Collect a subscription's events up to and including the terminal status
pub async fn events_until_terminal(subscription: &mut Subscription) -> Vec<Event> {
    let collect = async {
        let mut events = Vec::new();
        while let Some(event) = subscription.next_event().await {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    };
    tokio::time::timeout(Duration::from_secs(10), collect)
        .await
        .expect("run did not reach a terminal state")
}

/// The statuses announced by `events`, in order
pub fn statuses(events: &[Event]) -> Vec<RunStatus> {
    events.iter().filter_map(Event::status).collect()
}

/// Poll until the run reports `status`
pub async fn wait_for_status(executor: &ToolExecutor, run_id: &RunId, status: RunStatus) {
    let wait = async {
        loop {
            if executor.status(run_id).await.map(|e| e.status) == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("run never reached the expected status");
}
