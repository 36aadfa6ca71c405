//! Per-run container lifecycle
//!
//! A run moves through resolve, prepare, launch and supervise, then always
//! ends in `finish`, which releases the container, records the terminal
//! status, publishes it and saves the final context.

use futures::StreamExt;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use toolrun_core::{resolve_image, LogEntry, RunId, RunStatus, ToolError, ToolExecution};
use toolrun_events::EventType;
use toolrun_storage::{ContextUpdate, ExecutionContext};
use tracing::{debug, error, info, warn};

use crate::cancellation::CancellationToken;
use crate::error::RuntimeError;
use crate::executor::{ExecutorInner, SharedRun};
use crate::parser::{parse_line, LogLine};
use crate::runtime::{ContainerSpec, ContainerState};

/// Result recorded when a tool exits cleanly without a `RESULT:` line
pub const DEFAULT_RESULT_MESSAGE: &str = "Tool execution completed (no result)";

enum Outcome {
    Completed(JsonValue),
    Failed(ToolError),
    Cancelled,
}

enum Exit {
    Exited(i64),
    Cancelled,
    TimedOut,
    Lost(RuntimeError),
}

impl ExecutorInner {
    pub(crate) async fn run(
        self: Arc<Self>,
        run: SharedRun,
        token: Arc<CancellationToken>,
    ) -> ToolExecution {
        let run_id = token.run_id().clone();
        let outcome = self.drive(&run_id, &run, &token).await;
        self.finish(&run_id, &run, &token, outcome).await
    }

    async fn drive(
        self: &Arc<Self>,
        run_id: &RunId,
        run: &SharedRun,
        token: &CancellationToken,
    ) -> Outcome {
        let snapshot = run.lock().execution.clone();

        if let Err(e) = self
            .store
            .save(ExecutionContext::from_execution(&snapshot))
            .await
        {
            error!(run_id = %run_id, error = %e, "Failed to record initial run context");
            return Outcome::Failed(e.into());
        }

        let image = match resolve_image(
            &self.options.image_prefix,
            &snapshot.tool_name,
            snapshot.tool_version.as_deref(),
            &self.options.default_version,
        ) {
            Ok(image) => image.to_string(),
            Err(e) => {
                warn!(run_id = %run_id, tool = %snapshot.tool_name, error = %e, "Tool resolution failed");
                return Outcome::Failed(e);
            }
        };
        run.lock().execution.image = Some(image.clone());

        match self.prepare_image(run_id, &image, token).await {
            Ok(true) => {}
            Ok(false) => return Outcome::Cancelled,
            Err(e) => {
                warn!(run_id = %run_id, image = %image, error = %e, "Failed to prepare image");
                return Outcome::Failed(e.into());
            }
        }
        if token.is_cancellation_requested() {
            return Outcome::Cancelled;
        }

        let spec = self.container_spec(&snapshot, &image);
        let container = match self.runtime.run(&spec).await {
            Ok(container) => container,
            Err(e) => {
                warn!(run_id = %run_id, image = %image, error = %e, "Failed to launch container");
                return Outcome::Failed(e.into());
            }
        };
        run.lock().execution.container_id = Some(container.id.clone());
        info!(
            run_id = %run_id,
            container_id = %container.id,
            container = %container.name,
            image = %image,
            "Container started"
        );

        // Cancelled during launch; finish stops and removes the container
        if token.is_cancellation_requested() {
            return Outcome::Cancelled;
        }

        let start_time = {
            let mut state = run.lock();
            if let Err(e) = state.execution.transition(RunStatus::Running) {
                warn!(run_id = %run_id, error = %e, "Unexpected status transition");
            }
            state.execution.start_time
        };
        self.publish_status(run_id, RunStatus::Running, "Tool container started");
        self.update_context(
            run_id,
            ContextUpdate::new()
                .status(RunStatus::Running)
                .set("start_time", json!(start_time)),
        )
        .await;

        self.supervise(run_id, run, token, &container.id, snapshot.timeout)
            .await
    }

    /// Ensure the network and the image exist. `Ok(false)` when cancelled
    /// while pulling.
    async fn prepare_image(
        &self,
        run_id: &RunId,
        image: &str,
        token: &CancellationToken,
    ) -> Result<bool, RuntimeError> {
        self.runtime.ensure_network(&self.options.network).await?;

        if self.runtime.image_exists(image).await? {
            return Ok(true);
        }

        info!(run_id = %run_id, image = %image, "Image not present locally, pulling");
        tokio::select! {
            pulled = self.runtime.pull_image(image) => pulled.map(|()| true),
            _ = token.cancelled() => {
                debug!(run_id = %run_id, image = %image, "Pull abandoned on cancellation");
                Ok(false)
            }
        }
    }

    fn container_spec(&self, execution: &ToolExecution, image: &str) -> ContainerSpec {
        let run_id = execution.run_id.as_str();
        let mut spec = ContainerSpec::new(
            format!("{}{}", self.options.container_name_prefix, run_id),
            image,
            &self.options.network,
        )
        .with_env("RUN_ID", run_id)
        .with_env("PARAMETERS", execution.parameters.to_string());

        if let Some(context_id) = &execution.context_id {
            spec = spec.with_env("CONTEXT_ID", context_id);
        }

        spec.with_label("toolrun.run_id", run_id)
            .with_label("toolrun.tool", &execution.tool_name)
    }

    /// Watch the running container until it exits, the run is cancelled or
    /// the deadline passes. Logs are pumped on a separate task.
    async fn supervise(
        self: &Arc<Self>,
        run_id: &RunId,
        run: &SharedRun,
        token: &CancellationToken,
        container_id: &str,
        timeout: Duration,
    ) -> Outcome {
        let log_task = {
            let inner = self.clone();
            let run_id = run_id.clone();
            let run = run.clone();
            let container_id = container_id.to_string();
            tokio::spawn(async move { inner.pump_logs(&run_id, &run, &container_id).await })
        };

        // Too far out to represent means the run never times out
        let deadline = Instant::now().checked_add(timeout);
        let mut ticker = tokio::time::interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break Exit::Cancelled,
                _ = sleep_until_deadline(deadline) => break Exit::TimedOut,
                _ = ticker.tick() => match self.runtime.inspect(container_id).await {
                    Ok(ContainerState::Running) => {}
                    Ok(ContainerState::Exited { exit_code }) => {
                        if mark_exited(run, token) {
                            break Exit::Exited(exit_code);
                        }
                        break Exit::Cancelled;
                    }
                    Err(e) => break Exit::Lost(e),
                },
            }
        };

        match exit {
            Exit::Exited(exit_code) => {
                self.drain_logs(run_id, log_task).await;
                if exit_code != 0 {
                    warn!(run_id = %run_id, exit_code, "Container exited with error");
                    return Outcome::Failed(ToolError::ContainerExit { exit_code });
                }
                let result = run
                    .lock()
                    .result
                    .take()
                    .map(JsonValue::Object)
                    .unwrap_or_else(|| json!({ "message": DEFAULT_RESULT_MESSAGE }));
                Outcome::Completed(result)
            }
            Exit::Cancelled => {
                info!(run_id = %run_id, "Stopping container on cancellation");
                self.stop_container(run_id, container_id).await;
                self.drain_logs(run_id, log_task).await;
                Outcome::Cancelled
            }
            Exit::TimedOut => {
                warn!(run_id = %run_id, timeout_secs = timeout.as_secs(), "Run timed out");
                self.stop_container(run_id, container_id).await;
                self.drain_logs(run_id, log_task).await;
                Outcome::Failed(ToolError::ExecutionTimeout { timeout })
            }
            Exit::Lost(e) => {
                error!(run_id = %run_id, container_id = %container_id, error = %e, "Lost track of container");
                self.drain_logs(run_id, log_task).await;
                Outcome::Failed(e.into())
            }
        }
    }

    /// Give the log task up to the grace period to finish, then abort it
    async fn drain_logs(&self, run_id: &RunId, mut log_task: JoinHandle<()>) {
        if tokio::time::timeout(self.options.stop_grace_period, &mut log_task)
            .await
            .is_err()
        {
            debug!(run_id = %run_id, "Log stream still open after grace period, aborting");
            log_task.abort();
            let _ = log_task.await;
        }
    }

    async fn pump_logs(&self, run_id: &RunId, run: &SharedRun, container_id: &str) {
        let mut lines = match self.runtime.stream_logs(container_id).await {
            Ok(lines) => lines,
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Could not attach to container logs");
                return;
            }
        };

        while let Some(line) = lines.next().await {
            match line {
                Ok(line) => self.record_line(run_id, run, &line),
                Err(e) => {
                    warn!(run_id = %run_id, error = %e, "Container log stream failed");
                    break;
                }
            }
        }
        debug!(run_id = %run_id, "Container log stream ended");
    }

    fn record_line(&self, run_id: &RunId, run: &SharedRun, raw: &str) {
        let (message, progress, result) = match parse_line(raw) {
            LogLine::Blank => return,
            LogLine::Plain(line) => (line, None, None),
            LogLine::Progress { line, value } => (line, Some(value), None),
            LogLine::Result { line, value } => (line, None, Some(value)),
            LogLine::Malformed { line, reason } => {
                warn!(run_id = %run_id, reason = %reason, "Malformed tool output kept as log line");
                (line, None, None)
            }
        };

        let mut entry = LogEntry::info(message);
        if let Some(value) = progress {
            entry = entry.with_progress(value.clamp(0.0, 100.0));
        }

        let applied = {
            let mut state = run.lock();
            let applied = progress.and_then(|value| state.execution.record_progress(value));
            if let Some(result) = result {
                state.result = Some(result);
            }
            state.execution.append_log(entry.clone());
            applied
        };

        if let Some(progress) = applied {
            self.streamer
                .publish(run_id, EventType::Progress, json!({ "progress": progress }));
        }

        let mut data = json!({ "level": entry.level.as_str(), "message": entry.message });
        if let Some(progress) = entry.progress {
            data["progress"] = json!(progress);
        }
        self.streamer.publish(run_id, EventType::Log, data);
    }

    async fn stop_container(&self, run_id: &RunId, container_id: &str) {
        if let Err(e) = self
            .runtime
            .stop(container_id, self.options.stop_grace_period)
            .await
        {
            warn!(run_id = %run_id, container_id = %container_id, error = %e, "Failed to stop container");
        }
    }

    /// Stop the container if it still runs, force-remove it and clear it
    /// from the run
    async fn release_container(&self, run_id: &RunId, run: &SharedRun) {
        let container_id = run.lock().execution.container_id.clone();
        let Some(container_id) = container_id else {
            return;
        };

        match self.runtime.inspect(&container_id).await {
            Ok(ContainerState::Running) => self.stop_container(run_id, &container_id).await,
            Ok(ContainerState::Exited { .. }) => {}
            Err(e) => {
                debug!(run_id = %run_id, container_id = %container_id, error = %e, "Could not inspect container before removal");
            }
        }

        if let Err(e) = self.runtime.remove(&container_id).await {
            warn!(
                run_id = %run_id,
                container_id = %container_id,
                error = %e,
                "Failed to remove container (may require manual cleanup)"
            );
        }
        run.lock().execution.container_id = None;
    }

    async fn finish(
        &self,
        run_id: &RunId,
        run: &SharedRun,
        token: &CancellationToken,
        outcome: Outcome,
    ) -> ToolExecution {
        self.release_container(run_id, run).await;

        let (execution, outcome) = {
            let mut state = run.lock();
            // A cancel accepted before the container's exit was observed wins
            // over any other ending
            let outcome = match outcome {
                Outcome::Cancelled => Outcome::Cancelled,
                _ if token.is_cancellation_requested() && !state.exited => Outcome::Cancelled,
                other => other,
            };

            let recorded = match &outcome {
                Outcome::Completed(result) => state.execution.complete(result.clone()),
                Outcome::Failed(error) => state.execution.fail(error.to_run_error()),
                Outcome::Cancelled => state.execution.cancel(),
            };
            if let Err(e) = recorded {
                error!(run_id = %run_id, error = %e, "Could not record terminal status");
            }
            (state.execution.clone(), outcome)
        };

        match &outcome {
            Outcome::Completed(result) => {
                self.streamer
                    .publish(run_id, EventType::Result, json!({ "result": result }));
                self.publish_status(run_id, RunStatus::Completed, "Tool execution completed");
                info!(run_id = %run_id, "Run completed");
            }
            Outcome::Failed(error) => {
                self.streamer.publish(
                    run_id,
                    EventType::Error,
                    json!({ "error": error.to_run_error() }),
                );
                self.publish_status(run_id, RunStatus::Failed, &error.to_string());
                warn!(run_id = %run_id, kind = %error.kind(), error = %error, "Run failed");
            }
            Outcome::Cancelled => {
                self.publish_status(run_id, RunStatus::Cancelled, "Tool execution cancelled");
                info!(run_id = %run_id, "Run cancelled");
            }
        }

        self.save_final_context(run_id, &execution).await;

        self.registry.remove(run_id);
        execution
    }

    /// Merge the terminal projection into the stored context, keeping fields
    /// other writers added. The whole context is saved when there is nothing
    /// to merge into or the merge fails.
    async fn save_final_context(&self, run_id: &RunId, execution: &ToolExecution) {
        let context = ExecutionContext::from_execution(execution);
        let merged = match context.to_update() {
            Ok(update) => self.store.update(run_id, update).await,
            Err(e) => Err(e),
        };
        match merged {
            Ok(true) => return,
            Ok(false) => debug!(run_id = %run_id, "No stored run context to merge into"),
            Err(e) => warn!(run_id = %run_id, error = %e, "Failed to merge final run context"),
        }

        if let Err(e) = self.store.save(context).await {
            error!(run_id = %run_id, error = %e, "Failed to save final run context");
        }
    }

    /// Mid-run context writes; failures are left for the final save
    async fn update_context(&self, run_id: &RunId, update: ContextUpdate) {
        match self.store.update(run_id, update).await {
            Ok(true) => {}
            Ok(false) => debug!(run_id = %run_id, "Run context missing on update"),
            Err(e) => warn!(run_id = %run_id, error = %e, "Failed to update run context"),
        }
    }
}

/// Record that the container exited on its own, unless a cancel got in
/// first. Later cancels are refused once this returns `true`.
fn mark_exited(run: &SharedRun, token: &CancellationToken) -> bool {
    let mut state = run.lock();
    if token.is_cancellation_requested() {
        return false;
    }
    state.exited = true;
    true
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
