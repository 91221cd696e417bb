// crates/core/src/execution.rs
//! Orchestrates one batch execution end to end: dedupe and debounce, submit
//! and poll through [`TaskPoller`], drive the progress narrative, and
//! reconcile the outcome into the [`AppStore`].

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use netops_types::{BatchRequest, ExecutionMode, ExecutionStage, TaskResult};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::api::TaskApi;
use crate::config::{AppConfig, ExecutionConfig, ProgressConfig};
use crate::error::ExecutionError;
use crate::poller::{PollEvent, PollOptions, TaskPoller};
use crate::progress::{spawn_simulation, spawn_stage_narrative, stage_message};
use crate::store::{AppStore, Epoch};

const QUOTA_MESSAGE: &str =
    "The AI service quota is exhausted. Check the API plan or try again later.";
const AUTH_MESSAGE: &str =
    "The AI service rejected its credentials. Check the API key configuration.";
const NETWORK_MESSAGE: &str =
    "Could not reach the backend. Check the network connection and try again.";

/// Map known backend failure texts to user-facing wording. Anything not
/// recognised is returned unchanged.
pub fn friendly_error_message(raw: &str) -> String {
    let lower = raw.to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if any(&["insufficient_quota", "quota", "rate limit", "429"]) {
        QUOTA_MESSAGE.to_string()
    } else if any(&["401", "unauthorized", "authentication", "invalid api key", "api key"]) {
        AUTH_MESSAGE.to_string()
    } else if any(&["network error", "connection refused", "failed to fetch", "econnrefused"]) {
        NETWORK_MESSAGE.to_string()
    } else {
        raw.to_string()
    }
}

struct Inner {
    api: Arc<dyn TaskApi>,
    store: AppStore,
    poller: TaskPoller,
    progress: ProgressConfig,
    execution: ExecutionConfig,
    current: Mutex<Option<CancellationToken>>,
}

/// Cloneable handle; clones share the poller, the store and the current
/// execution's cancellation token.
#[derive(Clone)]
pub struct ExecutionCore {
    inner: Arc<Inner>,
}

impl ExecutionCore {
    pub fn new(api: Arc<dyn TaskApi>, store: AppStore, config: &AppConfig) -> Self {
        let poller = TaskPoller::new(api.clone(), config.poller.clone());
        Self {
            inner: Arc::new(Inner {
                api,
                store,
                poller,
                progress: config.progress.clone(),
                execution: config.execution.clone(),
                current: Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> &AppStore {
        &self.inner.store
    }

    pub fn poller(&self) -> &TaskPoller {
        &self.inner.poller
    }

    /// Run one batch to completion.
    ///
    /// Returns [`ExecutionError::Cancelled`] if the execution was cancelled
    /// or superseded while in flight; in that case the store is left to
    /// whoever moved it on. Dropping the future before it resolves cancels
    /// the execution as [`cancel`](Self::cancel) would.
    pub async fn execute(&self, request: BatchRequest) -> Result<TaskResult, ExecutionError> {
        if request.devices.is_empty() {
            return Err(ExecutionError::NoDevices);
        }
        if request.command.trim().is_empty() {
            return Err(ExecutionError::EmptyCommand);
        }

        let inner = &self.inner;
        let device_count = request.devices.len();
        let mode = request.mode;
        let epoch = inner.store.try_begin_execution(
            device_count,
            stage_message(ExecutionStage::Submitting, mode, device_count),
            inner.execution.debounce_delay,
        )?;

        let token = CancellationToken::new();
        self.install_token(token.clone());
        let mut guard = ExecutionGuard {
            core: self,
            epoch,
            mode,
            token: token.clone(),
            settled: false,
        };
        // A cancel may have landed between taking the lock and installing
        // the token.
        if !inner.store.is_current(epoch) {
            token.cancel();
        }

        tracing::info!(
            epoch = epoch.value(),
            devices = device_count,
            mode = mode.as_str(),
            "starting batch execution"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(forward_events(
            inner.store.clone(),
            epoch,
            device_count,
            mode,
            inner.progress.clone(),
            token.clone(),
            rx,
        ));

        let options = PollOptions::new(mode)
            .with_events(tx)
            .with_parent(token.clone());
        let outcome = inner.poller.execute_and_wait(&request, &options).await;
        drop(options);

        if let Err(e) = forwarder.await {
            tracing::error!("progress forwarder panicked: {e}");
        }
        // Stops the narrative and the simulation.
        guard.settle();

        match outcome {
            Ok(result) => {
                let summary = result.summary();
                let message = format!(
                    "Execution completed: {} succeeded, {} failed",
                    summary.successful, summary.failed
                );
                if !inner.store.finish_success(epoch, &result, message) {
                    return Err(ExecutionError::Cancelled);
                }
                tracing::info!(
                    epoch = epoch.value(),
                    total = summary.total,
                    successful = summary.successful,
                    failed = summary.failed,
                    "batch execution completed"
                );
                self.schedule_clear(epoch, inner.execution.success_clear_delay);
                Ok(result)
            }
            Err(err) => {
                let message = friendly_error_message(&err.to_string());
                if !inner.store.finish_failure(epoch, message) {
                    return Err(ExecutionError::Cancelled);
                }
                tracing::warn!(epoch = epoch.value(), error = %err, "batch execution failed");
                self.schedule_clear(epoch, inner.execution.error_clear_delay);
                Err(err.into())
            }
        }
    }

    /// Cancel the running execution, if any. The backend cancel request
    /// and the scheduled clear run on the ambient tokio runtime; without one
    /// they are skipped and only the store is updated.
    pub fn cancel(&self) -> bool {
        let inner = &self.inner;
        let Some((epoch, task_id)) = inner.store.cancel_execution(stage_message(
            ExecutionStage::Cancelled,
            ExecutionMode::default(),
            0,
        )) else {
            return false;
        };

        if let Some(token) = self.take_token() {
            token.cancel();
        }
        inner.poller.cancel();
        tracing::info!(epoch = epoch.value(), task_id = ?task_id, "execution cancelled");

        self.after_cancel(epoch, task_id);
        true
    }

    /// Ask the backend to drop `task_id` and schedule the progress clear.
    fn after_cancel(&self, epoch: Epoch, task_id: Option<String>) {
        if let Some(task_id) = task_id {
            let api = self.inner.api.clone();
            spawn_detached("backend cancel", async move {
                match api.cancel_task(&task_id).await {
                    Ok(_) => tracing::debug!(task_id = %task_id, "backend task cancelled"),
                    Err(e) => tracing::warn!(task_id = %task_id, error = %e, "backend cancel failed"),
                }
            });
        }
        self.schedule_clear(epoch, self.inner.execution.success_clear_delay);
    }

    /// Manual clear; refused while an execution is running.
    pub fn clear_results(&self) -> bool {
        self.inner.store.clear_results()
    }

    fn schedule_clear(&self, epoch: Epoch, delay: Duration) {
        let store = self.inner.store.clone();
        spawn_detached("progress clear", async move {
            sleep(delay).await;
            if store.clear_progress(epoch) {
                tracing::debug!(epoch = epoch.value(), "progress cleared");
            }
        });
    }

    fn install_token(&self, token: CancellationToken) {
        let previous = match self.inner.current.lock() {
            Ok(mut current) => current.replace(token),
            Err(e) => {
                tracing::error!("Mutex poisoned installing execution token: {e}");
                None
            }
        };
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    fn take_token(&self) -> Option<CancellationToken> {
        match self.inner.current.lock() {
            Ok(mut current) => current.take(),
            Err(e) => {
                tracing::error!("Mutex poisoned taking execution token: {e}");
                None
            }
        }
    }

    /// Drop the installed token once it is spent. A newer execution's live
    /// token is left alone.
    fn release_token(&self) {
        if let Ok(mut current) = self.inner.current.lock() {
            if current.as_ref().is_some_and(CancellationToken::is_cancelled) {
                *current = None;
            }
        }
    }
}

/// Run `fut` on the current tokio runtime, or log and drop it when there is
/// none.
fn spawn_detached<F>(what: &'static str, fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(fut);
        }
        Err(_) => tracing::warn!(task = what, "no tokio runtime, background work skipped"),
    }
}

/// Owns the tail of one `execute` call. Dropped unsettled (the future was
/// dropped mid-flight) it cancels its epoch like [`ExecutionCore::cancel`].
struct ExecutionGuard<'a> {
    core: &'a ExecutionCore,
    epoch: Epoch,
    mode: ExecutionMode,
    token: CancellationToken,
    settled: bool,
}

impl ExecutionGuard<'_> {
    /// Stop the helper tasks; the caller reconciles the outcome.
    fn settle(&mut self) {
        self.settled = true;
        self.token.cancel();
        self.core.release_token();
    }
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.settle();

        let message = stage_message(ExecutionStage::Cancelled, self.mode, 0);
        let Some((epoch, task_id)) = self.core.inner.store.abandon_execution(self.epoch, message)
        else {
            return;
        };
        tracing::warn!(
            epoch = self.epoch.value(),
            task_id = ?task_id,
            "execution dropped before finishing, cancelling"
        );
        self.core.after_cancel(epoch, task_id);
    }
}

/// Apply poller events to the store until the poller drops its sender.
async fn forward_events(
    store: AppStore,
    epoch: Epoch,
    device_count: usize,
    mode: ExecutionMode,
    progress: ProgressConfig,
    token: CancellationToken,
    mut rx: mpsc::UnboundedReceiver<PollEvent>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            PollEvent::Submitted { task_id, message } => {
                store.set_current_task_id(epoch, task_id.as_str());
                let message = message
                    .unwrap_or_else(|| stage_message(ExecutionStage::Submitted, mode, device_count));
                store.apply_stage(epoch, ExecutionStage::Submitted, message, None);
                spawn_stage_narrative(
                    store.clone(),
                    epoch,
                    device_count,
                    mode,
                    &progress,
                    token.clone(),
                );
                spawn_simulation(
                    store.clone(),
                    epoch,
                    device_count,
                    mode,
                    &progress,
                    token.clone(),
                );
            }
            PollEvent::StageChanged {
                stage,
                percentage,
                label,
            } => {
                if !stage.is_terminal() {
                    // Stages the server skipped still show, in order.
                    for step in [ExecutionStage::Submitted, ExecutionStage::Connecting] {
                        if step.rank() < stage.rank() {
                            let message = stage_message(step, mode, device_count);
                            store.apply_stage(epoch, step, message, None);
                        }
                    }
                    let message =
                        label.unwrap_or_else(|| stage_message(stage, mode, device_count));
                    store.apply_stage(epoch, stage, message, Some(percentage));
                }
            }
            PollEvent::Progress(task) => {
                store.record_task(epoch, task);
            }
            PollEvent::Completed(_) | PollEvent::Error { .. } => {}
        }
    }
}
