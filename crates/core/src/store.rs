// crates/core/src/store.rs
//! Shared application state for one dashboard session.
//!
//! `AppStore` is an injected handle, not a global. Every write coming from a
//! deferred callback carries the [`Epoch`] captured when the callback was
//! scheduled and is applied only if it still matches, checked under the same
//! write lock that applies it. A new execution, a cancel or a manual clear
//! advances the epoch and thereby voids every older timer.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use netops_types::{
    BatchExecutionResult, BatchProgressState, ExecutionMode, ExecutionStage, ExecutionSummary,
    ProgressState, Task, TaskResult,
};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::error::ExecutionError;

/// Generation of the current execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(u64);

impl Epoch {
    pub fn value(self) -> u64 {
        self.0
    }

    fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusMessage {
    pub kind: StatusKind,
    pub text: String,
}

impl StatusMessage {
    pub fn new(kind: StatusKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppState {
    pub selected_devices: Vec<String>,
    pub input_text: String,
    pub execution_mode: ExecutionMode,
    pub is_executing: bool,
    pub last_started_at: Option<Instant>,
    pub epoch: Epoch,
    pub current_task_id: Option<String>,
    pub current_task: Option<Task>,
    pub progress: ProgressState,
    pub batch_progress: BatchProgressState,
    pub results: Vec<BatchExecutionResult>,
    pub summary: Option<ExecutionSummary>,
    pub status_message: Option<StatusMessage>,
}

/// Change notification fanned out to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    StageChanged {
        epoch: Epoch,
        stage: ExecutionStage,
        message: String,
    },
    BatchProgress(BatchProgressState),
    Results(ExecutionSummary),
    Status(StatusMessage),
    Cleared,
}

/// Cloneable handle to the shared state. Last write wins, except that
/// epoch-tagged writes from stale executions are dropped.
#[derive(Clone)]
pub struct AppStore {
    state: Arc<RwLock<AppState>>,
    events: broadcast::Sender<StoreEvent>,
}

impl AppStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: Arc::new(RwLock::new(AppState::default())),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> AppState {
        self.read().clone()
    }

    pub fn current_epoch(&self) -> Epoch {
        self.read().epoch
    }

    pub fn is_current(&self, epoch: Epoch) -> bool {
        self.read().epoch == epoch
    }

    pub fn is_executing(&self) -> bool {
        self.read().is_executing
    }

    pub fn set_selected_devices(&self, devices: Vec<String>) {
        self.write().selected_devices = devices;
    }

    pub fn set_input_text(&self, text: impl Into<String>) {
        self.write().input_text = text.into();
    }

    pub fn set_execution_mode(&self, mode: ExecutionMode) {
        self.write().execution_mode = mode;
    }

    /// Atomically take the execution lock: rejects if one is in flight or
    /// the previous start was less than `debounce` ago, otherwise advances
    /// the epoch and resets progress to `submitting`.
    pub fn try_begin_execution(
        &self,
        device_count: usize,
        message: impl Into<String>,
        debounce: Duration,
    ) -> Result<Epoch, ExecutionError> {
        let message = message.into();
        let now = Instant::now();
        let epoch = {
            let mut state = self.write();
            if state.is_executing {
                return Err(ExecutionError::AlreadyRunning);
            }
            if let Some(last) = state.last_started_at {
                let since = now.saturating_duration_since(last);
                if since < debounce {
                    return Err(ExecutionError::Debounced {
                        remaining: debounce - since,
                    });
                }
            }

            state.epoch = state.epoch.next();
            state.is_executing = true;
            state.last_started_at = Some(now);
            state.current_task_id = None;
            state.current_task = None;
            state.results.clear();
            state.summary = None;
            state.status_message = None;
            state.progress = ProgressState {
                visible: true,
                percentage: 0.0,
                stage: ExecutionStage::Submitting,
                message: message.clone(),
            };
            state.batch_progress = BatchProgressState {
                visible: true,
                total: device_count,
                completed: 0,
                stage: ExecutionStage::Submitting,
                message: message.clone(),
            };
            state.epoch
        };
        self.emit(StoreEvent::StageChanged {
            epoch,
            stage: ExecutionStage::Submitting,
            message,
        });
        Ok(epoch)
    }

    /// Advance to a non-terminal `stage`. Applied only for the current,
    /// still-running execution and only if `stage` ranks above the current
    /// one.
    pub fn apply_stage(
        &self,
        epoch: Epoch,
        stage: ExecutionStage,
        message: impl Into<String>,
        percentage: Option<f64>,
    ) -> bool {
        if stage.is_terminal() {
            return false;
        }
        let message = message.into();
        {
            let mut state = self.write();
            if state.epoch != epoch
                || !state.is_executing
                || stage.rank() <= state.progress.stage.rank()
            {
                return false;
            }
            state.progress.stage = stage;
            state.progress.message = message.clone();
            if let Some(pct) = percentage.filter(|p| p.is_finite()) {
                state.progress.percentage = state.progress.percentage.max(pct.clamp(0.0, 100.0));
            }
            state.batch_progress.stage = stage;
            state.batch_progress.message = message.clone();
        }
        self.emit(StoreEvent::StageChanged {
            epoch,
            stage,
            message,
        });
        true
    }

    pub fn set_current_task_id(&self, epoch: Epoch, task_id: impl Into<String>) -> bool {
        let mut state = self.write();
        if state.epoch != epoch || !state.is_executing {
            return false;
        }
        state.current_task_id = Some(task_id.into());
        true
    }

    /// Mirror a polled task into the state.
    pub fn record_task(&self, epoch: Epoch, task: Task) -> bool {
        let mut state = self.write();
        if state.epoch != epoch || !state.is_executing {
            return false;
        }
        let pct = task.progress.percentage;
        if pct.is_finite() {
            state.progress.percentage = state.progress.percentage.max(pct.clamp(0.0, 100.0));
        }
        state.current_task = Some(task);
        true
    }

    /// Write a simulated completed-device count. Never decreases the count
    /// nor exceeds the device total; rejected once the execution is over.
    pub fn set_simulated_completed(&self, epoch: Epoch, completed: usize) -> bool {
        let snapshot = {
            let mut state = self.write();
            if state.epoch != epoch
                || !state.is_executing
                || state.batch_progress.stage.is_terminal()
            {
                return false;
            }
            let next = completed
                .min(state.batch_progress.total)
                .max(state.batch_progress.completed);
            if next == state.batch_progress.completed {
                return true;
            }
            state.batch_progress.completed = next;
            state.batch_progress.clone()
        };
        self.emit(StoreEvent::BatchProgress(snapshot));
        true
    }

    /// Replace simulated progress with the real outcome.
    pub fn finish_success(&self, epoch: Epoch, outcome: &TaskResult, message: impl Into<String>) -> bool {
        let status = StatusMessage::new(StatusKind::Success, message);
        let summary = outcome.summary();
        let batch = {
            let mut state = self.write();
            if state.epoch != epoch || !state.is_executing {
                return false;
            }
            state.is_executing = false;
            state.results = outcome.results.clone();
            state.summary = Some(summary);
            state.progress.stage = ExecutionStage::Completed;
            state.progress.percentage = 100.0;
            state.progress.message = status.text.clone();
            state.batch_progress.stage = ExecutionStage::Completed;
            let total = state.batch_progress.total.max(summary.total);
            state.batch_progress.total = total;
            state.batch_progress.completed =
                summary.successful.saturating_add(summary.failed).min(total);
            state.batch_progress.message = status.text.clone();
            state.status_message = Some(status.clone());
            state.batch_progress.clone()
        };
        self.emit(StoreEvent::Results(summary));
        self.emit(StoreEvent::BatchProgress(batch));
        self.emit(StoreEvent::StageChanged {
            epoch,
            stage: ExecutionStage::Completed,
            message: status.text.clone(),
        });
        self.emit(StoreEvent::Status(status));
        true
    }

    pub fn finish_failure(&self, epoch: Epoch, message: impl Into<String>) -> bool {
        let status = StatusMessage::new(StatusKind::Error, message);
        {
            let mut state = self.write();
            if state.epoch != epoch || !state.is_executing {
                return false;
            }
            state.is_executing = false;
            state.progress.stage = ExecutionStage::Failed;
            state.progress.message = status.text.clone();
            state.batch_progress.stage = ExecutionStage::Failed;
            state.batch_progress.message = status.text.clone();
            state.status_message = Some(status.clone());
        }
        self.emit(StoreEvent::StageChanged {
            epoch,
            stage: ExecutionStage::Failed,
            message: status.text.clone(),
        });
        self.emit(StoreEvent::Status(status));
        true
    }

    /// Abort the running execution. Returns the new epoch and the task id
    /// that was in flight, or `None` if nothing was running.
    pub fn cancel_execution(&self, message: impl Into<String>) -> Option<(Epoch, Option<String>)> {
        self.stop_execution(None, message)
    }

    /// Like [`cancel_execution`](Self::cancel_execution), but only while
    /// `epoch` is still the running execution.
    pub fn abandon_execution(
        &self,
        epoch: Epoch,
        message: impl Into<String>,
    ) -> Option<(Epoch, Option<String>)> {
        self.stop_execution(Some(epoch), message)
    }

    fn stop_execution(
        &self,
        expected: Option<Epoch>,
        message: impl Into<String>,
    ) -> Option<(Epoch, Option<String>)> {
        let status = StatusMessage::new(StatusKind::Warning, message);
        let (epoch, task_id) = {
            let mut state = self.write();
            if !state.is_executing || expected.is_some_and(|e| e != state.epoch) {
                return None;
            }
            state.epoch = state.epoch.next();
            state.is_executing = false;
            state.progress.stage = ExecutionStage::Cancelled;
            state.progress.message = status.text.clone();
            state.batch_progress.stage = ExecutionStage::Cancelled;
            state.batch_progress.message = status.text.clone();
            state.status_message = Some(status.clone());
            (state.epoch, state.current_task_id.clone())
        };
        self.emit(StoreEvent::StageChanged {
            epoch,
            stage: ExecutionStage::Cancelled,
            message: status.text.clone(),
        });
        self.emit(StoreEvent::Status(status));
        Some((epoch, task_id))
    }

    /// Scheduled reset back to idle. Results stay until cleared by hand.
    pub fn clear_progress(&self, epoch: Epoch) -> bool {
        {
            let mut state = self.write();
            if state.epoch != epoch || state.is_executing {
                return false;
            }
            state.progress = ProgressState::default();
            state.batch_progress = BatchProgressState::default();
            state.status_message = None;
            state.current_task = None;
        }
        self.emit(StoreEvent::Cleared);
        true
    }

    /// Manual clear of results and progress. Refused while executing.
    pub fn clear_results(&self) -> bool {
        {
            let mut state = self.write();
            if state.is_executing {
                return false;
            }
            state.epoch = state.epoch.next();
            state.results.clear();
            state.summary = None;
            state.progress = ProgressState::default();
            state.batch_progress = BatchProgressState::default();
            state.status_message = None;
            state.current_task = None;
            state.current_task_id = None;
        }
        self.emit(StoreEvent::Cleared);
        true
    }

    fn emit(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn read(&self) -> RwLockReadGuard<'_, AppState> {
        self.state.read().unwrap_or_else(|poisoned| {
            tracing::error!("RwLock poisoned reading app state; recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, AppState> {
        self.state.write().unwrap_or_else(|poisoned| {
            tracing::error!("RwLock poisoned writing app state; recovering");
            poisoned.into_inner()
        })
    }
}

impl Default for AppStore {
    fn default() -> Self {
        Self::new()
    }
}
