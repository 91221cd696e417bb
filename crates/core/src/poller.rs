// crates/core/src/poller.rs
//! Submit a batch job and poll its status until it reaches a terminal state.
//!
//! Lifecycle notifications are delivered as a single stream of [`PollEvent`]s
//! rather than a bag of optional callbacks. Cancellation is cooperative via a
//! `CancellationToken`; every network future is raced against it, so
//! cancelling also drops the in-flight request.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use netops_types::{BatchRequest, ExecutionMode, ExecutionStage, Task, TaskResult, TaskStatus};
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::api::TaskApi;
use crate::config::PollerConfig;
use crate::error::TaskError;

/// Percentage below which a running task is still considered connecting.
const CONNECTING_THRESHOLD: f64 = 20.0;

/// Lifecycle notification emitted while submitting and polling.
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    Submitted {
        task_id: String,
        message: Option<String>,
    },
    /// Every status response, terminal or not.
    Progress(Task),
    /// The server stage label changed since the previous response.
    StageChanged {
        stage: ExecutionStage,
        percentage: f64,
        label: Option<String>,
    },
    /// The task reached a terminal status.
    Completed(Task),
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Default)]
pub struct PollOptions {
    pub mode: ExecutionMode,
    pub events: Option<mpsc::UnboundedSender<PollEvent>>,
    /// Cancelling this token also cancels the poll started with these options.
    pub parent: Option<CancellationToken>,
}

impl PollOptions {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn with_events(mut self, tx: mpsc::UnboundedSender<PollEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn with_parent(mut self, token: CancellationToken) -> Self {
        self.parent = Some(token);
        self
    }

    fn emit(&self, event: PollEvent) {
        if let Some(tx) = &self.events {
            // A dropped receiver just means nobody is listening.
            let _ = tx.send(event);
        }
    }
}

/// `min(current * backoff_factor, max_poll_interval)`
pub fn next_interval(current: Duration, config: &PollerConfig) -> Duration {
    let grown = (current.as_millis() as f64 * config.backoff_factor).round() as u64;
    Duration::from_millis(grown).min(config.max_poll_interval)
}

/// Map a status response onto the client-facing stage.
pub fn map_stage(status: TaskStatus, percentage: f64, mode: ExecutionMode) -> ExecutionStage {
    match status {
        TaskStatus::Completed => return ExecutionStage::Completed,
        TaskStatus::Failed => return ExecutionStage::Failed,
        TaskStatus::Cancelled => return ExecutionStage::Cancelled,
        TaskStatus::Pending | TaskStatus::Running => {}
    }
    if percentage < CONNECTING_THRESHOLD {
        ExecutionStage::Connecting
    } else if percentage >= CONNECTING_THRESHOLD {
        match mode {
            ExecutionMode::Ai => ExecutionStage::AiAnalyzing,
            ExecutionMode::Command => ExecutionStage::Executing,
        }
    } else {
        // NaN
        ExecutionStage::Submitted
    }
}

/// Reject ids that can never name a real task.
pub fn validate_task_id(task_id: &str) -> Result<(), TaskError> {
    let trimmed = task_id.trim();
    if trimmed.is_empty() || trimmed == "undefined" || trimmed == "null" {
        return Err(TaskError::InvalidTaskId(task_id.to_string()));
    }
    Ok(())
}

/// Polls one task at a time. Starting a new poll cancels the previous one.
pub struct TaskPoller {
    api: Arc<dyn TaskApi>,
    config: PollerConfig,
    token: Mutex<CancellationToken>,
}

impl TaskPoller {
    pub fn new(api: Arc<dyn TaskApi>, config: PollerConfig) -> Self {
        Self {
            api,
            config,
            token: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Abort the in-flight loop, if any. Idempotent.
    pub fn cancel(&self) {
        match self.token.lock() {
            Ok(token) => token.cancel(),
            Err(e) => tracing::error!("Mutex poisoned cancelling poller: {e}"),
        }
    }

    /// Cancel and install a fresh token so the poller can be reused.
    pub fn reset(&self) {
        self.swap_token(None);
    }

    pub fn is_cancelled(&self) -> bool {
        match self.token.lock() {
            Ok(token) => token.is_cancelled(),
            Err(e) => {
                tracing::error!("Mutex poisoned reading poller token: {e}");
                true
            }
        }
    }

    fn swap_token(&self, parent: Option<&CancellationToken>) -> CancellationToken {
        let fresh = parent.map_or_else(CancellationToken::new, CancellationToken::child_token);
        let mut guard = self.token.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Mutex poisoned swapping poller token; recovering");
            poisoned.into_inner()
        });
        guard.cancel();
        *guard = fresh.clone();
        fresh
    }

    /// Poll `task_id` until it is terminal, the timeout elapses, or the
    /// poller is cancelled. Resolves with the terminal task regardless of
    /// whether it completed, failed or was cancelled server-side.
    pub async fn poll_task(&self, task_id: &str, options: &PollOptions) -> Result<Task, TaskError> {
        if let Err(err) = validate_task_id(task_id) {
            options.emit(PollEvent::Error {
                message: err.to_string(),
            });
            return Err(err);
        }
        let token = self.swap_token(options.parent.as_ref());
        self.poll_with(task_id, options, &token).await
    }

    /// Submit `request`, then poll the returned task. A server-side failure
    /// or cancellation becomes `TaskError::Failed`.
    pub async fn execute_and_wait(
        &self,
        request: &BatchRequest,
        options: &PollOptions,
    ) -> Result<TaskResult, TaskError> {
        let token = self.swap_token(options.parent.as_ref());

        let submitted = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(TaskError::Cancelled),
            res = self.api.submit_batch(request) => res,
        };
        let submitted = match submitted {
            Ok(submitted) => submitted,
            Err(err) => {
                options.emit(PollEvent::Error {
                    message: err.to_string(),
                });
                return Err(err.into());
            }
        };
        if let Err(err) = validate_task_id(&submitted.task_id) {
            options.emit(PollEvent::Error {
                message: err.to_string(),
            });
            return Err(err);
        }

        tracing::info!(
            task_id = %submitted.task_id,
            devices = request.devices.len(),
            mode = request.mode.as_str(),
            "batch submitted"
        );
        options.emit(PollEvent::Submitted {
            task_id: submitted.task_id.clone(),
            message: submitted.message.clone(),
        });

        let task = self.poll_with(&submitted.task_id, options, &token).await?;
        match task.status {
            TaskStatus::Failed => Err(TaskError::Failed {
                message: task
                    .error
                    .clone()
                    .unwrap_or_else(|| "Task execution failed".to_string()),
                task_id: task.task_id,
            }),
            TaskStatus::Cancelled => Err(TaskError::Failed {
                message: task
                    .error
                    .clone()
                    .unwrap_or_else(|| "Task was cancelled".to_string()),
                task_id: task.task_id,
            }),
            _ => Ok(task.outcome()),
        }
    }

    async fn poll_with(
        &self,
        task_id: &str,
        options: &PollOptions,
        token: &CancellationToken,
    ) -> Result<Task, TaskError> {
        let started = Instant::now();
        let deadline = started + self.config.timeout;
        let mut interval = self.config.poll_interval;
        let mut last_label: Option<String> = None;
        let mut polls = 0u32;

        loop {
            let fetched = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(self.cancelled(task_id)),
                _ = sleep_until(deadline) => return Err(self.timed_out(task_id, started, options)),
                res = self.api.get_task_status(task_id) => res,
            };
            polls += 1;

            let task = match fetched {
                Ok(task) => task,
                Err(err) => {
                    let err = if err.is_not_found() {
                        TaskError::NotFound(task_id.to_string())
                    } else {
                        TaskError::Api(err)
                    };
                    tracing::warn!(task_id, polls, error = %err, "task status fetch failed");
                    options.emit(PollEvent::Error {
                        message: err.to_string(),
                    });
                    return Err(err);
                }
            };

            if task.progress.current_stage != last_label {
                last_label = task.progress.current_stage.clone();
                options.emit(PollEvent::StageChanged {
                    stage: map_stage(task.status, task.progress.percentage, options.mode),
                    percentage: task.progress.percentage,
                    label: last_label.clone(),
                });
            }
            options.emit(PollEvent::Progress(task.clone()));

            if task.status.is_terminal() {
                tracing::info!(
                    task_id,
                    status = task.status.as_str(),
                    polls,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "task finished"
                );
                options.emit(PollEvent::Completed(task.clone()));
                return Ok(task);
            }

            tracing::debug!(
                task_id,
                status = task.status.as_str(),
                percentage = task.progress.percentage,
                next_poll_ms = interval.as_millis() as u64,
                "task still running"
            );
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(self.cancelled(task_id)),
                _ = sleep_until(deadline) => return Err(self.timed_out(task_id, started, options)),
                _ = sleep(interval) => {}
            }
            interval = next_interval(interval, &self.config);
        }
    }

    fn cancelled(&self, task_id: &str) -> TaskError {
        tracing::debug!(task_id, "polling cancelled");
        TaskError::Cancelled
    }

    fn timed_out(&self, task_id: &str, started: Instant, options: &PollOptions) -> TaskError {
        let err = TaskError::Timeout {
            task_id: task_id.to_string(),
            elapsed: started.elapsed(),
        };
        tracing::warn!(task_id, timeout_secs = self.config.timeout.as_secs(), "polling timed out");
        options.emit(PollEvent::Error {
            message: err.to_string(),
        });
        err
    }
}
