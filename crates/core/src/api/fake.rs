// crates/core/src/api/fake.rs
//! Scripted `TaskApi` for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use netops_types::{
    BatchExecutionResult, BatchRequest, CancelAck, SubmitResponse, Task, TaskParams,
    TaskProgress, TaskResult, TaskStatus, TaskType,
};

use super::TaskApi;
use crate::error::ApiError;

/// Replays status responses in order; the last one repeats forever.
pub(crate) struct FakeApi {
    submit: Mutex<Result<SubmitResponse, ApiError>>,
    statuses: Mutex<VecDeque<Result<Task, ApiError>>>,
    pub submit_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
}

impl FakeApi {
    pub fn new(task_id: &str, statuses: Vec<Result<Task, ApiError>>) -> Self {
        Self {
            submit: Mutex::new(Ok(SubmitResponse {
                task_id: task_id.to_string(),
                message: Some("accepted".into()),
            })),
            statuses: Mutex::new(statuses.into()),
            submit_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_submit(err: ApiError) -> Self {
        let api = Self::new("unused", Vec::new());
        *api.submit.lock().unwrap() = Err(err);
        api
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskApi for FakeApi {
    async fn submit_batch(&self, _request: &BatchRequest) -> Result<SubmitResponse, ApiError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        self.submit.lock().unwrap().clone()
    }

    async fn get_task_status(&self, _task_id: &str) -> Result<Task, ApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut statuses = self.statuses.lock().unwrap();
        if statuses.len() > 1 {
            statuses.pop_front().unwrap()
        } else {
            statuses
                .front()
                .cloned()
                .unwrap_or_else(|| Err(ApiError::Network("no scripted status".into())))
        }
    }

    async fn cancel_task(&self, task_id: &str) -> Result<CancelAck, ApiError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(CancelAck {
            task_id: Some(task_id.to_string()),
            message: Some("cancelled".into()),
        })
    }
}

pub(crate) fn task(id: &str, status: TaskStatus, percentage: f64, stage: &str) -> Task {
    Task {
        task_id: id.to_string(),
        task_type: TaskType::BatchExecute,
        status,
        progress: TaskProgress {
            percentage,
            current_stage: Some(stage.to_string()),
            details: None,
        },
        params: TaskParams::default(),
        result: None,
        results: None,
        error: None,
        token_usage: None,
        created_at: None,
        updated_at: None,
    }
}

pub(crate) fn completed(id: &str, devices: &[(&str, bool)]) -> Task {
    let mut t = task(id, TaskStatus::Completed, 100.0, "completed");
    t.result = Some(TaskResult {
        results: devices
            .iter()
            .map(|(device, success)| BatchExecutionResult {
                device: device.to_string(),
                success: *success,
                output: success.then(|| "ok".to_string()),
                error: (!success).then(|| "unreachable".to_string()),
            })
            .collect(),
        ..Default::default()
    });
    t
}

pub(crate) fn failed(id: &str, error: &str) -> Task {
    let mut t = task(id, TaskStatus::Failed, 100.0, "failed");
    t.error = Some(error.to_string());
    t
}
