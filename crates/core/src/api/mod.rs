// crates/core/src/api/mod.rs
//! Backend HTTP contract.
//!
//! Provides the `TaskApi` trait (the collaborator the poller and execution
//! core talk to) and `HttpClient`, its reqwest implementation covering the
//! rest of the dashboard endpoints as well.

pub mod http;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use netops_types::{BatchRequest, CancelAck, SubmitResponse, Task};

use crate::error::ApiError;

pub use http::HttpClient;

/// Task endpoints needed to submit, observe and cancel a batch job.
#[async_trait]
pub trait TaskApi: Send + Sync {
    /// `POST /api/batch-execute-async`
    async fn submit_batch(&self, request: &BatchRequest) -> Result<SubmitResponse, ApiError>;

    /// `GET /api/task/{task_id}`
    async fn get_task_status(&self, task_id: &str) -> Result<Task, ApiError>;

    /// `DELETE /api/task/{task_id}`
    async fn cancel_task(&self, task_id: &str) -> Result<CancelAck, ApiError>;
}
