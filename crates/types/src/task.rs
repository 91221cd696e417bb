// crates/types/src/task.rs
//! Server-side task payloads mirrored by the client.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of work a task performs on the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    BatchExecute,
    AiQuery,
    HealthCheck,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BatchExecute => "batch_execute",
            Self::AiQuery => "ai_query",
            Self::HealthCheck => "health_check",
        }
    }
}

/// Server-reported lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Completed, failed and cancelled tasks never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// How a batch request is interpreted: a raw device command or an AI query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Command,
    Ai,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Ai => "ai",
        }
    }

    pub fn task_type(self) -> TaskType {
        match self {
            Self::Command => TaskType::BatchExecute,
            Self::Ai => TaskType::AiQuery,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    /// 0..=100
    #[serde(default)]
    pub percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskParams {
    #[serde(default)]
    pub devices: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ExecutionMode>,
}

/// Token-cost metadata attached to AI tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

/// One device's outcome inside a completed batch task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchExecutionResult {
    pub device: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

impl ExecutionSummary {
    pub fn from_results(results: &[BatchExecutionResult]) -> Self {
        let successful = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            successful,
            failed: results.len() - successful,
        }
    }
}

/// Result payload of a completed task.
///
/// The backend nests per-device results under `result.results`; anything it
/// adds beyond the known fields is kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    #[serde(default)]
    pub results: Vec<BatchExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ExecutionSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_response: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskResult {
    /// Server summary when present, otherwise counted from `results`.
    pub fn summary(&self) -> ExecutionSummary {
        self.summary
            .unwrap_or_else(|| ExecutionSummary::from_results(&self.results))
    }
}

/// One server-side unit of work as returned by `GET /api/task/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    #[serde(default)]
    pub progress: TaskProgress,
    #[serde(default)]
    pub params: TaskParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<BatchExecutionResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, alias = "token_cost", skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Task {
    /// Fold `result` and the legacy top-level `results` into one payload.
    pub fn outcome(&self) -> TaskResult {
        let mut outcome = self.result.clone().unwrap_or_default();
        if outcome.results.is_empty() {
            if let Some(results) = &self.results {
                outcome.results = results.clone();
            }
        }
        outcome
    }
}

/// Body of `POST /api/batch-execute` and `POST /api/batch-execute-async`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub devices: Vec<String>,
    pub command: String,
    pub mode: ExecutionMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub task_id: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelAck {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_task_deserialize_full_payload() {
        let json = r#"{
            "task_id": "t-42",
            "task_type": "batch_execute",
            "status": "running",
            "progress": {"percentage": 35.0, "current_stage": "executing", "details": {"done": 1}},
            "params": {"devices": ["sw1", "sw2"], "command": "show version", "mode": "command"},
            "token_cost": {"input_tokens": 10, "output_tokens": 5, "total_tokens": 15}
        }"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.task_id, "t-42");
        assert_eq!(task.task_type, TaskType::BatchExecute);
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.progress.current_stage.as_deref(), Some("executing"));
        assert_eq!(task.params.mode, Some(ExecutionMode::Command));
        assert_eq!(task.token_usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn test_task_minimal_payload_uses_defaults() {
        let json = r#"{"task_id": "t", "task_type": "ai_query", "status": "pending"}"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.progress, TaskProgress::default());
        assert!(task.params.devices.is_empty());
        assert!(task.result.is_none());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_outcome_prefers_nested_results_and_keeps_extra() {
        let json = r#"{
            "task_id": "t", "task_type": "batch_execute", "status": "completed",
            "result": {
                "results": [
                    {"device": "r1", "success": true, "output": "ok"},
                    {"device": "r2", "success": false, "error": "timeout"}
                ],
                "duration": 3.2
            }
        }"#;
        let task: Task = serde_json::from_str(json).unwrap();
        let outcome = task.outcome();
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(
            outcome.summary(),
            ExecutionSummary { total: 2, successful: 1, failed: 1 }
        );
        assert!(outcome.extra.contains_key("duration"));
    }

    #[test]
    fn test_outcome_falls_back_to_top_level_results() {
        let json = r#"{
            "task_id": "t", "task_type": "batch_execute", "status": "completed",
            "results": [{"device": "r1", "success": true}]
        }"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.outcome().results[0].device, "r1");
    }

    #[test]
    fn test_batch_request_wire_format() {
        let req = BatchRequest {
            devices: vec!["core-1".into()],
            command: "show ip int brief".into(),
            mode: ExecutionMode::Ai,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["mode"], "ai");
        assert_eq!(json["devices"][0], "core-1");
    }
}
