// crates/core/src/api/http.rs
use async_trait::async_trait;
use netops_types::{
    AiStatus, ApiEnvelope, BatchRequest, CancelAck, Device, DeviceGroup, FrontendLogEntry,
    RemoteConfig, SubmitResponse, Task, TaskManagerStats, TaskResult,
};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::TaskApi;
use crate::config::{ClientConfig, RetryPolicy};
use crate::error::ApiError;
use crate::retry::retry_request;

/// Longest slice of a non-JSON error body echoed into an error message.
const MAX_ERROR_BODY: usize = 200;

/// reqwest client for the netops backend.
///
/// GET requests are retried per the `RetryPolicy`; submissions, deletions
/// and log shipping are sent once.
#[derive(Clone)]
pub struct HttpClient {
    base_url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TaskList {
    Plain(Vec<Task>),
    Wrapped { tasks: Vec<Task> },
}

impl HttpClient {
    pub fn new(config: &ClientConfig, retry: RetryPolicy) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(ApiError::from_reqwest)?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            retry,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn task_path(task_id: &str) -> String {
        format!("/api/task/{}", urlencoding::encode(task_id))
    }

    /// `GET /api/devices`
    pub async fn devices(&self) -> Result<Vec<Device>, ApiError> {
        self.get("/api/devices").await
    }

    /// `GET /api/device-groups`
    pub async fn device_groups(&self) -> Result<Vec<DeviceGroup>, ApiError> {
        self.get("/api/device-groups").await
    }

    /// `POST /api/batch-execute`: runs the batch synchronously on the server.
    pub async fn batch_execute(&self, request: &BatchRequest) -> Result<TaskResult, ApiError> {
        let path = "/api/batch-execute";
        let builder = self.client.post(self.url(path)).json(request);
        self.send(builder, path).await
    }

    /// `GET /api/tasks`
    pub async fn tasks(&self) -> Result<Vec<Task>, ApiError> {
        let list: TaskList = self.get("/api/tasks").await?;
        Ok(match list {
            TaskList::Plain(tasks) | TaskList::Wrapped { tasks } => tasks,
        })
    }

    /// `GET /api/task-manager/stats`
    pub async fn task_stats(&self) -> Result<TaskManagerStats, ApiError> {
        self.get("/api/task-manager/stats").await
    }

    /// `GET /api/ai-status`
    pub async fn ai_status(&self) -> Result<AiStatus, ApiError> {
        self.get("/api/ai-status").await
    }

    /// `GET /api/config`
    pub async fn remote_config(&self) -> Result<RemoteConfig, ApiError> {
        self.get("/api/config").await
    }

    /// `POST /api/frontend-logs`. Best-effort: failures are logged and dropped.
    pub async fn ship_logs(&self, entries: &[FrontendLogEntry]) {
        if entries.is_empty() {
            return;
        }
        let path = "/api/frontend-logs";
        let builder = self
            .client
            .post(self.url(path))
            .json(&serde_json::json!({ "logs": entries }));
        if let Err(e) = self.send_optional::<Value>(builder, path).await {
            tracing::debug!(error = %e, count = entries.len(), "log shipping failed");
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        retry_request(&self.retry, || self.send(self.client.get(self.url(path)), path)).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        path: &str,
    ) -> Result<T, ApiError> {
        self.send_optional(builder, path)
            .await?
            .ok_or_else(|| ApiError::MissingData(path.to_string()))
    }

    async fn send_optional<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        path: &str,
    ) -> Result<Option<T>, ApiError> {
        let response = builder.send().await.map_err(ApiError::from_reqwest)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(ApiError::from_reqwest)?;
        tracing::trace!(path, status, bytes = body.len(), "response received");
        decode_envelope(status, &body)
    }
}

/// Unwrap `{success, data, message, error_code, timestamp}`.
pub(crate) fn decode_envelope<T: DeserializeOwned>(
    status: u16,
    body: &str,
) -> Result<Option<T>, ApiError> {
    let envelope = serde_json::from_str::<ApiEnvelope<Value>>(body);

    if !(200..300).contains(&status) {
        let message = match envelope {
            Ok(ApiEnvelope { message: Some(message), .. }) => message,
            _ if body.trim().is_empty() => format!("request failed with status {status}"),
            _ => body.trim().chars().take(MAX_ERROR_BODY).collect(),
        };
        return Err(ApiError::Http { status, message });
    }

    let envelope = envelope.map_err(|e| ApiError::Decode(e.to_string()))?;
    if !envelope.success {
        return Err(ApiError::Application {
            message: envelope
                .message
                .unwrap_or_else(|| "Request failed".to_string()),
            error_code: envelope.error_code,
        });
    }

    match envelope.data {
        None | Some(Value::Null) => Ok(None),
        Some(data) => serde_json::from_value(data)
            .map(Some)
            .map_err(|e| ApiError::Decode(e.to_string())),
    }
}

#[async_trait]
impl TaskApi for HttpClient {
    async fn submit_batch(&self, request: &BatchRequest) -> Result<SubmitResponse, ApiError> {
        let path = "/api/batch-execute-async";
        let builder = self.client.post(self.url(path)).json(request);
        self.send(builder, path).await
    }

    async fn get_task_status(&self, task_id: &str) -> Result<Task, ApiError> {
        self.get(&Self::task_path(task_id)).await
    }

    async fn cancel_task(&self, task_id: &str) -> Result<CancelAck, ApiError> {
        let path = Self::task_path(task_id);
        let ack = self
            .send_optional::<CancelAck>(self.client.delete(self.url(&path)), &path)
            .await?;
        Ok(ack.unwrap_or_else(|| CancelAck {
            task_id: Some(task_id.to_string()),
            message: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netops_types::{ExecutionMode, TaskStatus};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn client_for(server: &mockito::ServerGuard) -> HttpClient {
        let config = ClientConfig {
            base_url: server.url(),
            request_timeout: Duration::from_secs(5),
        };
        let retry = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        HttpClient::new(&config, retry).unwrap()
    }

    #[test]
    fn test_decode_success_envelope() {
        let body = r#"{"success": true, "data": {"task_id": "t1", "message": "queued"}}"#;
        let resp: Option<SubmitResponse> = decode_envelope(200, body).unwrap();
        assert_eq!(resp.unwrap().task_id, "t1");
    }

    #[test]
    fn test_decode_failure_envelope_with_200_status() {
        let body = r#"{"success": false, "message": "quota exhausted", "error_code": "AI_QUOTA"}"#;
        let err = decode_envelope::<Value>(200, body).unwrap_err();
        match err {
            ApiError::Application { message, error_code } => {
                assert_eq!(message, "quota exhausted");
                assert_eq!(error_code.as_deref(), Some("AI_QUOTA"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_decode_http_error_uses_envelope_message() {
        let body = r#"{"success": false, "message": "task not found"}"#;
        let err = decode_envelope::<Value>(404, body).unwrap_err();
        assert!(matches!(err, ApiError::Http { status: 404, ref message } if message == "task not found"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_decode_http_error_with_html_body() {
        let err = decode_envelope::<Value>(502, "<html>Bad Gateway</html>").unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("Bad Gateway"));
    }

    #[tokio::test]
    async fn test_get_task_status() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/task/abc-123")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"success": true, "data": {
                    "task_id": "abc-123", "task_type": "batch_execute", "status": "running",
                    "progress": {"percentage": 40, "current_stage": "executing"}
                }}"#,
            )
            .create_async()
            .await;

        let client = client_for(&server);
        let task = client.get_task_status("abc-123").await.unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.progress.percentage, 40.0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_submit_posts_request_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/batch-execute-async")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "devices": ["sw1", "sw2"],
                "command": "show clock",
                "mode": "command"
            })))
            .with_status(200)
            .with_body(r#"{"success": true, "data": {"task_id": "t-9", "message": "accepted"}}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let resp = client
            .submit_batch(&BatchRequest {
                devices: vec!["sw1".into(), "sw2".into()],
                command: "show clock".into(),
                mode: ExecutionMode::Command,
            })
            .await
            .unwrap();
        assert_eq!(resp.task_id, "t-9");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_retries_on_503() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("GET", "/api/devices")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;
        let client = client_for(&server);

        // max_attempts = 3, all hitting the 503 mock
        let err = client.devices().await.unwrap_err();
        assert_eq!(err.status(), Some(503));
        failing.assert_async().await;
    }

    #[tokio::test]
    async fn test_submit_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/batch-execute-async")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;
        let client = client_for(&server);

        let err = client
            .submit_batch(&BatchRequest {
                devices: vec!["sw1".into()],
                command: "show clock".into(),
                mode: ExecutionMode::Command,
            })
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(503));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_cancel_without_data_falls_back_to_task_id() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", "/api/task/t-1")
            .with_status(200)
            .with_body(r#"{"success": true, "message": "cancelled"}"#)
            .create_async()
            .await;
        let client = client_for(&server);

        let ack = client.cancel_task("t-1").await.unwrap();
        assert_eq!(ack.task_id.as_deref(), Some("t-1"));
    }

    #[tokio::test]
    async fn test_tasks_accepts_wrapped_list() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/tasks")
            .with_status(200)
            .with_body(
                r#"{"success": true, "data": {"tasks": [
                    {"task_id": "a", "task_type": "ai_query", "status": "completed"}
                ]}}"#,
            )
            .create_async()
            .await;
        let client = client_for(&server);

        let tasks = client.tasks().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_id, "a");
    }

    #[tokio::test]
    async fn test_ship_logs_swallows_errors() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/frontend-logs")
            .with_status(500)
            .create_async()
            .await;
        let client = client_for(&server);

        client
            .ship_logs(&[FrontendLogEntry::new(netops_types::LogLevel::Error, "boom")])
            .await;
        mock.assert_async().await;
    }
}
