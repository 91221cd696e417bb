// crates/core/src/error.rs
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors from the HTTP layer.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Transport failure before any HTTP status was received (status 0).
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// `success: false` envelope.
    #[error("{message}")]
    Application {
        message: String,
        error_code: Option<String>,
    },

    #[error("Response envelope for {0} carried no data")]
    MissingData(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// HTTP-like status: the real status for `Http`, 0 for `Network`.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Network(_) => Some(0),
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 502, 503 and network failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self.status(), Some(0 | 502 | 503))
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404) || self.to_string().contains("404")
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::Http {
                status: status.as_u16(),
                message: err.to_string(),
            };
        }
        if err.is_decode() {
            return Self::Decode(err.to_string());
        }
        Self::Network(err.to_string())
    }
}

/// Errors from submitting and polling a task.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error("Invalid task id: {0:?}")]
    InvalidTaskId(String),

    #[error("Task {0} not found or expired")]
    NotFound(String),

    #[error("Task {task_id} did not finish within {}s", .elapsed.as_secs())]
    Timeout { task_id: String, elapsed: Duration },

    #[error("Polling cancelled")]
    Cancelled,

    #[error("{message}")]
    Failed { task_id: String, message: String },

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Errors from the execution core.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error("An execution is already in progress")]
    AlreadyRunning,

    #[error("Execution requested too soon; retry in {}ms", .remaining.as_millis())]
    Debounced { remaining: Duration },

    #[error("No devices selected")]
    NoDevices,

    #[error("Command is empty")]
    EmptyCommand,

    #[error("Execution cancelled")]
    Cancelled,

    #[error(transparent)]
    Task(#[from] TaskError),
}

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid config value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(ApiError::Network("refused".into()).status(), Some(0));
        let http = ApiError::Http { status: 503, message: "busy".into() };
        assert_eq!(http.status(), Some(503));
        let app = ApiError::Application { message: "nope".into(), error_code: None };
        assert_eq!(app.status(), None);
    }

    #[test]
    fn test_retryable_allow_list() {
        assert!(ApiError::Network("reset".into()).is_retryable());
        for status in [502, 503] {
            assert!(ApiError::Http { status, message: String::new() }.is_retryable());
        }
        for status in [400, 401, 404, 500, 504] {
            assert!(!ApiError::Http { status, message: String::new() }.is_retryable());
        }
        assert!(!ApiError::Decode("bad json".into()).is_retryable());
    }

    #[test]
    fn test_not_found_by_status_or_message() {
        assert!(ApiError::Http { status: 404, message: "gone".into() }.is_not_found());
        let app = ApiError::Application { message: "upstream said 404".into(), error_code: None };
        assert!(app.is_not_found());
        assert!(!ApiError::Network("timeout".into()).is_not_found());
    }

    #[test]
    fn test_task_error_display() {
        let err = TaskError::NotFound("abc".into());
        assert_eq!(err.to_string(), "Task abc not found or expired");
        let err = TaskError::Timeout { task_id: "abc".into(), elapsed: Duration::from_secs(1800) };
        assert!(err.to_string().contains("1800s"));
    }
}
