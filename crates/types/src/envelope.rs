// crates/types/src/envelope.rs
use serde::{Deserialize, Serialize};

/// Standard response wrapper used by every backend endpoint.
///
/// `success: false` is an application error regardless of the HTTP status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            error_code: None,
            timestamp: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_envelope_without_data() {
        let json = r#"{"success": false, "message": "quota exceeded", "error_code": "QUOTA"}"#;
        let env: ApiEnvelope<serde_json::Value> = serde_json::from_str(json).unwrap();
        assert!(!env.success);
        assert!(env.data.is_none());
        assert_eq!(env.error_code.as_deref(), Some("QUOTA"));
    }
}
