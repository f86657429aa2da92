//! Evaluation backend error types.

use thiserror::Error;

/// Maximum length for error bodies carried in errors and logs.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Errors that can occur while talking to the evaluation backend.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The HTTP client could not be built.
    #[error("Failed to create HTTP client: {0}")]
    Client(String),

    /// Request never produced a response (connect failure, timeout, reset).
    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    /// Backend answered with a non-success status.
    #[error("{url} returned {status}: {body}")]
    Status { url: String, status: u16, body: String },

    /// Response body did not match the expected shape.
    #[error("Failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl ApiError {
    /// Returns true for faults a later attempt may not hit: transport
    /// failures, 5xx and 429.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Request { .. } => true,
            ApiError::Status { status, .. } => *status >= 500 || *status == 429,
            ApiError::Client(_) | ApiError::Decode { .. } | ApiError::InvalidUrl { .. } => false,
        }
    }

    /// HTTP status of the failed response, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Truncates a response body so error messages stay readable.
pub(crate) fn truncate_body(body: &str) -> String {
    if body.len() > MAX_ERROR_BODY_LENGTH {
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &body[..end])
    } else {
        body.to_string()
    }
}

/// Result type for backend calls.
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> ApiError {
        ApiError::Status {
            url: "http://localhost/api".to_string(),
            status: code,
            body: String::new(),
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(ApiError::Request {
            url: "u".to_string(),
            message: "connection refused".to_string()
        }
        .is_retryable());
        assert!(!ApiError::Decode {
            url: "u".to_string(),
            message: "missing field".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_truncate_body_respects_char_boundaries() {
        let body = "é".repeat(150);
        let truncated = truncate_body(&body);
        assert!(truncated.ends_with("... (truncated)"));
        assert!(truncated.len() < body.len());
        assert_eq!(truncate_body("short"), "short");
    }
}
