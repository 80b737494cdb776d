//! Shared HTTP plumbing: client construction and error-body decoding.

use crate::error::PipelineError;
use serde::Deserialize;
use std::time::Duration;

/// Longest slice of a non-JSON error body kept in an error message.
const MAX_BODY_SNIPPET: usize = 200;

/// Build the client shared by every call of one [`crate::submit::Submitter`].
///
/// Only the connect timeout is set here; each request carries its own
/// deadline because an upload needs minutes where a control call needs seconds.
pub fn build_client(connect_timeout_secs: u64) -> Result<reqwest::Client, PipelineError> {
    reqwest::Client::builder()
        .user_agent(concat!("checkmate-submit/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .build()
        .map_err(|e| PipelineError::Internal(format!("Failed to create HTTP client: {e}")))
}

/// Provider error body: `{"status": 401, "code": "expired_auth_token", "message": "…"}`.
#[derive(Debug, Deserialize)]
struct ProviderError {
    code: Option<String>,
    message: Option<String>,
}

/// Human-readable summary of a non-2xx response body.
pub fn describe_error_body(status: u16, body: &str) -> String {
    if let Ok(err) = serde_json::from_str::<ProviderError>(body) {
        match (err.code, err.message) {
            (Some(code), Some(msg)) if !msg.is_empty() => {
                return format!("HTTP {status} {code}: {msg}")
            }
            (Some(code), _) => return format!("HTTP {status} {code}"),
            (None, Some(msg)) if !msg.is_empty() => return format!("HTTP {status}: {msg}"),
            _ => {}
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {status}")
    } else {
        let snippet: String = trimmed.chars().take(MAX_BODY_SNIPPET).collect();
        format!("HTTP {status}: {snippet}")
    }
}

/// Read the body of a failed response and summarise it.
pub async fn error_detail(response: reqwest::Response) -> (u16, String) {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    (status, describe_error_body(status, &body))
}

/// Summarise a transport-level failure.
pub fn describe_transport(e: &reqwest::Error, timeout_secs: u64) -> String {
    if e.is_timeout() {
        format!("timed out after {timeout_secs}s")
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_body() {
        let body = r#"{"status":401,"code":"expired_auth_token","message":"Authorization token has expired"}"#;
        assert_eq!(
            describe_error_body(401, body),
            "HTTP 401 expired_auth_token: Authorization token has expired"
        );
    }

    #[test]
    fn code_without_message() {
        assert_eq!(
            describe_error_body(400, r#"{"code":"bad_request"}"#),
            "HTTP 400 bad_request"
        );
    }

    #[test]
    fn plain_text_body_truncated() {
        let body = "x".repeat(500);
        let msg = describe_error_body(502, &body);
        assert!(msg.starts_with("HTTP 502: "));
        assert_eq!(msg.len(), "HTTP 502: ".len() + MAX_BODY_SNIPPET);
    }

    #[test]
    fn empty_body() {
        assert_eq!(describe_error_body(500, "  "), "HTTP 500");
    }
}
