//! Evaluation request: hand the public object URL to the backend.
//!
//! The backend downloads the document itself and answers with its own JSON.
//! We only check that the answer *is* JSON. A failure here never triggers a
//! re-upload; the object is already stored and the caller can repeat just
//! this step.

use crate::error::PipelineError;
use crate::output::EvaluationResult;
use crate::pipeline::http::{describe_transport, error_detail};
use std::time::Duration;
use tracing::{debug, info};

/// POST `{"url": public_url}` to `endpoint` and parse the JSON answer.
pub async fn notify(
    http: &reqwest::Client,
    endpoint: &str,
    public_url: &str,
    timeout_secs: u64,
) -> Result<EvaluationResult, PipelineError> {
    let notify_error = |status: Option<u16>, detail: String| PipelineError::Notify {
        url: public_url.to_string(),
        status,
        detail,
    };

    debug!(%endpoint, %public_url, "Requesting evaluation");

    let response = http
        .post(endpoint)
        .json(&serde_json::json!({ "url": public_url }))
        .timeout(Duration::from_secs(timeout_secs))
        .send()
        .await
        .map_err(|e| notify_error(None, describe_transport(&e, timeout_secs)))?;

    let status = response.status();
    if !status.is_success() {
        let (code, detail) = error_detail(response).await;
        return Err(notify_error(Some(code), detail));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| notify_error(Some(status.as_u16()), format!("reading response: {e}")))?;
    let value: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
        notify_error(
            Some(status.as_u16()),
            format!("response is not valid JSON: {e}"),
        )
    })?;

    info!(%public_url, "Evaluation received");
    Ok(EvaluationResult(value))
}
