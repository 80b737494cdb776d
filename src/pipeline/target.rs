//! Upload target resolution: ask the provider for a one-time upload URL.
//!
//! Each target is valid for exactly one upload attempt. The uploader takes
//! it by value, so a used target cannot be handed to a second attempt.

use crate::error::PipelineError;
use crate::pipeline::credentials::Credential;
use crate::pipeline::http::{describe_transport, error_detail};
use crate::state::SubmissionState;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::debug;

const GET_UPLOAD_URL_PATH: &str = "/b2api/v2/b2_get_upload_url";

/// Single-use upload destination.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTarget {
    pub upload_url: String,
    /// Upload-scoped token (distinct from the account token).
    pub authorization_token: String,
}

impl fmt::Debug for UploadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadTarget")
            .field("upload_url", &self.upload_url)
            .field("authorization_token", &"<redacted>")
            .finish()
    }
}

/// Request a fresh [`UploadTarget`] for `bucket_id`.
///
/// `401`/`403` map to [`PipelineError::AuthExpired`]; the caller refreshes
/// the credential and tries once more. Everything else is
/// [`PipelineError::Resolution`].
pub async fn resolve_upload_target(
    http: &reqwest::Client,
    credential: &Credential,
    bucket_id: &str,
    timeout_secs: u64,
) -> Result<UploadTarget, PipelineError> {
    let url = format!(
        "{}{}",
        credential.api_url.trim_end_matches('/'),
        GET_UPLOAD_URL_PATH
    );
    debug!(%url, bucket_id, "Requesting upload target");

    let response = http
        .post(&url)
        .header(
            reqwest::header::AUTHORIZATION,
            credential.authorization_token.as_str(),
        )
        .json(&serde_json::json!({ "bucketId": bucket_id }))
        .timeout(Duration::from_secs(timeout_secs))
        .send()
        .await
        .map_err(|e| PipelineError::Resolution {
            bucket_id: bucket_id.to_string(),
            status: None,
            detail: describe_transport(&e, timeout_secs),
        })?;

    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(PipelineError::AuthExpired {
            status: status.as_u16(),
            during: SubmissionState::ResolvingTarget,
        });
    }
    if !status.is_success() {
        let (status, detail) = error_detail(response).await;
        return Err(PipelineError::Resolution {
            bucket_id: bucket_id.to_string(),
            status: Some(status),
            detail,
        });
    }

    response
        .json::<UploadTarget>()
        .await
        .map_err(|e| PipelineError::Resolution {
            bucket_id: bucket_id.to_string(),
            status: Some(status.as_u16()),
            detail: format!("malformed get-upload-url response: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use httpmock::prelude::*;

    fn credential(api_url: String) -> Credential {
        Credential {
            authorization_token: "tok1".into(),
            api_url,
            download_url: None,
            issued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn resolves_target() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/b2api/v2/b2_get_upload_url")
                    .header("Authorization", "tok1")
                    .json_body(serde_json::json!({ "bucketId": "bucket-9" }));
                then.status(200).json_body(serde_json::json!({
                    "bucketId": "bucket-9",
                    "uploadUrl": "https://up.example.com/x",
                    "authorizationToken": "tok2"
                }));
            })
            .await;

        let target = resolve_upload_target(
            &reqwest::Client::new(),
            &credential(server.base_url()),
            "bucket-9",
            5,
        )
        .await
        .unwrap();

        assert_eq!(target.upload_url, "https://up.example.com/x");
        assert_eq!(target.authorization_token, "tok2");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unauthorized_is_auth_expired() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/b2api/v2/b2_get_upload_url");
                then.status(401).json_body(serde_json::json!({
                    "status": 401,
                    "code": "expired_auth_token",
                    "message": "expired"
                }));
            })
            .await;

        let err = resolve_upload_target(
            &reqwest::Client::new(),
            &credential(server.base_url()),
            "bucket-9",
            5,
        )
        .await
        .unwrap_err();
        assert!(err.is_auth_expired(), "got: {err:?}");
    }

    #[tokio::test]
    async fn forbidden_is_auth_expired() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/b2api/v2/b2_get_upload_url");
                then.status(403).json_body(serde_json::json!({
                    "status": 403,
                    "code": "access_denied",
                    "message": "not entitled"
                }));
            })
            .await;

        let err = resolve_upload_target(
            &reqwest::Client::new(),
            &credential(server.base_url()),
            "bucket-9",
            5,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::AuthExpired {
                status: 403,
                during: SubmissionState::ResolvingTarget
            }
        ));
    }

    #[tokio::test]
    async fn bad_bucket_is_resolution_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/b2api/v2/b2_get_upload_url");
                then.status(400).json_body(serde_json::json!({
                    "status": 400,
                    "code": "bad_request",
                    "message": "Invalid bucketId"
                }));
            })
            .await;

        let err = resolve_upload_target(
            &reqwest::Client::new(),
            &credential(server.base_url()),
            "nope",
            5,
        )
        .await
        .unwrap_err();
        match err {
            PipelineError::Resolution {
                bucket_id,
                status,
                detail,
            } => {
                assert_eq!(bucket_id, "nope");
                assert_eq!(status, Some(400));
                assert!(detail.contains("Invalid bucketId"), "got: {detail}");
            }
            other => panic!("expected Resolution, got {other:?}"),
        }
    }
}
