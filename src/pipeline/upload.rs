//! Streaming upload of one file to a resolved [`UploadTarget`].
//!
//! ## Why stream?
//!
//! Scanned answer bundles reach hundreds of megabytes. The file is opened
//! with `tokio::fs`, wrapped in a [`ReaderStream`] and handed to reqwest as a
//! streaming body, so at most one 64 KiB chunk per upload is in memory.
//! `Content-Length` is set from the file size because the provider refuses
//! chunked uploads.
//!
//! ## Headers
//!
//! | Header | Value |
//! |--------|-------|
//! | `Authorization` | upload-scoped token from the target |
//! | `X-Bz-File-Name` | display name, percent-encoded like `encodeURIComponent` |
//! | `Content-Type` | declared MIME type |
//! | `Content-Length` | file size |
//! | `X-Bz-Content-Sha1` | hex SHA-1, or `do_not_verify` |

use crate::config::ChecksumMode;
use crate::error::PipelineError;
use crate::pipeline::http::{describe_transport, error_detail};
use crate::pipeline::source::{check_size, content_sha1, io_to_pipeline, SourceFile};
use crate::pipeline::target::UploadTarget;
use crate::progress::ProgressCallback;
use crate::state::SubmissionState;
use futures::StreamExt;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

pub const HEADER_FILE_NAME: &str = "X-Bz-File-Name";
pub const HEADER_CONTENT_SHA1: &str = "X-Bz-Content-Sha1";
/// Checksum sentinel telling the provider to skip verification.
pub const DO_NOT_VERIFY: &str = "do_not_verify";

const CHUNK_SIZE: usize = 64 * 1024;

/// Characters `encodeURIComponent` leaves alone: `A-Z a-z 0-9 - _ . ! ~ * ' ( )`.
const FILE_NAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Percent-encode a file name for the `X-Bz-File-Name` header.
pub fn encode_file_name(name: &str) -> String {
    utf8_percent_encode(name, FILE_NAME_ENCODE_SET).to_string()
}

/// Value for the `X-Bz-Content-Sha1` header under `mode`.
pub async fn checksum_header(file: &SourceFile, mode: ChecksumMode) -> Result<String, PipelineError> {
    match mode {
        ChecksumMode::Sha1 => content_sha1(&file.local_path).await,
        ChecksumMode::DoNotVerify => Ok(DO_NOT_VERIFY.to_string()),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    file_name: String,
}

/// Stream `file` to `target` and return the stored object's name.
///
/// The target is consumed: a failed attempt needs a fresh one.
pub async fn upload_file(
    http: &reqwest::Client,
    file: &SourceFile,
    target: UploadTarget,
    content_sha1: &str,
    timeout_secs: u64,
    progress: Option<&ProgressCallback>,
) -> Result<String, PipelineError> {
    let upload_error = |status: Option<u16>, detail: String| PipelineError::Upload {
        file_name: file.display_name.clone(),
        status,
        detail,
    };

    let handle = tokio::fs::File::open(&file.local_path)
        .await
        .map_err(|e| io_to_pipeline(&file.local_path, e))?;
    let on_disk = handle
        .metadata()
        .await
        .map_err(|e| io_to_pipeline(&file.local_path, e))?
        .len();
    // Content-Length must match what the stream yields or the body is cut short.
    check_size(&file.local_path, file.size_bytes, on_disk)?;

    let total = file.size_bytes;
    let name = file.progress_key();
    let cb = progress.cloned();
    let mut sent = 0u64;
    let stream = ReaderStream::with_capacity(handle, CHUNK_SIZE).map(move |chunk| {
        if let Ok(bytes) = &chunk {
            sent += bytes.len() as u64;
            if let Some(cb) = &cb {
                cb.on_upload_progress(&name, sent, total);
            }
        }
        chunk
    });

    debug!(
        file = %file.display_name,
        size = total,
        url = %target.upload_url,
        "Streaming upload"
    );

    let response = http
        .post(&target.upload_url)
        .header(reqwest::header::AUTHORIZATION, target.authorization_token.as_str())
        .header(HEADER_FILE_NAME, encode_file_name(&file.display_name))
        .header(reqwest::header::CONTENT_TYPE, file.declared_mime_type.as_str())
        .header(reqwest::header::CONTENT_LENGTH, total)
        .header(HEADER_CONTENT_SHA1, content_sha1)
        .body(reqwest::Body::wrap_stream(stream))
        .timeout(Duration::from_secs(timeout_secs))
        .send()
        .await
        .map_err(|e| upload_error(None, describe_transport(&e, timeout_secs)))?;

    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(PipelineError::AuthExpired {
            status: status.as_u16(),
            during: SubmissionState::Uploading,
        });
    }
    if !status.is_success() {
        let (code, detail) = error_detail(response).await;
        return Err(upload_error(Some(code), detail));
    }

    let body: UploadResponse = response.json().await.map_err(|e| {
        upload_error(
            Some(status.as_u16()),
            format!("malformed upload response: {e}"),
        )
    })?;

    info!(
        file = %file.display_name,
        object = %body.file_name,
        bytes = total,
        "Upload complete"
    );
    Ok(body.file_name)
}
