//! Error types for the checkmate-submit library.
//!
//! Two layers reflect two questions a caller asks after a failure:
//!
//! * [`PipelineError`] — **what** went wrong. Each pipeline component fails
//!   fast with one of these (authorization, target resolution, upload,
//!   notification, or a local file problem).
//!
//! * [`SubmissionError`] — **where** it went wrong and what survived. Wraps the
//!   originating [`PipelineError`] together with the state the submission was
//!   in and, when the upload already finished, the durable
//!   [`StoredObjectReference`]. A caller holding a stored reference can retry
//!   notification alone via [`crate::submit::Submitter::renotify`] instead of
//!   re-uploading hundreds of megabytes.

use crate::output::StoredObjectReference;
use crate::state::SubmissionState;
use std::path::PathBuf;
use thiserror::Error;

/// All errors raised by individual pipeline components.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Source file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// Path exists but is a directory or other non-regular file.
    #[error("'{path}' is not a regular file")]
    NotAFile { path: PathBuf },

    /// Reading the file failed part-way (digest pass or upload stream setup).
    #[error("Failed to read '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File is larger than the configured limit; rejected before any network call.
    #[error("'{path}' is {size} bytes, over the {max}-byte upload limit")]
    FileTooLarge { path: PathBuf, size: u64, max: u64 },

    /// The size on disk no longer matches the size the upload was planned with.
    #[error("'{path}' is {actual} bytes on disk but {declared} bytes were declared")]
    SizeMismatch {
        path: PathBuf,
        declared: u64,
        actual: u64,
    },

    // ── Storage provider errors ───────────────────────────────────────────
    /// Could not obtain or refresh the account authorization.
    #[error("Storage authorization failed: {detail}")]
    Auth { status: Option<u16>, detail: String },

    /// The provider rejected a credential mid-flow (HTTP 401/403).
    ///
    /// Recoverable once per submission by forcing a credential refresh.
    #[error("Storage credential rejected (HTTP {status}) while {during}")]
    AuthExpired {
        status: u16,
        during: SubmissionState,
    },

    /// Could not obtain an upload target.
    #[error("Could not get an upload URL for bucket '{bucket_id}': {detail}")]
    Resolution {
        bucket_id: String,
        status: Option<u16>,
        detail: String,
    },

    /// Streaming the file to the upload target failed.
    #[error("Upload of '{file_name}' failed: {detail}")]
    Upload {
        file_name: String,
        status: Option<u16>,
        detail: String,
    },

    // ── Backend errors ────────────────────────────────────────────────────
    /// The evaluation backend rejected the request or returned malformed JSON.
    #[error("Evaluation request for '{url}' failed: {detail}")]
    Notify {
        url: String,
        status: Option<u16>,
        detail: String,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or environment validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// HTTP status attached to a provider/backend error, if one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            PipelineError::Auth { status, .. }
            | PipelineError::Resolution { status, .. }
            | PipelineError::Upload { status, .. }
            | PipelineError::Notify { status, .. } => *status,
            PipelineError::AuthExpired { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether a retry of the *same* idempotent call might succeed.
    ///
    /// Transport failures (no status), `429` and `5xx` qualify. Anything the
    /// server answered deliberately (other `4xx`, a malformed `2xx` body) does not.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Auth { status, .. }
            | PipelineError::Resolution { status, .. }
            | PipelineError::Upload { status, .. }
            | PipelineError::Notify { status, .. } => match status {
                None => true,
                Some(code) => *code == 429 || *code >= 500,
            },
            _ => false,
        }
    }

    /// `true` for the credential-rejected signal the orchestrator recovers from.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, PipelineError::AuthExpired { .. })
    }
}

/// Terminal outcome of a failed submission.
#[derive(Debug, Error)]
#[error("Submission failed while {stage}: {source}")]
pub struct SubmissionError {
    /// State the submission was in when the error surfaced.
    pub stage: SubmissionState,
    /// Present once the upload completed; the object is durably stored.
    pub stored: Option<StoredObjectReference>,
    #[source]
    pub source: PipelineError,
}

impl SubmissionError {
    pub fn new(
        stage: SubmissionState,
        stored: Option<StoredObjectReference>,
        source: PipelineError,
    ) -> Self {
        Self {
            stage,
            stored,
            source,
        }
    }

    /// `true` when the file already sits in object storage and only the
    /// evaluation request needs repeating.
    pub fn is_stored(&self) -> bool {
        self.stored.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        let transport = PipelineError::Resolution {
            bucket_id: "b".into(),
            status: None,
            detail: "connection reset".into(),
        };
        assert!(transport.is_transient());

        let overloaded = PipelineError::Auth {
            status: Some(503),
            detail: "service_unavailable".into(),
        };
        assert!(overloaded.is_transient());

        let throttled = PipelineError::Auth {
            status: Some(429),
            detail: "too_many_requests".into(),
        };
        assert!(throttled.is_transient());

        let bad_request = PipelineError::Resolution {
            bucket_id: "b".into(),
            status: Some(400),
            detail: "bad_bucket_id".into(),
        };
        assert!(!bad_request.is_transient());

        let expired = PipelineError::AuthExpired {
            status: 401,
            during: SubmissionState::ResolvingTarget,
        };
        assert!(!expired.is_transient());
        assert!(expired.is_auth_expired());
        assert_eq!(expired.status(), Some(401));
    }

    #[test]
    fn auth_expired_display_names_stage() {
        let e = PipelineError::AuthExpired {
            status: 401,
            during: SubmissionState::Uploading,
        };
        let msg = e.to_string();
        assert!(msg.contains("401"), "got: {msg}");
        assert!(msg.contains("uploading"), "got: {msg}");
    }

    #[test]
    fn file_too_large_display() {
        let e = PipelineError::FileTooLarge {
            path: PathBuf::from("/tmp/scan.pdf"),
            size: 2048,
            max: 1024,
        };
        let msg = e.to_string();
        assert!(msg.contains("2048"), "got: {msg}");
        assert!(msg.contains("1024"), "got: {msg}");
    }

    #[test]
    fn size_mismatch_display() {
        let e = PipelineError::SizeMismatch {
            path: PathBuf::from("/tmp/scan.pdf"),
            declared: 3,
            actual: 20,
        };
        let msg = e.to_string();
        assert!(msg.contains("20 bytes on disk"), "got: {msg}");
        assert!(msg.contains("3 bytes were declared"), "got: {msg}");
        assert!(!e.is_transient());
    }

    #[test]
    fn submission_error_reports_storage() {
        let stored = StoredObjectReference::new(
            "report_123.pdf",
            "https://f005.backblazeb2.com/file/CheckMate/",
        );
        let e = SubmissionError::new(
            SubmissionState::Notifying,
            Some(stored),
            PipelineError::Notify {
                url: "https://f005.backblazeb2.com/file/CheckMate/report_123.pdf".into(),
                status: Some(500),
                detail: "HTTP 500".into(),
            },
        );
        assert!(e.is_stored());
        assert!(e.to_string().contains("notifying"));

        let e = SubmissionError::new(
            SubmissionState::Uploading,
            None,
            PipelineError::Upload {
                file_name: "scan.pdf".into(),
                status: Some(400),
                detail: "bad_request".into(),
            },
        );
        assert!(!e.is_stored());
    }
}
