//! Output types returned by a successful submission.

use crate::pipeline::source::SourceFile;
use crate::state::SubmissionState;
use serde::{Deserialize, Serialize};

/// Durable reference to an uploaded object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObjectReference {
    /// Provider-assigned object name (`fileName` in the upload response).
    pub object_name: String,
    /// Publicly resolvable URL handed to the evaluator.
    pub public_url: String,
}

impl StoredObjectReference {
    /// Build the reference from the public-URL prefix and an object name.
    ///
    /// The name is appended verbatim. The provider already returns it
    /// decoded, so encoding here would corrupt names with spaces or `%`.
    pub fn new(object_name: impl Into<String>, public_url_prefix: &str) -> Self {
        let object_name = object_name.into();
        let public_url = format!("{public_url_prefix}{object_name}");
        Self {
            object_name,
            public_url,
        }
    }
}

/// Backend-defined evaluation payload. Only guaranteed to be valid JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvaluationResult(pub serde_json::Value);

impl EvaluationResult {
    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_json(self) -> serde_json::Value {
        self.0
    }
}

/// Everything a caller gets back from a successful submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionOutput {
    pub source: SourceFile,
    pub stored: StoredObjectReference,
    pub evaluation: EvaluationResult,
    pub stats: SubmissionStats,
}

/// Timing and bookkeeping for one submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionStats {
    /// Every state entered, starting with `Idle`.
    pub states: Vec<SubmissionState>,
    /// Forced credential refreshes (0 or 1).
    pub auth_refreshes: u32,
    /// Bytes streamed to object storage by the successful attempt.
    pub bytes_uploaded: u64,
    /// Hex SHA-1 sent with the upload, when computed.
    pub content_sha1: Option<String>,
    pub upload_duration_ms: u64,
    pub notify_duration_ms: u64,
    pub total_duration_ms: u64,
}
