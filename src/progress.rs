//! Progress-callback trait for submission events.
//!
//! Inject an [`Arc<dyn SubmissionProgressCallback>`] via
//! [`crate::config::SubmissionConfigBuilder::progress_callback`] to observe
//! state changes, upload byte counts, and credential refreshes as they happen.
//!
//! Callbacks keep the library ignorant of how the host reports progress: a
//! terminal bar, a channel into a UI, or a log line all fit behind the same
//! trait. The trait is `Send + Sync` because
//! [`crate::submit::Submitter::submit_all`] runs several submissions at once.
//!
//! # Example
//!
//! ```rust
//! use checkmate_submit::{SubmissionProgressCallback, SubmissionState};
//! use std::sync::{Arc, atomic::{AtomicU64, Ordering}};
//!
//! struct BytesSent(AtomicU64);
//!
//! impl SubmissionProgressCallback for BytesSent {
//!     fn on_upload_progress(&self, _file: &str, sent: u64, _total: u64) {
//!         self.0.store(sent, Ordering::Relaxed);
//!     }
//! }
//!
//! let cb: Arc<dyn SubmissionProgressCallback> = Arc::new(BytesSent(AtomicU64::new(0)));
//! cb.on_state_change("scan.pdf", SubmissionState::Uploading);
//! ```

use crate::state::SubmissionState;
use std::sync::Arc;

/// Called by the orchestrator as a submission moves through its states.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `file` is the local path of the submitted file, which
/// stays unique when several inputs share a display name.
///
/// # Thread safety
///
/// Events for different files may arrive concurrently from different tasks.
/// Implementations must protect shared mutable state with appropriate
/// synchronisation primitives (e.g. `Mutex`, `AtomicU64`).
pub trait SubmissionProgressCallback: Send + Sync {
    /// Called once before the first state change.
    ///
    /// # Arguments
    /// * `file`       — local path of the file
    /// * `size_bytes` — bytes that will be uploaded
    fn on_submission_start(&self, file: &str, size_bytes: u64) {
        let _ = (file, size_bytes);
    }

    /// Called on every state entered, including the recovery edge.
    fn on_state_change(&self, file: &str, state: SubmissionState) {
        let _ = (file, state);
    }

    /// Called as upload chunks are handed to the HTTP client.
    ///
    /// # Arguments
    /// * `sent`  — cumulative bytes streamed so far
    /// * `total` — file size
    fn on_upload_progress(&self, file: &str, sent: u64, total: u64) {
        let _ = (file, sent, total);
    }

    /// Called when a rejected credential forces a refresh.
    fn on_auth_refresh(&self, file: &str) {
        let _ = file;
    }

    /// Called once when the evaluation result arrives.
    fn on_submission_complete(&self, file: &str, public_url: &str) {
        let _ = (file, public_url);
    }

    /// Called once when the submission ends in `Failed`.
    ///
    /// # Arguments
    /// * `stage`  — state the error surfaced in
    /// * `stored` — whether the file is already in object storage
    /// * `error`  — human-readable error description
    fn on_submission_failed(&self, file: &str, stage: SubmissionState, stored: bool, error: &str) {
        let _ = (file, stage, stored, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl SubmissionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::SubmissionConfig`].
pub type ProgressCallback = Arc<dyn SubmissionProgressCallback>;
