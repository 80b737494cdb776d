//! Submission entry points: the pipeline orchestrator.
//!
//! A [`Submitter`] owns one HTTP client and one [`CredentialCache`]. Each call
//! to [`Submitter::submit`] drives a fresh [`StateMachine`] through
//!
//! ```text
//! Idle → Authorizing → ResolvingTarget → Uploading → Notifying → Done
//! ```
//!
//! with a single permitted detour back to `Authorizing` when the provider
//! rejects a credential mid-flow. Submissions share the credential cache and
//! nothing else, so any number of them may run at once.

use crate::config::{ChecksumMode, SubmissionConfig};
use crate::error::{PipelineError, SubmissionError};
use crate::output::{EvaluationResult, StoredObjectReference, SubmissionOutput, SubmissionStats};
use crate::pipeline::credentials::{Credential, CredentialCache};
use crate::pipeline::source::SourceFile;
use crate::pipeline::{http, notify, retry, target, upload};
use crate::state::{StateMachine, SubmissionState};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Runs document submissions against one storage account and backend.
#[derive(Debug)]
pub struct Submitter {
    config: SubmissionConfig,
    http: reqwest::Client,
    credentials: Arc<CredentialCache>,
}

impl Submitter {
    /// Create a submitter with its own, initially empty, credential cache.
    pub fn new(config: SubmissionConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let http = http::build_client(config.request_timeout_secs)?;
        let credentials = Arc::new(CredentialCache::new(http.clone(), &config));
        Ok(Self {
            config,
            http,
            credentials,
        })
    }

    /// Create a submitter that shares an existing credential cache.
    pub fn with_cache(
        config: SubmissionConfig,
        credentials: Arc<CredentialCache>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let http = http::build_client(config.request_timeout_secs)?;
        Ok(Self {
            config,
            http,
            credentials,
        })
    }

    /// Create a submitter for [`Self::evaluate_url`] alone.
    ///
    /// Only the backend settings are validated; storage credentials may be
    /// empty. Uploads through such a submitter fail in `Idle` with
    /// [`PipelineError::InvalidConfig`] before any request is made.
    pub fn evaluation_only(config: SubmissionConfig) -> Result<Self, PipelineError> {
        config.validate_backend()?;
        let http = http::build_client(config.request_timeout_secs)?;
        let credentials = Arc::new(CredentialCache::new(http.clone(), &config));
        Ok(Self {
            config,
            http,
            credentials,
        })
    }

    pub fn config(&self) -> &SubmissionConfig {
        &self.config
    }

    pub fn credentials(&self) -> &Arc<CredentialCache> {
        &self.credentials
    }

    /// Submit a file given as a local path or `file://` URI.
    ///
    /// # Errors
    /// Returns [`SubmissionError`] naming the state the failure surfaced in.
    /// `error.stored` is set when the upload finished before the failure.
    pub async fn submit(&self, input: impl AsRef<str>) -> Result<SubmissionOutput, SubmissionError> {
        let source = SourceFile::from_path(input.as_ref())
            .await
            .map_err(|e| SubmissionError::new(SubmissionState::Idle, None, e))?;
        self.submit_file(source).await
    }

    /// Submit an already-described file.
    pub async fn submit_file(&self, source: SourceFile) -> Result<SubmissionOutput, SubmissionError> {
        let started = Instant::now();
        let key = source.progress_key();
        let mut run = Run {
            submitter: self,
            source: &source,
            key: &key,
            machine: StateMachine::new(),
            stats: SubmissionStats::default(),
            stored: None,
        };

        info!(
            file = %source.display_name,
            size = source.size_bytes,
            "Starting submission"
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_submission_start(&key, source.size_bytes);
        }

        let result = run.execute().await;
        match result {
            Ok(evaluation) => {
                let Run {
                    machine,
                    mut stats,
                    stored,
                    ..
                } = run;
                let stored = stored.ok_or_else(|| {
                    SubmissionError::new(
                        SubmissionState::Done,
                        None,
                        PipelineError::Internal("finished without a stored object".into()),
                    )
                })?;
                stats.states = machine.history().to_vec();
                stats.total_duration_ms = started.elapsed().as_millis() as u64;

                info!(
                    file = %source.display_name,
                    url = %stored.public_url,
                    ms = stats.total_duration_ms,
                    "Submission complete"
                );
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_submission_complete(&key, &stored.public_url);
                }

                Ok(SubmissionOutput {
                    source,
                    stored,
                    evaluation,
                    stats,
                })
            }
            Err(error) => {
                let stage = run.machine.current();
                run.machine.fail();
                let stored = run.stored.take();

                warn!(
                    file = %source.display_name,
                    %stage,
                    stored = stored.is_some(),
                    "Submission failed: {}",
                    error
                );
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_state_change(&key, SubmissionState::Failed);
                    cb.on_submission_failed(
                        &key,
                        stage,
                        stored.is_some(),
                        &error.to_string(),
                    );
                }

                Err(SubmissionError::new(stage, stored, error))
            }
        }
    }

    /// Submit several files, at most `config.concurrency` at a time.
    ///
    /// Each item runs the single-file pipeline independently; one failure does
    /// not stop the others. Results come back in input order.
    pub async fn submit_all<I, S>(&self, inputs: I) -> Vec<Result<SubmissionOutput, SubmissionError>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let inputs: Vec<String> = inputs
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        stream::iter(inputs.iter().map(|input| self.submit(input)))
            .buffered(self.config.concurrency)
            .collect()
            .await
    }

    /// Ask for an evaluation of a document that is already publicly reachable.
    ///
    /// No storage calls are made.
    pub async fn evaluate_url(&self, url: &str) -> Result<EvaluationResult, SubmissionError> {
        self.notify_only(url, None).await
    }

    /// Repeat the evaluation request for an object a previous submission stored.
    pub async fn renotify(
        &self,
        stored: &StoredObjectReference,
    ) -> Result<EvaluationResult, SubmissionError> {
        self.notify_only(&stored.public_url, Some(stored.clone()))
            .await
    }

    async fn notify_only(
        &self,
        url: &str,
        stored: Option<StoredObjectReference>,
    ) -> Result<EvaluationResult, SubmissionError> {
        info!(%url, "Requesting evaluation without upload");
        notify::notify(
            &self.http,
            &self.config.evaluation_endpoint(),
            url,
            self.config.request_timeout_secs,
        )
        .await
        .map_err(|e| SubmissionError::new(SubmissionState::Notifying, stored, e))
    }
}

/// Blocking wrapper around [`Submitter::submit`].
///
/// Creates a temporary tokio runtime internally.
pub fn submit_sync(
    config: SubmissionConfig,
    input: impl AsRef<str>,
) -> Result<SubmissionOutput, SubmissionError> {
    let idle = |e: PipelineError| SubmissionError::new(SubmissionState::Idle, None, e);
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| idle(PipelineError::Internal(format!("Failed to create tokio runtime: {e}"))))?;
    let submitter = Submitter::new(config).map_err(idle)?;
    runtime.block_on(submitter.submit(input))
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// State for one submission in flight.
struct Run<'a> {
    submitter: &'a Submitter,
    source: &'a SourceFile,
    key: &'a str,
    machine: StateMachine,
    stats: SubmissionStats,
    stored: Option<StoredObjectReference>,
}

impl Run<'_> {
    async fn execute(&mut self) -> Result<EvaluationResult, PipelineError> {
        let submitter = self.submitter;
        let config = &submitter.config;

        // ── Pre-flight: no network before these pass ─────────────────────
        config.validate()?;
        self.source.verify_size().await?;
        self.source.ensure_within(config.max_file_bytes)?;
        let checksum = upload::checksum_header(self.source, config.checksum).await?;
        if config.checksum == ChecksumMode::Sha1 {
            self.stats.content_sha1 = Some(checksum.clone());
        }

        // ── Authorize ────────────────────────────────────────────────────
        self.enter(SubmissionState::Authorizing)?;
        let mut credential = submitter.credentials.get(false).await?;

        // ── Resolve + upload, with at most one credential refresh ────────
        let object_name = loop {
            self.enter(SubmissionState::ResolvingTarget)?;
            let target = match self.resolve_target(&credential).await {
                Ok(target) => target,
                Err(e) if e.is_auth_expired() => {
                    credential = self.recover(e).await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            self.enter(SubmissionState::Uploading)?;
            let upload_start = Instant::now();
            let uploaded = upload::upload_file(
                &submitter.http,
                self.source,
                target,
                &checksum,
                config.upload_timeout_secs,
                config.progress_callback.as_ref(),
            )
            .await;
            self.stats.upload_duration_ms = upload_start.elapsed().as_millis() as u64;

            match uploaded {
                Ok(name) => break name,
                Err(e) if e.is_auth_expired() => {
                    credential = self.recover(e).await?;
                }
                Err(e) => return Err(e),
            }
        };
        self.stats.bytes_uploaded = self.source.size_bytes;

        let reference = StoredObjectReference::new(object_name, &config.public_url_prefix());
        let public_url = reference.public_url.clone();
        self.stored = Some(reference);

        // ── Notify ───────────────────────────────────────────────────────
        self.enter(SubmissionState::Notifying)?;
        let notify_start = Instant::now();
        let evaluation = notify::notify(
            &submitter.http,
            &config.evaluation_endpoint(),
            &public_url,
            config.request_timeout_secs,
        )
        .await?;
        self.stats.notify_duration_ms = notify_start.elapsed().as_millis() as u64;

        self.enter(SubmissionState::Done)?;
        Ok(evaluation)
    }

    /// Target resolution is idempotent, so transient failures are retried.
    async fn resolve_target(
        &self,
        credential: &Credential,
    ) -> Result<target::UploadTarget, PipelineError> {
        let config = &self.submitter.config;
        retry::with_backoff(
            "get upload url",
            config.max_retries,
            config.retry_backoff_ms,
            || {
                target::resolve_upload_target(
                    &self.submitter.http,
                    credential,
                    &config.bucket_id,
                    config.request_timeout_secs,
                )
            },
        )
        .await
    }

    /// Take the single `AuthExpired` edge, or hand back `rejected` if it is spent.
    async fn recover(&mut self, rejected: PipelineError) -> Result<Arc<Credential>, PipelineError> {
        if !self.machine.recover() {
            return Err(rejected);
        }
        self.stats.auth_refreshes += 1;
        warn!(
            file = %self.source.display_name,
            "{}; refreshing storage credential",
            rejected
        );
        if let Some(ref cb) = self.submitter.config.progress_callback {
            cb.on_auth_refresh(self.key);
            cb.on_state_change(self.key, SubmissionState::Authorizing);
        }
        self.submitter.credentials.get(true).await
    }

    fn enter(&mut self, next: SubmissionState) -> Result<(), PipelineError> {
        self.machine.advance(next)?;
        if let Some(ref cb) = self.submitter.config.progress_callback {
            cb.on_state_change(self.key, next);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SubmissionProgressCallback;
    use httpmock::prelude::*;
    use std::io::Write;
    use std::sync::Mutex;

    fn config_for(server: &MockServer) -> SubmissionConfig {
        SubmissionConfig::builder()
            .key_id("kid")
            .application_key("secret")
            .bucket_id("bucket-9")
            .auth_url(server.base_url())
            .backend_url(server.base_url())
            .retry_backoff_ms(1)
            .build()
            .unwrap()
    }

    fn temp_pdf(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        file.write_all(bytes).unwrap();
        file
    }

    #[derive(Default)]
    struct Recorder {
        keys: Mutex<Vec<String>>,
        states: Mutex<Vec<SubmissionState>>,
        failed: Mutex<Option<(SubmissionState, bool)>>,
    }

    impl SubmissionProgressCallback for Recorder {
        fn on_submission_start(&self, file: &str, _size_bytes: u64) {
            self.keys.lock().unwrap().push(file.to_string());
        }
        fn on_state_change(&self, _file: &str, state: SubmissionState) {
            self.states.lock().unwrap().push(state);
        }
        fn on_submission_failed(&self, _file: &str, stage: SubmissionState, stored: bool, _e: &str) {
            *self.failed.lock().unwrap() = Some((stage, stored));
        }
    }

    #[test]
    fn new_rejects_incomplete_config() {
        let err = Submitter::new(SubmissionConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn missing_file_fails_while_idle() {
        let server = MockServer::start_async().await;
        let submitter = Submitter::new(config_for(&server)).unwrap();

        let err = submitter
            .submit("/definitely/not/here.pdf")
            .await
            .unwrap_err();
        assert_eq!(err.stage, SubmissionState::Idle);
        assert!(!err.is_stored());
        assert!(matches!(err.source, PipelineError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn oversize_file_makes_no_requests() {
        let server = MockServer::start_async().await;
        let auth = server
            .mock_async(|when, then| {
                when.path_includes("/");
                then.status(500);
            })
            .await;

        let recorder = Arc::new(Recorder::default());
        let mut config = config_for(&server);
        config.max_file_bytes = 4;
        config.progress_callback = Some(recorder.clone());
        let submitter = Submitter::new(config).unwrap();

        let file = temp_pdf(b"more than four bytes");
        let err = submitter
            .submit(file.path().to_str().unwrap())
            .await
            .unwrap_err();

        assert_eq!(err.stage, SubmissionState::Idle);
        assert!(matches!(err.source, PipelineError::FileTooLarge { max: 4, .. }));
        assert_eq!(
            *recorder.failed.lock().unwrap(),
            Some((SubmissionState::Idle, false))
        );
        assert_eq!(
            *recorder.keys.lock().unwrap(),
            vec![file.path().display().to_string()]
        );
        auth.assert_calls_async(0).await;
    }

    #[tokio::test]
    async fn understated_size_cannot_slip_under_limit() {
        let server = MockServer::start_async().await;
        let any = server
            .mock_async(|when, then| {
                when.path_includes("/");
                then.status(500);
            })
            .await;

        let mut config = config_for(&server);
        config.max_file_bytes = 4;
        let submitter = Submitter::new(config).unwrap();

        let file = temp_pdf(&[b'x'; 20]);
        let source = SourceFile::new(file.path(), "a.pdf", "application/pdf", 3);
        let err = submitter.submit_file(source).await.unwrap_err();

        assert_eq!(err.stage, SubmissionState::Idle);
        assert!(!err.is_stored());
        assert!(
            matches!(
                err.source,
                PipelineError::SizeMismatch { declared: 3, actual: 20, .. }
            ),
            "got: {}",
            err.source
        );
        any.assert_calls_async(0).await;
    }

    #[tokio::test]
    async fn evaluation_only_needs_no_storage_settings() {
        let server = MockServer::start_async().await;
        let any = server
            .mock_async(|when, then| {
                when.path_includes("/b2api");
                then.status(500);
            })
            .await;
        let backend = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/main-answer");
                then.status(200).json_body(serde_json::json!({ "score": 3 }));
            })
            .await;

        let config = SubmissionConfig {
            backend_url: server.base_url(),
            ..Default::default()
        };
        assert!(Submitter::new(config.clone()).is_err());
        let submitter = Submitter::evaluation_only(config).unwrap();

        let result = submitter
            .evaluate_url("https://cdn.example.com/a.pdf")
            .await
            .unwrap();
        assert_eq!(result.as_json()["score"], 3);
        backend.assert_async().await;

        let file = temp_pdf(b"%PDF-1.4");
        let err = submitter
            .submit(file.path().to_str().unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.stage, SubmissionState::Idle);
        assert!(matches!(err.source, PipelineError::InvalidConfig(_)));
        any.assert_calls_async(0).await;
    }

    #[tokio::test]
    async fn notify_failure_keeps_stored_reference() {
        let server = MockServer::start_async().await;
        let base = server.base_url();
        server
            .mock_async(|when, then| {
                when.method(GET).path("/b2api/v2/b2_authorize_account");
                then.status(200).json_body(serde_json::json!({
                    "apiUrl": base,
                    "authorizationToken": "tok1",
                    "downloadUrl": "https://f005.backblazeb2.com"
                }));
            })
            .await;
        let upload_url = server.url("/upload");
        server
            .mock_async(|when, then| {
                when.method(POST).path("/b2api/v2/b2_get_upload_url");
                then.status(200).json_body(serde_json::json!({
                    "uploadUrl": upload_url,
                    "authorizationToken": "tok2"
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/upload");
                then.status(200)
                    .json_body(serde_json::json!({ "fileName": "a_1.pdf" }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/main-answer");
                then.status(502).body("bad gateway");
            })
            .await;

        let recorder = Arc::new(Recorder::default());
        let mut config = config_for(&server);
        config.progress_callback = Some(recorder.clone());
        let submitter = Submitter::new(config).unwrap();

        let file = temp_pdf(b"%PDF-1.4");
        let err = submitter
            .submit(file.path().to_str().unwrap())
            .await
            .unwrap_err();

        assert_eq!(err.stage, SubmissionState::Notifying);
        let stored = err.stored.as_ref().unwrap();
        assert_eq!(stored.object_name, "a_1.pdf");
        assert_eq!(
            stored.public_url,
            "https://f005.backblazeb2.com/file/CheckMate/a_1.pdf"
        );
        assert_eq!(
            recorder.states.lock().unwrap().last(),
            Some(&SubmissionState::Failed)
        );
        assert_eq!(
            *recorder.failed.lock().unwrap(),
            Some((SubmissionState::Notifying, true))
        );
    }

    #[tokio::test]
    async fn evaluate_url_only_calls_backend() {
        let server = MockServer::start_async().await;
        let storage = server
            .mock_async(|when, then| {
                when.path_includes("/b2api");
                then.status(500);
            })
            .await;
        let backend = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/main-answer")
                    .json_body(serde_json::json!({ "url": "https://cdn.example.com/a.pdf" }));
                then.status(200).json_body(serde_json::json!({ "score": 7 }));
            })
            .await;

        let submitter = Submitter::new(config_for(&server)).unwrap();
        let result = submitter
            .evaluate_url("https://cdn.example.com/a.pdf")
            .await
            .unwrap();

        assert_eq!(result.as_json()["score"], 7);
        backend.assert_async().await;
        storage.assert_calls_async(0).await;
    }
}
