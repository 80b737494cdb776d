//! Configuration types for document submission.
//!
//! All pipeline behaviour is controlled through [`SubmissionConfig`], built
//! via its [`SubmissionConfigBuilder`] or read from the environment with
//! [`SubmissionConfig::from_env`]. Storage secrets and the backend address are
//! always supplied from outside; nothing sensitive has a baked-in default.

use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Environment variables ────────────────────────────────────────────────

pub const ENV_KEY_ID: &str = "B2_KEY_ID";
pub const ENV_APPLICATION_KEY: &str = "B2_APPLICATION_KEY";
pub const ENV_BUCKET_ID: &str = "B2_BUCKET_ID";
pub const ENV_BUCKET_NAME: &str = "B2_BUCKET_NAME";
pub const ENV_DOWNLOAD_URL: &str = "B2_DOWNLOAD_URL";
pub const ENV_AUTH_URL: &str = "B2_AUTH_URL";
pub const ENV_BACKEND_URL: &str = "CHECKMATE_BACKEND_URL";
pub const ENV_EVALUATION_PATH: &str = "CHECKMATE_EVALUATION_PATH";

// ── Defaults ─────────────────────────────────────────────────────────────

pub const DEFAULT_AUTH_URL: &str = "https://api.backblazeb2.com";
pub const DEFAULT_DOWNLOAD_URL: &str = "https://f005.backblazeb2.com";
pub const DEFAULT_BUCKET_NAME: &str = "CheckMate";
pub const DEFAULT_EVALUATION_PATH: &str = "/api/main-answer";
/// 512 MiB: comfortably above the ~300 MB scans seen in practice.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 512 * 1024 * 1024;

/// Configuration for the submission pipeline.
///
/// # Example
/// ```rust
/// use checkmate_submit::SubmissionConfig;
///
/// let config = SubmissionConfig::builder()
///     .key_id("005f9adfe9072bf0000000001")
///     .application_key("K005-secret")
///     .bucket_id("2f39aa9d5f8e396097720b1f")
///     .backend_url("http://localhost:3000")
///     .build()
///     .unwrap();
/// assert_eq!(
///     config.public_url_prefix(),
///     "https://f005.backblazeb2.com/file/CheckMate/"
/// );
/// ```
#[derive(Clone)]
pub struct SubmissionConfig {
    /// Storage application key identifier (Basic-auth user).
    pub key_id: String,

    /// Storage application key secret (Basic-auth password).
    pub application_key: String,

    /// Bucket uploads go into.
    pub bucket_id: String,

    /// Human-readable bucket name, baked into public object URLs. Default: `CheckMate`.
    pub bucket_name: String,

    /// Download host used for public object URLs. Default: `https://f005.backblazeb2.com`.
    pub download_url: String,

    /// Account-authorization host. Default: `https://api.backblazeb2.com`.
    pub auth_url: String,

    /// Base URL of the evaluation backend, e.g. `http://172.16.10.0:3000`.
    pub backend_url: String,

    /// Path of the evaluation endpoint under `backend_url`. Default: `/api/main-answer`.
    pub evaluation_path: String,

    /// How the upload's content-checksum header is filled. Default: [`ChecksumMode::Sha1`].
    pub checksum: ChecksumMode,

    /// Largest file accepted for upload, checked before any network call.
    pub max_file_bytes: u64,

    /// Deadline for each control call (authorize, get-upload-url, notify). Default: 30.
    pub request_timeout_secs: u64,

    /// Deadline for one upload stream. Default: 600.
    ///
    /// A 300 MB scan over a 5 Mbit/s uplink needs about eight minutes.
    pub upload_timeout_secs: u64,

    /// Retries for transient failures on idempotent calls. Default: 2.
    ///
    /// Applies to authorization and target resolution only. The upload is
    /// never replayed against a used target and notification is never
    /// retried automatically. `0` disables retries, so authorization and
    /// target resolution fail on their first error.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubling per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Concurrent submissions in [`crate::submit::Submitter::submit_all`]. Default: 4.
    pub concurrency: usize,

    /// Optional observer for state changes and upload progress.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            key_id: String::new(),
            application_key: String::new(),
            bucket_id: String::new(),
            bucket_name: DEFAULT_BUCKET_NAME.to_string(),
            download_url: DEFAULT_DOWNLOAD_URL.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            backend_url: String::new(),
            evaluation_path: DEFAULT_EVALUATION_PATH.to_string(),
            checksum: ChecksumMode::default(),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            request_timeout_secs: 30,
            upload_timeout_secs: 600,
            max_retries: 2,
            retry_backoff_ms: 500,
            concurrency: 4,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for SubmissionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmissionConfig")
            .field("key_id", &self.key_id)
            .field("application_key", &"<redacted>")
            .field("bucket_id", &self.bucket_id)
            .field("bucket_name", &self.bucket_name)
            .field("download_url", &self.download_url)
            .field("auth_url", &self.auth_url)
            .field("backend_url", &self.backend_url)
            .field("evaluation_path", &self.evaluation_path)
            .field("checksum", &self.checksum)
            .field("max_file_bytes", &self.max_file_bytes)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("upload_timeout_secs", &self.upload_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("concurrency", &self.concurrency)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn SubmissionProgressCallback>"),
            )
            .finish()
    }
}

impl SubmissionConfig {
    /// Create a new builder for `SubmissionConfig`.
    pub fn builder() -> SubmissionConfigBuilder {
        SubmissionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Build a configuration from `B2_*` / `CHECKMATE_*` environment variables.
    ///
    /// `B2_KEY_ID`, `B2_APPLICATION_KEY`, `B2_BUCKET_ID` and
    /// `CHECKMATE_BACKEND_URL` are required; the rest fall back to defaults.
    pub fn from_env() -> Result<Self, PipelineError> {
        let mut builder = Self::builder();
        if let Some(v) = env_var(ENV_KEY_ID) {
            builder = builder.key_id(v);
        }
        if let Some(v) = env_var(ENV_APPLICATION_KEY) {
            builder = builder.application_key(v);
        }
        if let Some(v) = env_var(ENV_BUCKET_ID) {
            builder = builder.bucket_id(v);
        }
        if let Some(v) = env_var(ENV_BUCKET_NAME) {
            builder = builder.bucket_name(v);
        }
        if let Some(v) = env_var(ENV_DOWNLOAD_URL) {
            builder = builder.download_url(v);
        }
        if let Some(v) = env_var(ENV_AUTH_URL) {
            builder = builder.auth_url(v);
        }
        if let Some(v) = env_var(ENV_BACKEND_URL) {
            builder = builder.backend_url(v);
        }
        if let Some(v) = env_var(ENV_EVALUATION_PATH) {
            builder = builder.evaluation_path(v);
        }
        builder.build()
    }

    /// Everything in a public object URL before the object name.
    pub fn public_url_prefix(&self) -> String {
        format!(
            "{}/file/{}/",
            self.download_url.trim_end_matches('/'),
            self.bucket_name
        )
    }

    /// Full URL of the evaluation endpoint.
    pub fn evaluation_endpoint(&self) -> String {
        let base = self.backend_url.trim_end_matches('/');
        if self.evaluation_path.starts_with('/') {
            format!("{}{}", base, self.evaluation_path)
        } else {
            format!("{}/{}", base, self.evaluation_path)
        }
    }

    /// Check required fields and value ranges.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let required = [
            (ENV_KEY_ID, &self.key_id),
            (ENV_APPLICATION_KEY, &self.application_key),
            (ENV_BUCKET_ID, &self.bucket_id),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(PipelineError::InvalidConfig(format!(
                    "{name} is not set"
                )));
            }
        }
        if self.bucket_name.trim().is_empty() {
            return Err(PipelineError::InvalidConfig("bucket name is empty".into()));
        }
        for (name, url) in [
            ("download URL", &self.download_url),
            ("auth URL", &self.auth_url),
        ] {
            if !is_http_url(url) {
                return Err(PipelineError::InvalidConfig(format!(
                    "{name} must start with http:// or https://, got '{url}'"
                )));
            }
        }
        if self.max_file_bytes == 0 {
            return Err(PipelineError::InvalidConfig(
                "max file size must be ≥ 1 byte".into(),
            ));
        }
        if self.concurrency == 0 {
            return Err(PipelineError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        self.validate_backend()
    }

    /// The subset of [`Self::validate`] that evaluation-only use needs.
    ///
    /// Storage credentials and bucket settings are not checked.
    pub fn validate_backend(&self) -> Result<(), PipelineError> {
        if self.backend_url.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(format!(
                "{ENV_BACKEND_URL} is not set"
            )));
        }
        if !is_http_url(&self.backend_url) {
            return Err(PipelineError::InvalidConfig(format!(
                "backend URL must start with http:// or https://, got '{}'",
                self.backend_url
            )));
        }
        if self.request_timeout_secs == 0 || self.upload_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "timeouts must be ≥ 1 second".into(),
            ));
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Builder for [`SubmissionConfig`].
#[derive(Debug)]
pub struct SubmissionConfigBuilder {
    config: SubmissionConfig,
}

impl SubmissionConfigBuilder {
    pub fn key_id(mut self, key_id: impl Into<String>) -> Self {
        self.config.key_id = key_id.into();
        self
    }

    pub fn application_key(mut self, key: impl Into<String>) -> Self {
        self.config.application_key = key.into();
        self
    }

    pub fn bucket_id(mut self, id: impl Into<String>) -> Self {
        self.config.bucket_id = id.into();
        self
    }

    pub fn bucket_name(mut self, name: impl Into<String>) -> Self {
        self.config.bucket_name = name.into();
        self
    }

    pub fn download_url(mut self, url: impl Into<String>) -> Self {
        self.config.download_url = url.into();
        self
    }

    pub fn auth_url(mut self, url: impl Into<String>) -> Self {
        self.config.auth_url = url.into();
        self
    }

    pub fn backend_url(mut self, url: impl Into<String>) -> Self {
        self.config.backend_url = url.into();
        self
    }

    pub fn evaluation_path(mut self, path: impl Into<String>) -> Self {
        self.config.evaluation_path = path.into();
        self
    }

    pub fn checksum(mut self, mode: ChecksumMode) -> Self {
        self.config.checksum = mode;
        self
    }

    pub fn max_file_bytes(mut self, bytes: u64) -> Self {
        self.config.max_file_bytes = bytes;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn upload_timeout_secs(mut self, secs: u64) -> Self {
        self.config.upload_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<SubmissionConfig, PipelineError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// What goes into the upload's `X-Bz-Content-Sha1` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumMode {
    /// Hash the file (streamed, 64 KiB chunks) and let the provider verify it. (default)
    #[default]
    Sha1,
    /// Send the provider's `do_not_verify` sentinel; no integrity check.
    DoNotVerify,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> SubmissionConfigBuilder {
        SubmissionConfig::builder()
            .key_id("kid")
            .application_key("secret")
            .bucket_id("bucket-1")
            .backend_url("http://localhost:3000")
    }

    #[test]
    fn defaults() {
        let c = SubmissionConfig::default();
        assert_eq!(c.bucket_name, "CheckMate");
        assert_eq!(c.auth_url, "https://api.backblazeb2.com");
        assert_eq!(c.evaluation_path, "/api/main-answer");
        assert_eq!(c.checksum, ChecksumMode::Sha1);
        assert_eq!(c.max_retries, 2);
    }

    #[test]
    fn missing_credentials_rejected() {
        let err = SubmissionConfig::builder()
            .bucket_id("b")
            .backend_url("http://x")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains(ENV_KEY_ID), "got: {err}");
    }

    #[test]
    fn non_http_backend_rejected() {
        let err = valid().backend_url("ftp://host").build().unwrap_err();
        assert!(err.to_string().contains("backend URL"), "got: {err}");
    }

    #[test]
    fn public_url_prefix_trims_trailing_slash() {
        let c = valid()
            .download_url("https://f005.backblazeb2.com/")
            .build()
            .unwrap();
        assert_eq!(
            c.public_url_prefix(),
            "https://f005.backblazeb2.com/file/CheckMate/"
        );
    }

    #[test]
    fn evaluation_endpoint_joins_path() {
        let c = valid().backend_url("http://10.0.0.2:3000/").build().unwrap();
        assert_eq!(c.evaluation_endpoint(), "http://10.0.0.2:3000/api/main-answer");

        let c = valid().evaluation_path("api/check").build().unwrap();
        assert_eq!(c.evaluation_endpoint(), "http://localhost:3000/api/check");
    }

    #[test]
    fn backend_only_validation_ignores_storage() {
        let mut c = SubmissionConfig::default();
        c.backend_url = "http://localhost:3000".into();
        assert!(c.validate_backend().is_ok());
        assert!(c.validate().is_err());

        c.backend_url = String::new();
        let err = c.validate_backend().unwrap_err();
        assert!(err.to_string().contains(ENV_BACKEND_URL), "got: {err}");
    }

    #[test]
    fn concurrency_clamped_to_one() {
        let c = valid().concurrency(0).build().unwrap();
        assert_eq!(c.concurrency, 1);
    }

    #[test]
    fn debug_redacts_secret() {
        let c = valid().build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("secret"), "got: {dbg}");
        assert!(dbg.contains("<redacted>"));
    }
}
