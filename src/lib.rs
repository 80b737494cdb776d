//! # checkmate-submit
//!
//! Submit a locally selected document (typically a PDF of answers) for
//! automated evaluation.
//!
//! The evaluation backend never receives the file itself. The document is
//! first stored in a public Backblaze B2 bucket, then the backend is told the
//! object's public URL and fetches it on its own. This crate drives that
//! chain and returns whatever JSON the backend answers with.
//!
//! ## Pipeline Overview
//!
//! ```text
//! file / file:// URI
//!  │
//!  ├─ 1. Source      resolve path, size, MIME type; size pre-flight
//!  ├─ 2. Authorize   account token (cached, shared between submissions)
//!  ├─ 3. Resolve     one-time upload URL + upload token
//!  ├─ 4. Upload      stream from disk with SHA-1 + name headers
//!  ├─ 5. Notify      POST {"url": public URL} to the evaluation backend
//!  └─ 6. Output      stored object reference + evaluation JSON + stats
//! ```
//!
//! A rejected credential during steps 3–4 triggers exactly one forced
//! re-authorization; a second rejection fails the submission.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use checkmate_submit::{SubmissionConfig, Submitter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // B2_KEY_ID, B2_APPLICATION_KEY, B2_BUCKET_ID, CHECKMATE_BACKEND_URL
//!     let config = SubmissionConfig::from_env()?;
//!     let submitter = Submitter::new(config)?;
//!
//!     let output = submitter.submit("answers.pdf").await?;
//!     println!("stored at {}", output.stored.public_url);
//!     println!("{}", output.evaluation.as_json());
//!     Ok(())
//! }
//! ```
//!
//! When the upload succeeds but the backend call fails, the error still
//! carries the stored object so only the last step needs repeating:
//!
//! ```rust,no_run
//! # use checkmate_submit::{SubmissionConfig, Submitter};
//! # async fn run(submitter: Submitter) -> Result<(), Box<dyn std::error::Error>> {
//! match submitter.submit("answers.pdf").await {
//!     Ok(output) => println!("{}", output.evaluation.as_json()),
//!     Err(e) => match e.stored {
//!         Some(ref stored) => {
//!             let evaluation = submitter.renotify(stored).await?;
//!             println!("{}", evaluation.as_json());
//!         }
//!         None => return Err(e.into()),
//!     },
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `checkmate` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! checkmate-submit = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod state;
pub mod submit;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ChecksumMode, SubmissionConfig, SubmissionConfigBuilder};
pub use error::{PipelineError, SubmissionError};
pub use output::{EvaluationResult, StoredObjectReference, SubmissionOutput, SubmissionStats};
pub use pipeline::credentials::{Credential, CredentialCache};
pub use pipeline::source::SourceFile;
pub use pipeline::target::UploadTarget;
pub use progress::{NoopProgressCallback, ProgressCallback, SubmissionProgressCallback};
pub use state::{StateMachine, SubmissionState};
pub use submit::{submit_sync, Submitter};
