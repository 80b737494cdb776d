//! Pipeline stages for document submission.
//!
//! Each submodule implements exactly one step. Keeping stages separate makes
//! each independently testable against a stub server and keeps the
//! orchestration logic in [`crate::submit`] free of HTTP details.
//!
//! ## Data Flow
//!
//! ```text
//! source ──▶ credentials ──▶ target ──▶ upload ──▶ notify
//! (path)     (account tok)   (one-shot   (stream)   (evaluate)
//!                             URL+tok)
//! ```
//!
//! 1. [`source`]      — canonicalise a path or `file://` URI, read size and MIME type
//! 2. [`credentials`] — authorize the storage account; cached and shared
//! 3. [`target`]      — fetch a single-use upload URL and token
//! 4. [`upload`]      — stream the file from disk with the provider's headers
//! 5. [`notify`]      — POST the public object URL to the evaluation backend
//!
//! [`retry`] and [`http`] hold plumbing shared by the network stages.

pub mod credentials;
pub mod http;
pub mod notify;
pub mod retry;
pub mod source;
pub mod target;
pub mod upload;
