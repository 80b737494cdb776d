//! Account authorization and the shared credential cache.
//!
//! The storage provider issues an account token (valid ~24 h) in exchange for
//! the application key. Every submission needs it, so one
//! [`CredentialCache`] is shared (behind an `Arc`) by all submissions of a
//! [`crate::submit::Submitter`].
//!
//! ## Consistency
//!
//! The cache holds `Option<Arc<Credential>>` behind a `RwLock` that is never
//! held across an `.await`. A refresh builds a complete [`Credential`] first
//! and then swaps the pointer, so readers see either the old or the new
//! value, never a mix. Concurrent refreshes race benignly: last writer wins.

use crate::config::SubmissionConfig;
use crate::error::PipelineError;
use crate::pipeline::http::{describe_transport, error_detail};
use crate::pipeline::retry::with_backoff;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info};

const AUTHORIZE_PATH: &str = "/b2api/v2/b2_authorize_account";

/// An issued account authorization. Immutable; replaced wholesale on refresh.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Credential {
    #[serde(skip_serializing)]
    pub authorization_token: String,
    /// Base URL for the provider's API calls (`apiUrl`).
    pub api_url: String,
    /// Download host reported by the provider (`downloadUrl`), if any.
    pub download_url: Option<String>,
    pub issued_at: DateTime<Utc>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("authorization_token", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("download_url", &self.download_url)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeResponse {
    api_url: String,
    authorization_token: String,
    #[serde(default)]
    download_url: Option<String>,
}

/// Process-wide holder of the current [`Credential`].
pub struct CredentialCache {
    http: reqwest::Client,
    authorize_url: String,
    basic_auth: String,
    timeout_secs: u64,
    max_retries: u32,
    retry_backoff_ms: u64,
    current: RwLock<Option<Arc<Credential>>>,
    authorizations: AtomicU64,
}

impl fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCache")
            .field("authorize_url", &self.authorize_url)
            .field("cached", &self.cached().is_some())
            .field("authorizations", &self.authorization_count())
            .finish()
    }
}

impl CredentialCache {
    /// Create an empty cache. No network call happens until [`Self::get`].
    pub fn new(http: reqwest::Client, config: &SubmissionConfig) -> Self {
        let basic = STANDARD.encode(format!("{}:{}", config.key_id, config.application_key));
        Self {
            http,
            authorize_url: format!("{}{}", config.auth_url.trim_end_matches('/'), AUTHORIZE_PATH),
            basic_auth: format!("Basic {basic}"),
            timeout_secs: config.request_timeout_secs,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            current: RwLock::new(None),
            authorizations: AtomicU64::new(0),
        }
    }

    /// Return the cached credential, authorizing first when absent or forced.
    pub async fn get(&self, force_refresh: bool) -> Result<Arc<Credential>, PipelineError> {
        if !force_refresh {
            if let Some(cred) = self.cached() {
                return Ok(cred);
            }
        }

        let result = with_backoff("authorize", self.max_retries, self.retry_backoff_ms, || {
            self.authorize_once()
        })
        .await;

        match result {
            Ok(cred) => {
                let cred = Arc::new(cred);
                *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&cred));
                Ok(cred)
            }
            Err(e) => {
                if force_refresh {
                    // The old token was rejected; keeping it would only fail again.
                    self.invalidate();
                }
                Err(e)
            }
        }
    }

    /// Current credential without touching the network.
    pub fn cached(&self) -> Option<Arc<Credential>> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(Arc::clone)
    }

    /// Drop the cached credential; the next [`Self::get`] re-authorizes.
    pub fn invalidate(&self) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Authorization requests sent so far (including failed ones).
    pub fn authorization_count(&self) -> u64 {
        self.authorizations.load(Ordering::Relaxed)
    }

    async fn authorize_once(&self) -> Result<Credential, PipelineError> {
        self.authorizations.fetch_add(1, Ordering::Relaxed);
        debug!(url = %self.authorize_url, "Authorizing storage account");

        let response = self
            .http
            .get(&self.authorize_url)
            .header(reqwest::header::AUTHORIZATION, &self.basic_auth)
            .timeout(Duration::from_secs(self.timeout_secs))
            .send()
            .await
            .map_err(|e| PipelineError::Auth {
                status: None,
                detail: describe_transport(&e, self.timeout_secs),
            })?;

        if !response.status().is_success() {
            let (status, detail) = error_detail(response).await;
            return Err(PipelineError::Auth {
                status: Some(status),
                detail,
            });
        }

        let status = response.status().as_u16();
        let body: AuthorizeResponse = response.json().await.map_err(|e| PipelineError::Auth {
            status: Some(status),
            detail: format!("malformed authorization response: {e}"),
        })?;

        info!(api_url = %body.api_url, "Storage account authorized");

        Ok(Credential {
            authorization_token: body.authorization_token,
            api_url: body.api_url,
            download_url: body.download_url,
            issued_at: Utc::now(),
        })
    }
}
