//! Bounded exponential backoff for idempotent calls.
//!
//! Only errors that [`PipelineError::is_transient`] accepts are retried:
//! transport failures, `429` and `5xx`. With a 500 ms base and 2 retries the
//! wait sequence is 500 ms → 1 s, so a dead provider costs a submission
//! about 1.5 s of back-off before it fails.
//!
//! Callers decide *whether* a step is idempotent. Authorization and
//! target resolution go through here; the upload and notification never do.

use crate::error::PipelineError;
use std::future::Future;
use tokio::time::{sleep, Duration};
use tracing::warn;

/// Delay before retry number `attempt` (1-based).
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(base_ms.saturating_mul(factor))
}

/// Run `call` until it succeeds, fails permanently, or retries run out.
pub async fn with_backoff<T, F, Fut>(
    what: &str,
    max_retries: u32,
    base_ms: u64,
    mut call: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let mut attempt = 0u32;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_retries => {
                attempt += 1;
                let delay = backoff_delay(base_ms, attempt);
                warn!(
                    "{}: retry {}/{} after {}ms: {}",
                    what,
                    attempt,
                    max_retries,
                    delay.as_millis(),
                    e
                );
                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> PipelineError {
        PipelineError::Auth {
            status: Some(503),
            detail: "busy".into(),
        }
    }

    #[test]
    fn backoff_doubles() {
        assert_eq!(backoff_delay(500, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(500, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(500, 3), Duration::from_millis(2000));
        assert_eq!(backoff_delay(u64::MAX, 40), Duration::from_millis(u64::MAX));
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let out = with_backoff("authorize", 2, 1, || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(transient())
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let err = with_backoff("authorize", 2, 1, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(transient())
        })
        .await
        .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let err = with_backoff("resolve", 5, 1, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(PipelineError::AuthExpired {
                status: 401,
                during: crate::state::SubmissionState::ResolvingTarget,
            })
        })
        .await
        .unwrap_err();
        assert!(err.is_auth_expired());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
