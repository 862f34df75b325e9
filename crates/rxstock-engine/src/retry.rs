//! # Workflow Retry
//!
//! Re-runs a WHOLE workflow when it failed on lock contention.
//!
//! ```text
//! attempt 1 ──► Err(Busy) ──► sleep(backoff) ──► attempt 2 ──► Ok
//!                   │
//!                   └── non-retryable error → returned immediately
//! ```
//!
//! Each attempt opens its own transaction; a failed attempt has already
//! rolled back, so nothing partial is ever resumed.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use rxstock_db::config::RetrySettings;
use tracing::{debug, warn};

use crate::error::CommerceResult;

/// How often and how patiently to retry.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        RetryPolicy {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Runs once, no retries.
    pub fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Runs `workflow` until it succeeds, fails with a non-retryable error, or
/// the attempts are used up. The last error is returned.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut workflow: F) -> CommerceResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CommerceResult<T>>,
{
    let mut backoff = policy.backoff();
    let mut attempt = 1u32;

    loop {
        match workflow().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let wait = backoff.next_backoff().unwrap_or(policy.max_backoff);
                warn!(attempt, error = %e, ?wait, "Workflow hit contention, retrying");
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(e) => {
                debug!(attempt, error = %e, "Workflow failed");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CommerceError;
    use rxstock_core::CoreError;
    use rxstock_db::DbError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_retries_busy_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CommerceError::from(DbError::Busy("database is locked".into())))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_domain_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: CommerceResult<()> = with_retry(&fast_policy(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CoreError::EmptySale.into()) }
        })
        .await;

        assert!(matches!(result, Err(CommerceError::Core(CoreError::EmptySale))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: CommerceResult<()> = with_retry(&fast_policy(2), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(DbError::Conflict("guard".into()).into()) }
        })
        .await;

        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
