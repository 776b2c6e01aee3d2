//! Retry logic for transient infrastructure failures.
//!
//! # Responsibilities
//! - Classify errors as transient (connectivity) or permanent (semantic)
//! - Re-run an async operation with exponential backoff + jitter
//!
//! # Design Decisions
//! - Semantic failures are surfaced immediately, never retried
//! - The attempt budget includes the first call

use std::fmt::Display;
use std::future::Future;

use crate::config::RetryConfig;
use crate::resilience::backoff::policy_backoff;

/// Errors that can tell whether retrying the same call might succeed.
pub trait Transient {
    /// True for connectivity-style failures where a retry can succeed.
    fn is_transient(&self) -> bool;
}

/// Run `op` until it succeeds, fails permanently, or the attempt budget is spent.
pub async fn retry_transient<T, E, F, Fut>(policy: &RetryConfig, what: &str, mut op: F) -> Result<T, E>
where
    E: Transient + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        attempts += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempts < max_attempts => {
                let delay = policy_backoff(policy, attempts);
                tracing::warn!(
                    operation = what,
                    attempt = attempts,
                    delay = ?delay,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::error!(operation = what, attempts = attempts, error = %e, "Retries exhausted");
                }
                return Err(e);
            }
        }
    }
}
