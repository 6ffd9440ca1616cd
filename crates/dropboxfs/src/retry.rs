//! Bounded exponential backoff for transient remote failures.

use std::future::Future;
use std::time::Duration;

use crate::dropbox::ApiError;

/// Backoff schedule. The elapsed budget caps how long a single filesystem
/// request may stay wedged inside a retry loop.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub multiplier: f64,
    pub max_elapsed: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            multiplier: 1.5,
            max_elapsed: Duration::from_secs(15 * 60),
        }
    }
}

/// Re-run `op` while it fails with [`ApiError::Transient`] and the elapsed
/// budget lasts. Any other error, or a transient one past the budget, is
/// returned to the caller.
pub async fn retry<F, Fut, T>(policy: Backoff, mut op: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let started = tokio::time::Instant::now();
    let mut delay = policy.initial;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                if started.elapsed() + delay > policy.max_elapsed {
                    tracing::warn!(error = %err, "retry budget exhausted");
                    return Err(err);
                }
                tracing::debug!(error = %err, delay_ms = delay.as_millis() as u64, "retrying");
                tokio::time::sleep(delay).await;
                delay = delay.mul_f64(policy.multiplier);
            }
            Err(err) => return Err(err),
        }
    }
}
