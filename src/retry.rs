//! Bounded retry with jittered exponential backoff.
//!
//! Lock contention against a hot group is a retryable condition; everything
//! else in the error taxonomy is not. Callers wrap their ledger operation in
//! `with_backoff` instead of treating `LockContention` as fatal.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::ledger::LedgerResult;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 20,
            max_delay_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.max_delay_ms);
        let jitter = rand::thread_rng().gen_range(0..=exp / 2);
        Duration::from_millis(exp / 2 + jitter)
    }
}

/// Run `op` until it succeeds, fails non-retryably, or exhausts the policy.
/// The final retryable error is returned as-is when attempts run out.
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> LedgerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = LedgerResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(out) => return Ok(out),
            Err(e) if e.is_retryable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying after backoff");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
