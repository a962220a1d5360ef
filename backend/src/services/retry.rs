//! Re-run operations that lost a concurrency race
//!
//! Only `AppError::ConcurrencyConflict` is retried. The operation must be a
//! whole transaction so a retry starts from scratch.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::error::AppResult;

const INITIAL_BACKOFF: Duration = Duration::from_millis(20);
const MAX_BACKOFF: Duration = Duration::from_millis(500);

/// Run `operation`, retrying up to `retries` more times on a concurrency conflict
pub async fn retry_on_conflict<F, Fut, T>(retries: u32, context: &str, operation: F) -> AppResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 0;
    let mut backoff = INITIAL_BACKOFF;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(context, attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt <= retries => {
                tracing::warn!(
                    context,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Concurrency conflict, retrying"
                );
                sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
            }
            Err(e) => return Err(e),
        }
    }
}
