use std::time::Duration;

use crate::engine::{EngineError, EngineResult};

/// Total attempts made against the store before a transient failure is surfaced
pub const MAX_ATTEMPTS: u32 = 3;

/// Delay between retries (exponential backoff base)
pub const RETRY_DELAY_MS: u64 = 100;

/// Runs `op`, retrying with exponential backoff while it fails with a transient storage error.
///
/// Only safe for operations that are idempotent end to end, which every engine operation is:
/// ledger and check-in writes are deduplicated by the store and progress is recomputed from
/// durable state.
pub async fn with_backoff<T, F, Fut>(mut op: F) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                let delay = Duration::from_millis(RETRY_DELAY_MS * 2_u64.pow(attempt));
                tracing::warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "retrying store operation");

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e @ EngineError::StorageUnavailable(_)) => {
                tracing::error!(error = ?e, attempts = attempt + 1, "store unavailable, giving up");
                return Err(e);
            }
            res => return res,
        }
    }
}
