use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::backend::BackendError;
use crate::config::RetryPolicy;

/// Run `op` under a per-attempt timeout, retrying retryable failures with
/// exponential backoff until `policy.max_attempts` is spent.
pub async fn with_retry<T, F, Fut>(
    operation: &'static str,
    policy: RetryPolicy,
    per_attempt: Duration,
    mut op: F,
) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let result = match timeout(per_attempt, op()).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout { operation }),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let backoff = policy.backoff_for(attempt);
                warn!(operation, attempt, backoff_ms = %backoff.as_millis(), error = %err, "retrying");
                sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => {
                debug!(operation, attempt, error = %err, "giving up");
                return Err(err);
            }
        }
    }
}
