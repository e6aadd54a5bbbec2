use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::time::{self, Instant};

use crate::backend::BackendError;
use crate::config::RetryPolicy;
use crate::retry::with_retry;

// Paused clock: sleeps and timeouts resolve instantly but still advance time.

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(100),
        max_backoff: Duration::from_millis(250),
    }
}

#[test]
fn backoff_doubles_up_to_the_cap() {
    let p = policy(5);
    assert_eq!(p.backoff_for(1), Duration::from_millis(100));
    assert_eq!(p.backoff_for(2), Duration::from_millis(200));
    assert_eq!(p.backoff_for(3), Duration::from_millis(250));
    assert_eq!(p.backoff_for(40), Duration::from_millis(250));
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried() {
    // Arrange
    let attempts = &AtomicU32::new(0);
    let started = Instant::now();

    // Act
    let result = with_retry("test", policy(3), Duration::from_secs(1), move || async move {
        let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if n < 3 {
            Err(BackendError::Transport {
                operation: "test",
                message: "connection reset".to_string(),
            })
        } else {
            Ok(n)
        }
    })
    .await;

    // Assert
    assert_eq!(result, Ok(3));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn client_errors_are_not_retried() {
    let attempts = &AtomicU32::new(0);

    let result: Result<(), _> = with_retry("test", policy(5), Duration::from_secs(1), move || async move {
        attempts.fetch_add(1, Ordering::SeqCst);
        Err(BackendError::Status {
            operation: "test",
            status: 404,
        })
    })
    .await;

    assert!(matches!(result, Err(BackendError::Status { status: 404, .. })));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn hung_calls_time_out_after_all_attempts() {
    // Arrange
    let attempts = &AtomicU32::new(0);

    // Act
    let result: Result<(), _> = with_retry("slow", policy(2), Duration::from_millis(500), move || async move {
        attempts.fetch_add(1, Ordering::SeqCst);
        time::sleep(Duration::from_secs(60)).await;
        Ok(())
    })
    .await;

    // Assert
    assert_eq!(result, Err(BackendError::Timeout { operation: "slow" }));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn single_attempt_policy_never_retries() {
    let attempts = &AtomicU32::new(0);

    let result: Result<(), _> = with_retry("cmd", RetryPolicy::once(), Duration::from_secs(1), move || async move {
        attempts.fetch_add(1, Ordering::SeqCst);
        Err(BackendError::Status {
            operation: "cmd",
            status: 502,
        })
    })
    .await;

    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}
