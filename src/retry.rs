//! Bounded retry with backoff for read operations.
//!
//! Snapshot reads can race the server's auto-join of a freshly connected
//! client: the read lands before the join commits and comes back `403`. That
//! race is transient, so the session loop wraps its polls in
//! [`retry_with_backoff`], retrying only while the supplied predicate says
//! the failure is worth retrying. Everything else propagates on the first
//! attempt.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Run `op` up to `max_attempts` times, sleeping between attempts, starting
/// at `initial_delay` and doubling after each failure.
///
/// `is_transient` decides which errors justify another attempt; a
/// non-transient error (or exhaustion of the attempt budget) returns the
/// last error. `max_attempts` below 1 is treated as 1.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    max_attempts: u32,
    initial_delay: Duration,
    is_transient: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let attempts = max_attempts.max(1);
    let mut delay = initial_delay;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts && is_transient(&err) => {
                debug!(%err, attempt, delay_ms = delay.as_millis() as u64, "transient failure, retrying");
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::error::QuizcastError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn not_yet_joined() -> QuizcastError {
        QuizcastError::NotYetJoined
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_first_try_without_sleeping() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, QuizcastError> = retry_with_backoff(
            3,
            Duration::from_millis(100),
            QuizcastError::is_transient,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(42) }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, QuizcastError> = retry_with_backoff(
            5,
            Duration::from_millis(100),
            QuizcastError::is_transient,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(not_yet_joined())
                    } else {
                        Ok(7)
                    }
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, QuizcastError> = retry_with_backoff(
            3,
            Duration::from_millis(10),
            QuizcastError::is_transient,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(not_yet_joined()) }
            },
        )
        .await;
        assert!(matches!(result, Err(QuizcastError::NotYetJoined)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, QuizcastError> = retry_with_backoff(
            5,
            Duration::from_millis(10),
            QuizcastError::is_transient,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(QuizcastError::Unauthorized) }
            },
        )
        .await;
        assert!(matches!(result, Err(QuizcastError::Unauthorized)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_is_clamped_to_one() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, QuizcastError> = retry_with_backoff(
            0,
            Duration::from_millis(10),
            QuizcastError::is_transient,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(1) }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
