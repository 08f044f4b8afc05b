//! Bounded retry for orchestration steps.
//!
//! Installation steps that talk to flaky infrastructure (the bootstrap script,
//! cluster-admin commands) are retried a fixed number of times with a jittered
//! pause between attempts. The convergence monitor does NOT use this module:
//! its retry semantics are the poll loop itself.

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

/// Execute an async operation up to `attempts` times with a jittered pause.
///
/// Jitter spreads the pause to 0.5x-1.5x of `delay` so parallel CI jobs
/// retrying against the same cluster don't land in lockstep.
///
/// # Arguments
/// * `attempts` - Total attempts, must be >= 1
/// * `delay` - Base pause between attempts
/// * `operation_name` - Name for logging purposes
/// * `operation` - The async operation to retry
///
/// # Returns
/// The first success, or the last error once attempts are exhausted.
pub async fn retry_fixed<F, Fut, T, E>(
    attempts: u32,
    delay: Duration,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = attempts.max(1);

    for attempt in 1..=attempts {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt == attempts => {
                error!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    "Operation failed after final attempt"
                );
                return Err(e);
            }
            Err(e) => {
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let pause = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    pause_ms = pause.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(pause).await;
            }
        }
    }

    unreachable!("loop returns on final attempt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_succeeds_immediately() {
        let result: Result<i32, &str> =
            retry_fixed(3, Duration::from_millis(1), "op", || async { Ok(42) }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<i32, &str> = retry_fixed(3, Duration::from_millis(1), "op", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 1 {
                    Err("fail")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<i32, &str> = retry_fixed(3, Duration::from_millis(1), "op", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err("always fails")
            }
        })
        .await;

        assert_eq!(result, Err("always fails"));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let result: Result<i32, &str> =
            retry_fixed(0, Duration::from_millis(1), "op", || async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
    }
}
