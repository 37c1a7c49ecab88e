// SPDX-License-Identifier: Apache-2.0

//! Bounded synchronization primitives.
//!
//! Wherever an external condition is observable (role visibility, load
//! balancer state, task drain), stages poll it with a bounded total timeout
//! instead of sleeping a fixed interval. Fixed sleeps remain only where
//! nothing is observable: settle delays, idle windows, cool-downs.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::WaitTimeout;

/// Poll `probe` every `interval` until it returns true or `timeout` elapses.
pub async fn poll_until<F, Fut>(
    condition: &str,
    timeout: Duration,
    interval: Duration,
    mut probe: F,
) -> Result<(), WaitTimeout>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;

    loop {
        if probe().await {
            return Ok(());
        }

        if Instant::now() + interval > deadline {
            tracing::warn!(condition = %condition, timeout_ms = timeout.as_millis() as u64, "poll timed out");
            return Err(WaitTimeout {
                condition: condition.to_string(),
                waited: timeout,
            });
        }

        tokio::time::sleep(interval).await;
    }
}

/// Retry `op` up to `attempts` times with exponential backoff, doubling
/// `base_delay` between attempts. Returns the last error if all attempts
/// fail.
pub async fn retry_backoff<T, E, F, Fut>(
    label: &str,
    attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut delay = base_delay;
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts => {
                tracing::debug!(
                    label = %label,
                    attempt = attempt,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "retrying after error"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_poll_until_succeeds() {
        let calls = AtomicU32::new(0);
        let result = poll_until(
            "counter reaches three",
            Duration::from_secs(1),
            Duration::from_millis(1),
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { n >= 2 }
            },
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_until_times_out() {
        let result = poll_until(
            "never",
            Duration::from_millis(10),
            Duration::from_millis(2),
            || async { false },
        )
        .await;

        let err = result.unwrap_err();
        assert!(err.condition.contains("never"));
    }

    #[tokio::test]
    async fn test_retry_backoff_recovers() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> =
            retry_backoff("flaky", 3, Duration::from_millis(1), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_backoff_exhausts() {
        let result: Result<u32, String> =
            retry_backoff("hopeless", 2, Duration::from_millis(1), || async {
                Err("permanent".to_string())
            })
            .await;

        assert_eq!(result.unwrap_err(), "permanent");
    }
}
