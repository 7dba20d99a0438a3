//! Fixed-delay retry for optimistic-lock mutations.
//!
//! One combinator covers every retrying path in the system: the operation
//! classifies each failure as `Retryable` (lock conflict, transient) or
//! `Terminal` (domain rejection, hard storage error). Sleeps between
//! attempts observe the shutdown signal, so an interrupted process stops
//! retrying and lets redelivery pick the message up after restart.

use std::future::Future;
use std::time::Duration;

use crate::shutdown::Shutdown;

/// Classified outcome of a single attempt.
#[derive(Debug)]
pub enum Attempt<E> {
    Retryable(E),
    Terminal(E),
}

/// Retry budget: `attempts` extra tries after the first, spaced `delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }
}

/// Run `op` until it succeeds, fails terminally, or the budget runs out.
/// On exhaustion (or shutdown mid-wait) the last retryable error is
/// returned.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, shutdown: &Shutdown, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Attempt<E>>>,
{
    let mut used = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(Attempt::Terminal(err)) => return Err(err),
            Err(Attempt::Retryable(err)) => {
                used += 1;
                if used > policy.attempts || shutdown.is_triggered() {
                    return Err(err);
                }
                tokio::select! {
                    _ = tokio::time::sleep(policy.delay) => {}
                    _ = shutdown.triggered() => return Err(err),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn quick(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn succeeds_after_conflicts() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry(quick(3), &Shutdown::disarmed(), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Attempt::Retryable("conflict"))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_short_circuits() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = retry(quick(3), &Shutdown::disarmed(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Attempt::Terminal("no funds"))
        })
        .await;

        assert_eq!(result, Err("no funds"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn budget_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry(quick(2), &Shutdown::disarmed(), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Err(Attempt::Retryable(format!("conflict {n}")))
        })
        .await;

        // First try + two retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result, Err("conflict 2".to_string()));
    }

    #[tokio::test]
    async fn shutdown_aborts_between_attempts() {
        let (handle, shutdown) = crate::shutdown::shutdown_channel();
        handle.trigger();

        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = retry(quick(5), &shutdown, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Attempt::Retryable("conflict"))
        })
        .await;

        assert_eq!(result, Err("conflict"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
