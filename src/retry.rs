//! Fixed-interval retry for eventually-consistent lookups.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            max_attempts: 60,
        }
    }
}

/// Why a retried operation gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error; carries the last one.
    Exhausted { attempts: u32, last: E },
    /// An attempt failed with an error the predicate refused to retry.
    Aborted { attempt: u32, error: E },
}

impl RetryPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Delays between attempts; one fewer than the attempts themselves.
    fn strategy(&self) -> impl Iterator<Item = Duration> {
        let retries = self.max_attempts.max(1) - 1;
        FixedInterval::new(self.interval).take(retries as usize)
    }

    /// Runs `op` until it succeeds, fails with an error `should_retry` rejects,
    /// or `max_attempts` calls have been made.
    ///
    /// `op` receives the 1-based attempt number. The policy sleeps `interval`
    /// between attempts, never after the last one. A policy with zero attempts
    /// still makes one call.
    pub async fn run<T, E, F, Fut, P>(&self, mut op: F, should_retry: P) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let attempts = AtomicU32::new(0);
        let outcome = RetryIf::spawn(
            self.strategy(),
            || {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(attempt, max_attempts = self.max_attempts, "attempting");
                op(attempt)
            },
            |error: &E| should_retry(error),
        )
        .await;

        let attempt = attempts.load(Ordering::SeqCst);
        match outcome {
            Ok(value) => Ok(value),
            Err(error) if should_retry(&error) => Err(RetryError::Exhausted {
                attempts: attempt,
                last: error,
            }),
            Err(error) => Err(RetryError::Aborted { attempt, error }),
        }
    }
}
