use std::{
    fmt::Display,
    future::Future,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use thiserror::Error;
use tokio::time::sleep;
use tokio_retry::Retry;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Default number of attempts made for a single block fetch.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Pause taken before a retry attempt, multiplied by the attempt number.
const SETTLE_DELAY: Duration = Duration::from_micros(500);

/// Wait after a failed attempt, multiplied by the attempt number.
const BACKOFF_UNIT: Duration = Duration::from_secs(1);

/// A retry strategy trait.
pub trait Strategy: Iterator<Item = Duration> + Clone + Send + Sync + 'static {}

/// Implement the Strategy trait for any type that is an iterator of Durations (i.e. all backoffs
/// exported by `tokio_retry`)
impl<T> Strategy for T where T: Iterator<Item = Duration> + Clone + Send + Sync + 'static {}

/// Backoff growing linearly with the attempt number: `unit`, `2 * unit`, ...
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    unit: Duration,
    attempt: u32,
}

impl LinearBackoff {
    /// Create a linear backoff starting at `unit`.
    pub const fn new(unit: Duration) -> Self {
        Self { unit, attempt: 0 }
    }
}

impl Iterator for LinearBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        self.attempt = self.attempt.saturating_add(1);
        Some(self.unit.saturating_mul(self.attempt))
    }
}

/// Outcome of a [`RetryPolicy`] run that did not succeed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every attempt failed; `source` is the error of the last one.
    #[error("failed after {attempts} attempts: {source}")]
    Exhausted {
        /// Number of attempts made
        attempts: u32,
        /// Error returned by the last attempt
        source: E,
    },
    /// The cancellation token fired before an attempt succeeded.
    #[error("retry cancelled")]
    Cancelled,
}

/// Bounded retry with a short settle delay before every retry and an
/// escalating whole-second backoff after each failure.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    settle: Duration,
    backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl RetryPolicy {
    /// Create a policy making at most `max_attempts` attempts (at least one).
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts: max_attempts.max(1), settle: SETTLE_DELAY, backoff_unit: BACKOFF_UNIT }
    }

    /// Maximum number of attempts.
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff schedule applied between attempts.
    pub fn backoff(&self) -> impl Strategy {
        LinearBackoff::new(self.backoff_unit).take(self.max_attempts as usize - 1)
    }

    /// Run `op` until it succeeds, attempts are exhausted or `cancel` fires.
    ///
    /// `op` receives the 1-based attempt number. `label` identifies the
    /// operation in the per-attempt warning.
    pub async fn run<F, Fut, T, E>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let attempt = AtomicU32::new(0);
        let settle = self.settle;
        let action = || {
            let n = attempt.fetch_add(1, Ordering::Relaxed) + 1;
            let fut = op(n);
            async move {
                if n > 1 {
                    sleep(settle.saturating_mul(n)).await;
                }
                fut.await.inspect_err(|err| {
                    warn!(operation = label, attempt = n, error = %err, "attempt failed");
                })
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RetryError::Cancelled),
            result = Retry::spawn(self.backoff(), action) => result.map_err(|source| {
                RetryError::Exhausted { attempts: attempt.load(Ordering::Relaxed), source }
            }),
        }
    }
}
