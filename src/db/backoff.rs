//! Exponential backoff with a total elapsed-time ceiling.
//!
//! [`BackoffPolicy::retry`] re-runs a fallible async operation until it
//! succeeds, signals a permanent failure, the caller's context ends, or the
//! next delay would push past `max_elapsed_time`.
//!
//! # Delay schedule (defaults)
//!
//! | Retry | Delay  |
//! |-------|--------|
//! | 1     | 500ms  |
//! | 2     | 750ms  |
//! | 3     | 1.125s |
//! | 4     | 1.69s  |
//! | ...   | capped at 5s |

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::context::QueryContext;
use crate::error::{ErrorClass, StoreError};

/// Outcome of a single attempt that did not succeed.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Stop retrying and return the error as is.
    Permanent(E),
    /// The attempt may succeed if repeated.
    Transient(E),
}

impl<E> RetryError<E> {
    /// Unwraps the underlying error.
    pub fn into_inner(self) -> E {
        match self {
            Self::Permanent(err) | Self::Transient(err) => err,
        }
    }
}

impl RetryError<StoreError> {
    /// Wraps a store error according to its [`ErrorClass`]: only transient
    /// errors are retried.
    #[must_use]
    pub fn classify(err: StoreError) -> Self {
        match err.class() {
            ErrorClass::Transient => Self::Transient(err),
            ErrorClass::Permanent | ErrorClass::Terminal => Self::Permanent(err),
        }
    }
}

/// Receives one notification per attempt after the first.
pub trait RetryObserver: Send + Sync {
    /// Called when a retry attempt finishes; `success` is `true` when the
    /// attempt produced a value.
    fn on_retry(&self, operation: &str, success: bool);
}

/// Observer that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RetryObserver for NoopObserver {
    fn on_retry(&self, _operation: &str, _success: bool) {}
}

/// Exponential backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Growth factor applied after every retry.
    pub multiplier: f64,
    /// Upper bound for a single delay.
    pub max_interval: Duration,
    /// Total time budget across all attempts and delays.
    pub max_elapsed_time: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            multiplier: 1.5,
            max_interval: Duration::from_secs(5),
            max_elapsed_time: Duration::from_secs(15),
        }
    }
}

impl BackoffPolicy {
    /// Default schedule with the given elapsed-time ceiling.
    #[must_use]
    pub fn with_max_elapsed(max_elapsed_time: Duration) -> Self {
        Self {
            max_elapsed_time,
            ..Self::default()
        }
    }

    /// Delay to wait before retry number `retry + 1`.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = self.initial_interval.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_interval)
            .min(self.max_interval)
    }

    /// The infinite delay sequence, starting with the first retry.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0u32..).map(|retry| self.delay_for(retry))
    }

    /// Runs `op` until it succeeds or the policy gives up.
    ///
    /// Attempts run strictly one after another. The first attempt is not a
    /// retry; every later attempt is reported to `observer`.
    ///
    /// # Errors
    ///
    /// - the inner error of a [`RetryError::Permanent`], immediately;
    /// - the last transient error once the elapsed-time budget is spent;
    /// - [`StoreError::Canceled`] / [`StoreError::DeadlineExceeded`] as soon
    ///   as `ctx` ends, including in the middle of an attempt or a delay.
    pub async fn retry<T, F, Fut>(
        &self,
        ctx: &QueryContext,
        operation: &str,
        observer: &dyn RetryObserver,
        mut op: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RetryError<StoreError>>>,
    {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            let is_retry = attempt > 0;
            let outcome = match ctx.run(async { Ok(op().await) }).await {
                Ok(outcome) => outcome,
                Err(ctx_err) => {
                    if is_retry {
                        observer.on_retry(operation, false);
                    }
                    return Err(ctx_err);
                }
            };

            let err = match outcome {
                Ok(value) => {
                    if is_retry {
                        observer.on_retry(operation, true);
                        tracing::debug!(operation, attempt, "retry succeeded");
                    }
                    return Ok(value);
                }
                Err(RetryError::Permanent(err)) => {
                    if is_retry {
                        observer.on_retry(operation, false);
                    }
                    return Err(err);
                }
                Err(RetryError::Transient(err)) => {
                    if is_retry {
                        observer.on_retry(operation, false);
                    }
                    err
                }
            };

            let delay = self.delay_for(attempt);
            if started.elapsed() + delay > self.max_elapsed_time {
                tracing::warn!(
                    operation,
                    attempts = attempt + 1,
                    error = %err,
                    "retry budget exhausted"
                );
                return Err(err);
            }

            tracing::warn!(
                operation,
                attempt = attempt + 1,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "operation failed, retrying"
            );

            tokio::select! {
                biased;
                ctx_err = ctx.done() => return Err(ctx_err),
                () = tokio::time::sleep(delay) => {}
            }
            attempt = attempt.saturating_add(1);
        }
    }
}
