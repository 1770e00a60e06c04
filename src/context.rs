//! Per-call context: cancellation, deadline and trace parent.
//!
//! [`QueryContext`] is what every store operation receives from its caller.
//! It plays the role of a request context: the executor checks it between
//! retry attempts, the pool races slot acquisition against it, and the span
//! provider reads the optional parent span from it.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;

/// Cancellation, deadline and trace parent for a single logical call.
///
/// Clones share the same cancellation token, so cancelling any clone
/// cancels them all. Use [`QueryContext::child`] for a context that can be
/// cancelled independently of its parent.
#[derive(Debug, Clone)]
pub struct QueryContext {
    token: CancellationToken,
    deadline: Option<Instant>,
    trace_parent: Option<opentelemetry::Context>,
}

impl QueryContext {
    /// A context that is never cancelled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
            trace_parent: None,
        }
    }

    /// A context whose deadline is `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().timeout(timeout)
    }

    /// A context that expires at `deadline`.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..Self::background()
        }
    }

    /// Derives a context that is cancelled when `self` is, but whose own
    /// cancellation does not propagate upwards.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            trace_parent: self.trace_parent.clone(),
        }
    }

    /// Tightens the deadline to at most `timeout` from now.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        });
        self
    }

    /// Attaches a parent trace context for spans started under this call.
    #[must_use]
    pub fn with_trace_parent(mut self, parent: opentelemetry::Context) -> Self {
        self.trace_parent = Some(parent);
        self
    }

    /// Returns the parent trace context, if any.
    #[must_use]
    pub fn trace_parent(&self) -> Option<&opentelemetry::Context> {
        self.trace_parent.as_ref()
    }

    /// Returns the deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when there is no deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Cancels this context and every context derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns the error describing why this context is done, or `None`
    /// while it is still live.
    #[must_use]
    pub fn err(&self) -> Option<StoreError> {
        if self.token.is_cancelled() {
            return Some(StoreError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(StoreError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> StoreError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                () = self.token.cancelled() => StoreError::Canceled,
                () = tokio::time::sleep_until(deadline) => StoreError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                StoreError::Canceled
            }
        }
    }

    /// Runs `fut` until it completes or the context is done, whichever
    /// happens first. The future is dropped if the context wins.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Canceled`] or [`StoreError::DeadlineExceeded`]
    /// if the context ends first, otherwise the future's own error.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            out = fut => out,
        }
    }
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::background()
    }
}
