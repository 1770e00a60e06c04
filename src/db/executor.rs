//! Resilient query executor.
//!
//! Every store call runs as `span ∘ timing ∘ retry(body)`: one span and one
//! metrics record per logical call, however many attempts the backoff
//! policy makes underneath.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::backoff::{BackoffPolicy, RetryError};
use super::metrics::MetricsCollector;
use super::pool::{ConnectionManager, ConnectionPool};
use super::spans::{TagValue, TraceSpan, TracingProvider};
use crate::context::QueryContext;
use crate::error::StoreError;

/// Runs store operations with tracing, retry and metrics.
///
/// The executor shares, but does not own, the pool, the metrics collector
/// and the span provider; all three outlive any single call.
pub struct QueryExecutor<M: ConnectionManager> {
    pool: ConnectionPool<M>,
    metrics: Arc<MetricsCollector>,
    tracer: Arc<dyn TracingProvider>,
    backoff: BackoffPolicy,
}

impl<M: ConnectionManager> std::fmt::Debug for QueryExecutor<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("pool", &self.pool)
            .field("tracer", &self.tracer)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl<M: ConnectionManager> QueryExecutor<M> {
    /// Wires an executor over shared collaborators.
    pub fn new(
        pool: ConnectionPool<M>,
        metrics: Arc<MetricsCollector>,
        tracer: Arc<dyn TracingProvider>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            pool,
            metrics,
            tracer,
            backoff,
        }
    }

    /// The pool bodies draw connections from.
    pub const fn pool(&self) -> &ConnectionPool<M> {
        &self.pool
    }

    /// The shared metrics collector.
    pub const fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// The retry schedule.
    pub const fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Runs `body` as the operation `operation`.
    ///
    /// `body` is invoked once per attempt and must acquire its own
    /// connection from [`QueryExecutor::pool`], so that a connection that
    /// failed mid-attempt is not reused by the next attempt.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] and other permanent errors unchanged,
    ///   after a single attempt;
    /// - the last transient error once the backoff ceiling is reached;
    /// - the context error when `ctx` is cancelled or its deadline passes.
    pub async fn execute<T, F, Fut>(
        &self,
        ctx: &QueryContext,
        operation: &'static str,
        mut body: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let span = self.tracer.start_span(ctx, operation);
        if let (Some(trace_id), Some(span_id)) = (span.trace_id(), span.span_id()) {
            tracing::debug!(operation, %trace_id, %span_id, "query started");
        }
        let mut call = CallRecord {
            span: Some(span),
            metrics: self.metrics.as_ref(),
            operation,
            started: Instant::now(),
        };

        let mut attempts: u32 = 0;
        let result = self
            .backoff
            .retry(ctx, operation, self.metrics.as_ref(), || {
                attempts = attempts.saturating_add(1);
                let attempt = body();
                async move { attempt.await.map_err(RetryError::classify) }
            })
            .await;
        let elapsed = call.finish(attempts, result.as_ref().err());
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

        match &result {
            Ok(_) => tracing::debug!(operation, attempts, elapsed_ms, "query finished"),
            Err(err) if err.is_not_found() => {
                tracing::debug!(operation, attempts, "query found no rows");
            }
            Err(err) => tracing::warn!(
                operation,
                attempts,
                elapsed_ms,
                error = %err,
                "query failed"
            ),
        }
        result
    }

    /// Pings the store through the executor under the operation name
    /// `Ping`.
    ///
    /// # Errors
    ///
    /// Same as [`QueryExecutor::execute`].
    pub async fn ping(&self, ctx: &QueryContext) -> Result<(), StoreError> {
        let pool = &self.pool;
        self.execute(ctx, "Ping", || async move { pool.ping(ctx).await })
            .await
    }
}

/// Span and metrics bookkeeping for one logical call.
///
/// A call whose future is dropped before it settles (an outer timeout, a
/// disconnected client) is still recorded once, as [`StoreError::Canceled`].
struct CallRecord<'a> {
    span: Option<Box<dyn TraceSpan>>,
    metrics: &'a MetricsCollector,
    operation: &'static str,
    started: Instant,
}

impl CallRecord<'_> {
    fn finish(&mut self, attempts: u32, err: Option<&StoreError>) -> Duration {
        let elapsed = self.started.elapsed();
        if let Some(mut span) = self.span.take() {
            span.set_tag("db.attempts", TagValue::from(attempts));
            if let Some(err) = err {
                span.set_error(err);
            }
            span.end();
        }
        self.metrics.record_query(self.operation, elapsed, err);
        elapsed
    }
}

impl Drop for CallRecord<'_> {
    fn drop(&mut self) {
        if self.span.is_none() {
            return;
        }
        let elapsed = self.started.elapsed();
        if let Some(mut span) = self.span.take() {
            span.set_error(&StoreError::Canceled);
            span.end();
        }
        self.metrics
            .record_query(self.operation, elapsed, Some(&StoreError::Canceled));
        tracing::warn!(
            operation = self.operation,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "query abandoned before completion"
        );
    }
}
