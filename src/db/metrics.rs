//! Query, retry and connection metrics.
//!
//! A single [`MetricsCollector`] is shared by the executor, the backoff
//! policy and the pool. All recorders and [`MetricsCollector::snapshot`]
//! go through one short-held mutex, so a snapshot is always a consistent
//! point-in-time copy and [`MetricsCollector::reset`] cannot interleave with
//! a half-applied update.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::backoff::RetryObserver;
use super::pool::PoolStats;
use crate::error::StoreError;

/// Serializes a [`Duration`] as fractional milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64() * 1000.0)
    }
}

/// Per-operation breakdown, keyed by operation name in the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OperationStats {
    /// Calls recorded for this operation.
    pub count: u64,
    /// Calls that ended in an error.
    pub failures: u64,
    /// Sum of call durations.
    #[serde(rename = "total_latency_ms", with = "duration_ms")]
    pub total_latency: Duration,
    /// Slowest call.
    #[serde(rename = "max_latency_ms", with = "duration_ms")]
    pub max_latency: Duration,
}

impl OperationStats {
    /// `total_latency / count`, or zero before the first call.
    #[must_use]
    pub fn average_latency(&self) -> Duration {
        average(self.total_latency, self.count)
    }
}

/// Immutable copy of the collector's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Logical calls recorded.
    pub total_queries: u64,
    /// Calls that returned a value.
    pub successful_queries: u64,
    /// Calls that returned an error.
    pub failed_queries: u64,
    /// Attempts made after a first failure.
    pub total_retries: u64,
    /// Retry attempts that succeeded.
    pub successful_retries: u64,
    /// Sum of call durations.
    #[serde(rename = "total_latency_ms", with = "duration_ms")]
    pub total_latency: Duration,
    /// Slowest call.
    #[serde(rename = "max_latency_ms", with = "duration_ms")]
    pub max_latency: Duration,
    /// `total_latency / total_queries`, computed when the snapshot is taken.
    #[serde(rename = "average_latency_ms", with = "duration_ms")]
    pub average_latency: Duration,
    /// Connections currently checked out.
    pub active_connections: u64,
    /// Connections parked in the pool.
    pub idle_connections: u64,
    /// `active + idle`.
    pub total_connections: u64,
    /// Connections opened since start (or the last reset).
    pub connections_created: u64,
    /// Connections closed since start (or the last reset).
    pub connections_closed: u64,
    /// `failed_queries / total_queries`.
    pub error_rate: f64,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
    /// When the most recent failure was recorded.
    pub last_error_time: Option<DateTime<Utc>>,
    /// Breakdown by operation name.
    pub operations: BTreeMap<String, OperationStats>,
}

#[derive(Debug, Default)]
struct Counters {
    total_queries: u64,
    successful_queries: u64,
    failed_queries: u64,
    total_retries: u64,
    successful_retries: u64,
    total_latency: Duration,
    max_latency: Duration,
    active_connections: u64,
    idle_connections: u64,
    connections_created: u64,
    connections_closed: u64,
    last_error: Option<String>,
    last_error_time: Option<DateTime<Utc>>,
    operations: BTreeMap<String, OperationStats>,
}

/// Thread-safe accumulator for query, retry and connection metrics.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    counters: Mutex<Counters>,
}

impl MetricsCollector {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock only means a recorder panicked mid-update of plain
    // counters; the data is still usable.
    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the outcome of one logical call.
    pub fn record_query(&self, operation: &str, duration: Duration, err: Option<&StoreError>) {
        let message = err.map(ToString::to_string);
        let mut guard = self.lock();
        let c = &mut *guard;

        c.total_queries += 1;
        c.total_latency = c.total_latency.saturating_add(duration);
        c.max_latency = c.max_latency.max(duration);

        let op = c.operations.entry(operation.to_string()).or_default();
        op.count += 1;
        op.total_latency = op.total_latency.saturating_add(duration);
        op.max_latency = op.max_latency.max(duration);

        match message {
            Some(message) => {
                op.failures += 1;
                c.failed_queries += 1;
                c.last_error = Some(message);
                c.last_error_time = Some(Utc::now());
            }
            None => c.successful_queries += 1,
        }
    }

    /// Records one retry attempt.
    pub fn record_retry(&self, success: bool) {
        let mut c = self.lock();
        c.total_retries += 1;
        if success {
            c.successful_retries += 1;
        }
    }

    /// Counts a newly opened connection.
    pub fn record_connection_created(&self) {
        self.lock().connections_created += 1;
    }

    /// Counts a closed connection.
    pub fn record_connection_closed(&self) {
        self.lock().connections_closed += 1;
    }

    /// Mirrors the pool's current occupancy into the connection gauges.
    pub fn record_pool_state(&self, stats: &PoolStats) {
        let mut c = self.lock();
        c.active_connections = stats.active as u64;
        c.idle_connections = stats.idle as u64;
    }

    /// Zeroes every counter. Connection gauges are zeroed too and catch up
    /// on the pool's next state change.
    pub fn reset(&self) {
        *self.lock() = Counters::default();
    }

    /// Returns a consistent copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = self.lock();
        let error_rate = if c.total_queries == 0 {
            0.0
        } else {
            c.failed_queries as f64 / c.total_queries as f64
        };
        MetricsSnapshot {
            total_queries: c.total_queries,
            successful_queries: c.successful_queries,
            failed_queries: c.failed_queries,
            total_retries: c.total_retries,
            successful_retries: c.successful_retries,
            total_latency: c.total_latency,
            max_latency: c.max_latency,
            average_latency: average(c.total_latency, c.total_queries),
            active_connections: c.active_connections,
            idle_connections: c.idle_connections,
            total_connections: c.active_connections + c.idle_connections,
            connections_created: c.connections_created,
            connections_closed: c.connections_closed,
            error_rate,
            last_error: c.last_error.clone(),
            last_error_time: c.last_error_time,
            operations: c.operations.clone(),
        }
    }
}

impl RetryObserver for MetricsCollector {
    fn on_retry(&self, _operation: &str, success: bool) {
        self.record_retry(success);
    }
}

fn average(total: Duration, count: u64) -> Duration {
    match u32::try_from(count) {
        Ok(0) => Duration::ZERO,
        Ok(n) => total / n,
        Err(_) => Duration::from_secs_f64(total.as_secs_f64() / count as f64),
    }
}
