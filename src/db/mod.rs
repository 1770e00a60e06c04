//! Resilient data-access core.
//!
//! - [`backoff`]: exponential backoff with an elapsed-time ceiling
//! - [`metrics`]: query, retry and connection counters
//! - [`spans`]: span provider seam over OpenTelemetry
//! - [`pool`]: bounded connection pool with idle reaping
//! - [`executor`]: `span ∘ timing ∘ retry` wrapper every store call runs in

pub mod backoff;
pub mod executor;
pub mod metrics;
pub mod pool;
pub mod spans;

pub use backoff::{BackoffPolicy, NoopObserver, RetryError, RetryObserver};
pub use executor::QueryExecutor;
pub use metrics::{MetricsCollector, MetricsSnapshot, OperationStats};
pub use pool::{
    ConnectionId, ConnectionManager, ConnectionPool, PoolConfig, PoolStats, PooledConnection,
};
pub use spans::{OtelTracingProvider, TagValue, TraceSpan, TracingProvider};
