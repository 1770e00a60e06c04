//! # comics-gateway
//!
//! REST service for a personal comic catalog, built around a resilient,
//! observable data-access layer.
//!
//! Every store call runs inside the query executor, which opens one span,
//! retries transient failures under an exponential backoff with an
//! elapsed-time ceiling and records one metrics entry per logical call.
//! Connections come from a bounded pool with idle reaping; a background
//! health checker pings the store on an adaptive schedule and drives the
//! readiness probe.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP)
//!     │
//!     ├── REST Handlers (api/)          probes + /metrics
//!     │
//!     ├── ComicStore (persistence/)     ◀── HealthChecker (health)
//!     │
//!     ├── QueryExecutor (db/)           span ∘ timing ∘ retry
//!     ├── ConnectionPool (db/)          MetricsCollector, spans
//!     │
//!     └── ComicBackend: PostgreSQL (sqlx) | in-memory
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod context;
pub mod db;
pub mod domain;
pub mod error;
pub mod health;
pub mod persistence;
pub mod telemetry;
