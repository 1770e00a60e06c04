//! Shared application state injected into all Axum handlers.

use std::sync::Arc;
use std::time::Duration;

use crate::context::QueryContext;
use crate::db::spans::current_trace_parent;
use crate::health::HealthChecker;
use crate::persistence::ComicStore;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Comic store every handler goes through.
    pub store: Arc<dyn ComicStore>,
    /// Readiness state machine behind `/health/ready`.
    pub health: Arc<HealthChecker>,
    /// Deadline attached to each request's query context.
    pub request_timeout: Duration,
}

impl AppState {
    /// Query context for one request: the request deadline plus the
    /// current span as trace parent.
    #[must_use]
    pub fn request_context(&self) -> QueryContext {
        QueryContext::with_timeout(self.request_timeout).with_trace_parent(current_trace_parent())
    }
}
