//! Span provider used by the executor.
//!
//! The executor only sees the [`TracingProvider`] / [`TraceSpan`] pair, so
//! tests can swap in a recording provider and production wires the
//! OpenTelemetry tracer installed by [`crate::telemetry`].

use std::fmt;

use opentelemetry::trace::{Span, Status, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue, Value};

use crate::context::QueryContext;
use crate::error::StoreError;

/// A value attached to a span under a key.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// String tag.
    Str(String),
    /// Integer tag.
    I64(i64),
    /// Boolean tag.
    Bool(bool),
    /// Floating-point tag.
    F64(f64),
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for TagValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<u32> for TagValue {
    fn from(v: u32) -> Self {
        Self::I64(i64::from(v))
    }
}

impl From<bool> for TagValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

impl From<TagValue> for Value {
    fn from(v: TagValue) -> Self {
        match v {
            TagValue::Str(s) => Self::from(s),
            TagValue::I64(i) => Self::I64(i),
            TagValue::Bool(b) => Self::Bool(b),
            TagValue::F64(f) => Self::F64(f),
        }
    }
}

/// An open span. Ending consumes it, so a span cannot be ended twice.
pub trait TraceSpan: Send {
    /// Attaches a key/value tag.
    fn set_tag(&mut self, key: &'static str, value: TagValue);

    /// Marks the span as failed with `err`.
    fn set_error(&mut self, err: &StoreError);

    /// Hex trace id, when the span is recorded.
    fn trace_id(&self) -> Option<String>;

    /// Hex span id, when the span is recorded.
    fn span_id(&self) -> Option<String>;

    /// Ends the span.
    fn end(self: Box<Self>);
}

/// Creates spans for store operations.
pub trait TracingProvider: Send + Sync + fmt::Debug {
    /// Starts a span named `operation`, parented on the context's trace
    /// parent when it has one.
    fn start_span(&self, ctx: &QueryContext, operation: &'static str) -> Box<dyn TraceSpan>;
}

/// [`TracingProvider`] backed by an OpenTelemetry tracer.
pub struct OtelTracingProvider<T> {
    tracer: T,
}

impl<T> OtelTracingProvider<T> {
    /// Wraps `tracer`.
    pub const fn new(tracer: T) -> Self {
        Self { tracer }
    }
}

impl OtelTracingProvider<opentelemetry::global::BoxedTracer> {
    /// Uses the globally installed tracer provider.
    #[must_use]
    pub fn global(name: &'static str) -> Self {
        Self::new(opentelemetry::global::tracer(name))
    }
}

impl<T> fmt::Debug for OtelTracingProvider<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtelTracingProvider").finish_non_exhaustive()
    }
}

impl<T> TracingProvider for OtelTracingProvider<T>
where
    T: Tracer + Send + Sync,
    T::Span: Send + 'static,
{
    fn start_span(&self, ctx: &QueryContext, operation: &'static str) -> Box<dyn TraceSpan> {
        let root = Context::new();
        let parent = ctx.trace_parent().unwrap_or(&root);
        let mut span = self.tracer.start_with_context(operation, parent);
        span.set_attribute(KeyValue::new("db.operation", operation));
        Box::new(OtelSpan { span })
    }
}

struct OtelSpan<S> {
    span: S,
}

impl<S: Span + Send> TraceSpan for OtelSpan<S> {
    fn set_tag(&mut self, key: &'static str, value: TagValue) {
        self.span.set_attribute(KeyValue::new(key, Value::from(value)));
    }

    fn set_error(&mut self, err: &StoreError) {
        self.span.record_error(err);
        self.span.set_status(Status::error(err.to_string()));
    }

    fn trace_id(&self) -> Option<String> {
        let sc = self.span.span_context();
        sc.is_valid().then(|| sc.trace_id().to_string())
    }

    fn span_id(&self) -> Option<String> {
        let sc = self.span.span_context();
        sc.is_valid().then(|| sc.span_id().to_string())
    }

    fn end(mut self: Box<Self>) {
        self.span.end();
    }
}

/// Returns an OpenTelemetry context whose active span is the current
/// `tracing` span, for callers that want store spans parented on the
/// request span.
#[must_use]
pub fn current_trace_parent() -> Context {
    use tracing_opentelemetry::OpenTelemetrySpanExt;
    let cx = tracing::Span::current().context();
    if cx.span().span_context().is_valid() {
        cx
    } else {
        Context::new()
    }
}
