//! Trace context passed explicitly through the relay pipeline.
//!
//! A [`TraceContext`] wraps an OpenTelemetry [`Context`] and is handed by value to every
//! downstream call; there is no ambient "current span". Each component boundary opens a
//! child [`Span`] from the global tracer, so the provider installed by
//! [`crate::telemetry::init_tracing`] decides where spans go. Without one the spans are
//! no-ops and no `traceparent` is sent.

use crate::error::RelayError;
use opentelemetry::global::{self, BoxedTracer};
use opentelemetry::propagation::{Injector, TextMapPropagator};
use opentelemetry::trace::{Status, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue, Value};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;

/// Instrumentation scope name for every span the relay opens.
pub const TRACER_NAME: &str = "chatrelay";

fn tracer() -> BoxedTracer {
    global::tracer(TRACER_NAME)
}

/// Causal context for one mention. `Default` carries no span: children become roots.
#[derive(Debug, Clone, Default)]
pub struct TraceContext {
    cx: Context,
}

impl TraceContext {
    /// 32 lowercase hex digits; all zeros when no sampled span is attached.
    pub fn trace_id(&self) -> String {
        self.cx.span().span_context().trace_id().to_string()
    }

    /// 16 lowercase hex digits.
    pub fn span_id(&self) -> String {
        self.cx.span().span_context().span_id().to_string()
    }

    pub fn is_valid(&self) -> bool {
        self.cx.span().span_context().is_valid()
    }

    /// W3C `traceparent` value, if the context carries a valid span.
    pub fn traceparent(&self) -> Option<String> {
        let mut fields = HashMap::new();
        TraceContextPropagator::new().inject_context(&self.cx, &mut fields);
        fields.remove("traceparent")
    }

    /// Write W3C trace headers (`traceparent`, `tracestate`) into an outgoing request.
    pub fn inject_headers(&self, headers: &mut HeaderMap) {
        TraceContextPropagator::new().inject_context(&self.cx, &mut HeaderInjector(headers));
    }
}

struct HeaderInjector<'a>(&'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            self.0.insert(name, value);
        }
    }
}

/// An open span. Ended when dropped, so every exit path closes it.
pub struct Span {
    cx: Context,
}

impl Span {
    /// Root span of a new trace.
    pub fn root(name: &'static str) -> Self {
        Self::start(name, &Context::new())
    }

    /// Child span of `parent` (same trace id).
    pub fn child_of(name: &'static str, parent: &TraceContext) -> Self {
        Self::start(name, &parent.cx)
    }

    fn start(name: &'static str, parent: &Context) -> Self {
        let span = tracer().start_with_context(name, parent);
        Self {
            cx: parent.with_span(span),
        }
    }

    /// Context for children of this span.
    pub fn context(&self) -> TraceContext {
        TraceContext {
            cx: self.cx.clone(),
        }
    }

    pub fn set_attribute(&mut self, key: &'static str, value: impl Into<Value>) {
        self.cx.span().set_attribute(KeyValue::new(key, value));
    }

    /// Marks the span failed. The last recorded error wins.
    pub fn record_error(&mut self, err: &RelayError) {
        let span = self.cx.span();
        span.set_attribute(KeyValue::new("error.kind", err.kind()));
        span.set_status(Status::error(err.to_string()));
    }

    /// Marks the span failed without a `RelayError` (e.g. an HTTP error status).
    pub fn set_error_status(&mut self, description: String) {
        self.cx.span().set_status(Status::error(description));
    }

    /// Close the span now instead of at end of scope.
    pub fn end(self) {}
}

impl Drop for Span {
    fn drop(&mut self) {
        self.cx.span().end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::testing::{finished_spans, span_exporter};
    use opentelemetry::trace::{SpanId, Status};

    #[test]
    fn root_has_hex_ids() {
        span_exporter();
        let span = Span::root("mention");
        let ctx = span.context();
        assert!(ctx.is_valid());
        assert_eq!(ctx.trace_id().len(), 32);
        assert_eq!(ctx.span_id().len(), 16);
        assert!(ctx.trace_id().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn children_keep_trace_and_link_parent() {
        span_exporter();
        let root = Span::root("mention");
        let child = Span::child_of("forward", &root.context());
        let grandchild = Span::child_of("backend.send", &child.context());
        let trace_id = root.context().trace_id();
        assert_eq!(child.context().trace_id(), trace_id);
        assert_eq!(grandchild.context().trace_id(), trace_id);
        assert_ne!(child.context().span_id(), root.context().span_id());

        let child_span_id = child.context().span_id();
        grandchild.end();
        child.end();
        root.end();
        let spans = finished_spans(&trace_id);
        let backend = spans.iter().find(|s| s.name == "backend.send").unwrap();
        assert_eq!(backend.parent_span_id.to_string(), child_span_id);
        let mention = spans.iter().find(|s| s.name == "mention").unwrap();
        assert_eq!(mention.parent_span_id, SpanId::INVALID);
    }

    #[test]
    fn traceparent_matches_span() {
        span_exporter();
        let span = Span::root("mention");
        let ctx = span.context();
        assert_eq!(
            ctx.traceparent().unwrap(),
            format!("00-{}-{}-01", ctx.trace_id(), ctx.span_id())
        );

        let mut headers = HeaderMap::new();
        ctx.inject_headers(&mut headers);
        assert_eq!(
            headers.get("traceparent").and_then(|v| v.to_str().ok()),
            ctx.traceparent().as_deref()
        );
    }

    #[test]
    fn empty_context_has_no_traceparent() {
        let ctx = TraceContext::default();
        assert!(!ctx.is_valid());
        assert!(ctx.traceparent().is_none());
    }

    #[test]
    fn recorded_error_sets_status_and_kind() {
        span_exporter();
        let mut span = Span::root("forward");
        let trace_id = span.context().trace_id();
        span.record_error(&RelayError::Transport("connection refused".to_string()));
        span.end();

        let spans = finished_spans(&trace_id);
        assert_eq!(spans.len(), 1);
        assert!(matches!(spans[0].status, Status::Error { .. }));
        assert!(spans[0]
            .attributes
            .iter()
            .any(|kv| kv.key.as_str() == "error.kind"
                && kv.value.as_str() == "transport_error"));
    }
}
