// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Current trace context backed by OpenTelemetry.

use super::{CurrentTraceContext, Scope, TraceContext};
use opentelemetry::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState};

/// Reads and writes the span context of [`opentelemetry::Context::current`].
///
/// A scope attaches a context holding the span as a remote parent, along with the full
/// [`TraceContext`], and detaches it when closed. A span made current by other OpenTelemetry code
/// is reported without a parent identifier, as a span context does not carry one.
#[derive(Debug, Clone, Copy, Default)]
pub struct OtelCurrentTraceContext;

impl OtelCurrentTraceContext {
    /// Returns the facility.
    pub fn new() -> Self {
        Self
    }
}

impl CurrentTraceContext for OtelCurrentTraceContext {
    fn get(&self) -> Option<TraceContext> {
        let cx = opentelemetry::Context::current();
        let span = cx.span();
        let span_context = span.span_context();
        if !span_context.is_valid() {
            return None;
        }
        let active = from_span_context(span_context);
        match cx.get::<TraceContext>() {
            Some(attached) if attached.trace_id() == active.trace_id() && attached.span_id() == active.span_id() => Some(*attached),
            _ => Some(active),
        }
    }

    fn new_scope(&self, context: Option<TraceContext>) -> Scope {
        let cx = match context {
            Some(context) => opentelemetry::Context::current().with_remote_span_context(to_span_context(&context)).with_value(context),
            None => opentelemetry::Context::new(),
        };
        let guard = cx.attach();
        Scope::from_fn(move || drop(guard))
    }
}

fn from_span_context(span_context: &SpanContext) -> TraceContext {
    TraceContext::from_parts(
        u128::from_be_bytes(span_context.trace_id().to_bytes()),
        u64::from_be_bytes(span_context.span_id().to_bytes()),
        None,
        span_context.is_sampled(),
    )
}

fn to_span_context(context: &TraceContext) -> SpanContext {
    let flags = if context.sampled() { TraceFlags::SAMPLED } else { TraceFlags::default() };
    SpanContext::new(
        TraceId::from_bytes(context.trace_id().to_be_bytes()),
        SpanId::from_bytes(context.span_id().to_be_bytes()),
        flags,
        true,
        TraceState::default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_attaches_and_detaches_otel_context() {
        let current = OtelCurrentTraceContext::new();
        let ctx = TraceContext::new_root();
        assert_eq!(current.get(), None);
        {
            let _scope = current.new_scope(Some(ctx));
            assert_eq!(current.get(), Some(ctx));
            let span_id = opentelemetry::Context::current().span().span_context().span_id();
            assert_eq!(span_id, SpanId::from_bytes(ctx.span_id().to_be_bytes()));
        }
        assert_eq!(current.get(), None);
    }

    #[test]
    fn test_child_context_round_trips() {
        let current = OtelCurrentTraceContext::new();
        let child = TraceContext::new_root().child();
        let _scope = current.new_scope(Some(child));
        assert_eq!(current.get(), Some(child));
        assert!(current.maybe_scope(Some(child)).is_noop());
    }

    #[test]
    fn test_foreign_span_reported_without_parent() {
        let current = OtelCurrentTraceContext::new();
        let attached = TraceContext::new_root().child();
        let _attached = current.new_scope(Some(attached));
        let foreign = TraceContext::from_parts(attached.trace_id(), 99, None, true);
        let cx = opentelemetry::Context::current().with_remote_span_context(to_span_context(&foreign));
        let _guard = cx.attach();
        assert_eq!(current.get(), Some(foreign));
    }

    #[test]
    fn test_unsampled_context_round_trips() {
        let current = OtelCurrentTraceContext::new();
        let ctx = TraceContext::from_parts(42, 7, None, false);
        let _scope = current.new_scope(Some(ctx));
        assert_eq!(current.get(), Some(ctx));
        let cleared = current.new_scope(None);
        assert_eq!(current.get(), None);
        drop(cleared);
        assert_eq!(current.get(), Some(ctx));
    }
}
