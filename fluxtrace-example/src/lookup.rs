// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use clap::Parser;
use fluxtrace::trace::{OtelCurrentTraceContext, SpanScopeDecorator, ThreadLocalCurrentTraceContext};
use fluxtrace::{TraceContext, Tracing};
use opentelemetry::trace::{TraceContextExt, Tracer, TracerProvider as _};
use service::{init_tracing, Collection, InMemoryCollection, Printer, TracingCollection};

#[derive(Parser)]
struct Flags {
    /// Sets the city to look up.
    #[clap(long, default_value = "Paris")]
    city: String,
    /// Delivers documents without propagating the trace context.
    #[clap(long)]
    no_tracing: bool,
    /// Tracks the current trace context with OpenTelemetry instead of a thread-local slot.
    #[clap(long)]
    otel: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let flags = Flags::parse();
    init_tracing("Fluxtrace Example Lookup")?;

    let tracing = if flags.otel {
        Tracing::builder().with_current_trace_context(OtelCurrentTraceContext::new())
    } else {
        Tracing::builder().with_current_trace_context(ThreadLocalCurrentTraceContext::builder().add_scope_decorator(SpanScopeDecorator).build())
    }
    .with_noop(flags.no_tracing)
    .build();
    let collection = TracingCollection::new(InMemoryCollection::sample(), tracing.clone());

    // the parent span of the lookup: a real OpenTelemetry span, or a fresh root context
    let provider = opentelemetry_sdk::trace::TracerProvider::builder().build();
    let _otel_guard = flags.otel.then(|| {
        let span = provider.tracer("fluxtrace-example").start("lookup");
        opentelemetry::Context::current_with_span(span).attach()
    });
    let parent = match tracing.current_trace_context().get() {
        Some(parent) => parent,
        None => TraceContext::new_root(),
    };
    tracing::info!(%parent, city = %flags.city, "looking up documents");

    let (printer, done) = Printer::new(tracing.current_trace_context().clone());
    {
        let _scope = tracing.current_trace_context().new_scope(Some(parent));
        collection.find(&flags.city).subscribe(printer);
    }
    match done.await? {
        Ok(count) => tracing::info!(count, "lookup complete"),
        Err(e) => tracing::warn!("lookup failed: {e}"),
    }
    Ok(())
}
