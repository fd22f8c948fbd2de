// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Provides building blocks for tracing distributed programs.
//!
//! A trace is logically a tree of causally-related events called spans. A [`TraceContext`]
//! identifies one span of a trace. A [`CurrentTraceContext`] tracks which context is current on
//! the calling thread and hands out [`Scope`]s: while a scope is alive, its context is current,
//! and dropping the scope restores whatever was current before.
//!
//! [`Tracing`] bundles a facility with an on/off switch and is what the rest of this crate
//! consumes.

use rand::Rng;
use std::fmt::{self, Debug, Display};
use std::sync::Arc;

pub use decorator::{ScopeDecorator, SpanScopeDecorator};
#[cfg(feature = "otel")]
#[cfg_attr(docsrs, doc(cfg(feature = "otel")))]
pub use otel::OtelCurrentTraceContext;
pub use thread_local::{ThreadLocalBuilder, ThreadLocalCurrentTraceContext};

mod decorator;
#[cfg(feature = "otel")]
mod otel;
mod thread_local;

/// Identifies a span within a trace. Immutable and cheap to copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceContext {
    trace_id: u128,
    span_id: u64,
    parent_id: Option<u64>,
    sampled: bool,
}

impl TraceContext {
    /// Creates the context of a new, sampled root span with random identifiers.
    pub fn new_root() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            trace_id: rng.gen_range(1..=u128::MAX),
            span_id: rng.gen_range(1..=u64::MAX),
            parent_id: None,
            sampled: true,
        }
    }

    /// Creates the context of a new span whose parent is `self`, in the same trace.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: rand::thread_rng().gen_range(1..=u64::MAX),
            parent_id: Some(self.span_id),
            sampled: self.sampled,
        }
    }

    /// Creates a context from identifiers received from elsewhere, e.g. a propagation header.
    pub const fn from_parts(trace_id: u128, span_id: u64, parent_id: Option<u64>, sampled: bool) -> Self {
        Self {
            trace_id,
            span_id,
            parent_id,
            sampled,
        }
    }

    /// Trace identifier.
    #[inline]
    pub fn trace_id(&self) -> u128 {
        self.trace_id
    }

    /// Span identifier.
    #[inline]
    pub fn span_id(&self) -> u64 {
        self.span_id
    }

    /// Span identifier of the parent, if any.
    #[inline]
    pub fn parent_id(&self) -> Option<u64> {
        self.parent_id
    }

    /// Whether the trace is recorded.
    #[inline]
    pub fn sampled(&self) -> bool {
        self.sampled
    }
}

impl Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}-{:016x}", self.trace_id, self.span_id)
    }
}

/// The bracket during which a trace context is current.
///
/// A scope is bound to the thread that opened it. Dropping it (or calling [`Scope::close`])
/// restores the previously current context, including while unwinding from a panic.
#[must_use = "a scope is released as soon as it is dropped"]
pub struct Scope {
    release: Option<Box<dyn FnOnce()>>,
}

impl Scope {
    /// A scope that changed nothing and restores nothing.
    #[inline]
    pub fn noop() -> Self {
        Self { release: None }
    }

    /// A scope that runs `release` when closed.
    #[inline]
    pub fn from_fn<F>(release: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self { release: Some(Box::new(release)) }
    }

    /// Whether closing this scope has no effect.
    #[inline]
    pub fn is_noop(&self) -> bool {
        self.release.is_none()
    }

    /// Releases the scope now.
    #[inline]
    pub fn close(self) {}
}

impl Drop for Scope {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope").field("noop", &self.is_noop()).finish()
    }
}

/// Tracks the trace context that is current for the calling thread.
pub trait CurrentTraceContext: Send + Sync + 'static {
    /// The current trace context, if any.
    fn get(&self) -> Option<TraceContext>;

    /// Makes `context` current until the returned scope is closed.
    ///
    /// Passing `None` clears the current context for the duration of the scope. An implementation
    /// that cannot open or close a scope must panic: that is a tracing infrastructure failure and
    /// is never reported through the stream.
    fn new_scope(&self, context: Option<TraceContext>) -> Scope;

    /// Like [`CurrentTraceContext::new_scope`], but returns a noop scope when `context` is
    /// already current.
    fn maybe_scope(&self, context: Option<TraceContext>) -> Scope {
        if self.get() == context {
            Scope::noop()
        } else {
            self.new_scope(context)
        }
    }
}

/// The tracing facility consumed by the stream decorators.
#[derive(Clone)]
pub struct Tracing {
    current_trace_context: Arc<dyn CurrentTraceContext>,
    noop: bool,
}

impl Tracing {
    /// Create a [`Tracing`] builder.
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// The facility tracking the current trace context.
    #[inline]
    pub fn current_trace_context(&self) -> &Arc<dyn CurrentTraceContext> {
        &self.current_trace_context
    }

    /// When true, streams are never decorated.
    #[inline]
    pub fn is_noop(&self) -> bool {
        self.noop
    }
}

impl Default for Tracing {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Debug for Tracing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracing").field("noop", &self.noop).finish_non_exhaustive()
    }
}

/// A [`Tracing`] builder.
#[derive(Default)]
#[non_exhaustive]
pub struct Builder {
    current_trace_context: Option<Arc<dyn CurrentTraceContext>>,
    noop: bool,
}

impl Builder {
    /// Set the facility tracking the current trace context.
    /// Default is [`ThreadLocalCurrentTraceContext`].
    pub fn with_current_trace_context<C: CurrentTraceContext>(mut self, current_trace_context: C) -> Self {
        self.current_trace_context = Some(Arc::new(current_trace_context));
        self
    }
    /// Set a facility already shared with other components.
    pub fn with_shared_current_trace_context(mut self, current_trace_context: Arc<dyn CurrentTraceContext>) -> Self {
        self.current_trace_context = Some(current_trace_context);
        self
    }
    /// Disable decoration entirely.
    /// Default is false.
    pub fn with_noop(mut self, noop: bool) -> Self {
        self.noop = noop;
        self
    }
    /// Build the [`Tracing`].
    pub fn build(self) -> Tracing {
        Tracing {
            current_trace_context: self.current_trace_context.unwrap_or_else(|| Arc::new(ThreadLocalCurrentTraceContext::new())),
            noop: self.noop,
        }
    }
}
