// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Scope decorators.

use super::{Scope, TraceContext};

/// Hooks extra work around every scope a facility opens.
pub trait ScopeDecorator: Send + Sync + 'static {
    /// Returns a scope that wraps `scope`. Closing the returned scope must close `scope`.
    fn decorate_scope(&self, context: Option<&TraceContext>, scope: Scope) -> Scope;
}

/// Enters a `tracing` span carrying the trace identifiers while a scope is open, so log records
/// emitted inside the bracket can be correlated with the trace.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpanScopeDecorator;

impl ScopeDecorator for SpanScopeDecorator {
    fn decorate_scope(&self, context: Option<&TraceContext>, scope: Scope) -> Scope {
        let Some(context) = context else {
            return scope;
        };
        let entered = tracing::debug_span!("trace_scope", trace_id = %format_args!("{:032x}", context.trace_id()), span_id = %format_args!("{:016x}", context.span_id())).entered();
        Scope::from_fn(move || {
            drop(entered);
            drop(scope);
        })
    }
}
