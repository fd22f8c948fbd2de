// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Thread-local current trace context.

use super::{CurrentTraceContext, Scope, ScopeDecorator, TraceContext};
use std::cell::Cell;
use std::sync::Arc;

thread_local! {
    static CURRENT: Cell<Option<TraceContext>> = const { Cell::new(None) };
}

/// Keeps the current trace context in a thread-local slot shared by every instance.
#[derive(Clone, Default)]
pub struct ThreadLocalCurrentTraceContext {
    decorators: Vec<Arc<dyn ScopeDecorator>>,
}

impl ThreadLocalCurrentTraceContext {
    /// Returns a facility without scope decorators.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder to register scope decorators.
    pub fn builder() -> ThreadLocalBuilder {
        ThreadLocalBuilder::default()
    }
}

impl CurrentTraceContext for ThreadLocalCurrentTraceContext {
    fn get(&self) -> Option<TraceContext> {
        CURRENT.with(Cell::get)
    }

    fn new_scope(&self, context: Option<TraceContext>) -> Scope {
        let previous = CURRENT.with(|current| current.replace(context));
        let scope = Scope::from_fn(move || CURRENT.with(|current| current.set(previous)));
        self.decorators.iter().fold(scope, |scope, decorator| decorator.decorate_scope(context.as_ref(), scope))
    }
}

/// A [`ThreadLocalCurrentTraceContext`] builder.
#[derive(Default)]
pub struct ThreadLocalBuilder {
    decorators: Vec<Arc<dyn ScopeDecorator>>,
}

impl ThreadLocalBuilder {
    /// Add a decorator applied to every new scope, in registration order.
    pub fn add_scope_decorator<D: ScopeDecorator>(mut self, decorator: D) -> Self {
        self.decorators.push(Arc::new(decorator));
        self
    }
    /// Build the facility.
    pub fn build(self) -> ThreadLocalCurrentTraceContext {
        ThreadLocalCurrentTraceContext { decorators: self.decorators }
    }
}
