// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Decorating producers so their subscribers receive signals in the caller's trace context.
//!
//! The parent trace context is resolved when subscribing: an explicit [`TraceContext`] in the
//! subscriber's [`Context`] wins, otherwise the context current at subscribe time is used.

use crate::context::Context;
use crate::reactive::{BoxSubscriber, Flux, Publisher};
use crate::scope_passing::ScopePassingSubscriber;
use crate::trace::{CurrentTraceContext, TraceContext, Tracing};
use crate::wrap::{wrap, MaybeWrapped};
use std::fmt::{self, Debug};
use tracing::trace;

/// The parent trace context of a subscription: the one carried by `context`, else the one
/// current in `current`.
pub fn resolve_parent(context: &Context, current: &dyn CurrentTraceContext) -> Option<TraceContext> {
    context.get::<TraceContext>().copied().or_else(|| current.get())
}

/// Decorates `subscriber` with a [`ScopePassingSubscriber`] bound to the resolved parent.
///
/// Returns `subscriber` itself when there is no parent to propagate.
pub fn trace_subscriber<T: Send + 'static>(subscriber: BoxSubscriber<T>, tracing: &Tracing) -> BoxSubscriber<T> {
    let current = tracing.current_trace_context();
    let context = subscriber.current_context();
    match resolve_parent(&context, &**current) {
        Some(parent) => Box::new(ScopePassingSubscriber::new(subscriber, context, current.clone(), parent)),
        None => {
            trace!("[FLUXTRACE] no parent trace context, subscriber left as-is");
            subscriber
        },
    }
}

/// Decorates `flux` with `tracing`.
///
/// The same flux is returned when `tracing` is absent or noop, and when `flux` is a scalar
/// source. A flux that is already traced is returned as-is too.
pub fn lift<T: Send + 'static>(flux: Flux<T>, tracing: Option<&Tracing>) -> Flux<T> {
    match tracing {
        Some(tracing) if !tracing.is_noop() && !flux.is_scalar() => flux.to_tracing(tracing).into_flux(),
        _ => flux,
    }
}

struct TracingPublisher<T> {
    delegate: Flux<T>,
    tracing: Tracing,
}

impl<T: Send + 'static> Publisher<T> for TracingPublisher<T> {
    fn subscribe(&self, actual: BoxSubscriber<T>) {
        self.delegate.subscribe_boxed(trace_subscriber(actual, &self.tracing));
    }

    fn is_scalar(&self) -> bool {
        self.delegate.is_scalar()
    }

    fn is_traced(&self) -> bool {
        true
    }
}

/// A flux whose subscribers are decorated with scope passing.
pub struct TracedFlux<T> {
    flux: Flux<T>,
}

impl<T: Send + 'static> TracedFlux<T> {
    /// Decorates the subscribers of `flux` with `tracing`, unless it is already traced.
    pub fn new(flux: Flux<T>, tracing: &Tracing) -> Self {
        wrap(flux, |delegate| Self {
            flux: Flux::new(TracingPublisher {
                delegate,
                tracing: tracing.clone(),
            }),
        })
    }

    /// Returns `self`: a traced flux is never decorated twice.
    pub fn to_tracing(self, _tracing: &Tracing) -> Self {
        wrap(self, std::convert::identity)
    }

    /// The underlying flux.
    #[inline]
    pub fn as_flux(&self) -> &Flux<T> {
        &self.flux
    }

    /// Converts into the underlying flux.
    #[inline]
    pub fn into_flux(self) -> Flux<T> {
        self.flux
    }

    /// See [`Flux::subscribe`].
    pub fn subscribe<S: crate::reactive::Subscriber<T> + 'static>(&self, subscriber: S) {
        self.flux.subscribe(subscriber)
    }
}

impl<T> Clone for TracedFlux<T> {
    fn clone(&self) -> Self {
        Self { flux: self.flux.clone() }
    }
}

impl<T: 'static> Debug for TracedFlux<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TracedFlux").field(&self.flux).finish()
    }
}

impl<T> From<TracedFlux<T>> for Flux<T> {
    fn from(traced: TracedFlux<T>) -> Self {
        traced.flux
    }
}

impl<T: Send + 'static> MaybeWrapped<TracedFlux<T>> for Flux<T> {
    fn try_into_wrapped(self) -> Result<TracedFlux<T>, Self> {
        if self.is_traced() {
            Ok(TracedFlux { flux: self })
        } else {
            Err(self)
        }
    }
}

impl<T> MaybeWrapped<TracedFlux<T>> for TracedFlux<T> {
    fn try_into_wrapped(self) -> Result<TracedFlux<T>, Self> {
        Ok(self)
    }
}

impl<T: Send + 'static> Flux<T> {
    /// Decorates the subscribers of this flux with `tracing`. See [`TracedFlux::new`].
    pub fn to_tracing(self, tracing: &Tracing) -> TracedFlux<T> {
        TracedFlux::new(self, tracing)
    }

    /// Same as [`lift`].
    pub fn lift_tracing(self, tracing: Option<&Tracing>) -> Self {
        lift(self, tracing)
    }
}
