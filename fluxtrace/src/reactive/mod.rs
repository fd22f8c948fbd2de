// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! The push-based stream protocol.
//!
//! A [`Publisher`] delivers signals to a [`Subscriber`]: exactly one `on_subscribe`, then any
//! number of `on_next` bounded by the demand signalled through [`Subscription::request`], then at
//! most one of `on_error` / `on_complete`. Signals to one subscriber are serial, but successive
//! signals may run on different threads.
//!
//! A subscription may additionally offer the synchronous-pull fast path ([`QueueSubscription`]).
//! Which one a subscriber got is told by the [`SubscriptionRef`] variant, checked once in
//! `on_subscribe`.

use crate::context::Context;
use crate::error::BoxError;
use std::fmt::{self, Debug};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use recorder::{Recorder, RecorderHandle, Signal, SignalKind};
pub use stream::{BridgeConfig, FluxStream};

pub mod demand;
mod recorder;
mod source;
mod stream;

/// Demand value meaning "no limit".
pub const UNBOUNDED: u64 = u64::MAX;

/// The link between one publisher and one subscriber.
pub trait Subscription: Send + Sync {
    /// Signals demand for `n` more items. Demand accumulates and saturates at [`UNBOUNDED`].
    fn request(&self, n: u64);
    /// Asks the publisher to stop sending signals and release resources.
    fn cancel(&self);
}

/// Fusion modes negotiated through [`QueueSubscription::request_fusion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fusion {
    /// No fusion, items are pushed through `on_next`.
    None,
    /// Items are pulled with `poll`; `None` from `poll` means the source completed.
    Sync,
    /// Items are pulled with `poll` after being announced by `on_next`.
    Async,
    /// Requested by a subscriber that accepts either `Sync` or `Async`.
    Any,
}

/// A subscription that also offers the synchronous-pull fast path.
pub trait QueueSubscription<T>: Subscription {
    /// Negotiates a fusion mode. Returns the granted mode, [`Fusion::None`] when refused.
    fn request_fusion(&self, requested: Fusion) -> Fusion;
    /// Pulls the next item, if any.
    fn poll(&self) -> Option<T>;
    /// Number of items ready to be pulled.
    fn size(&self) -> usize;
    /// Whether no item is ready to be pulled.
    fn is_empty(&self) -> bool;
    /// Discards every item ready to be pulled.
    fn clear(&self);
}

/// The subscription received by [`Subscriber::on_subscribe`].
pub enum SubscriptionRef<T> {
    /// A plain subscription.
    Plain(Arc<dyn Subscription>),
    /// A subscription that supports queue fusion.
    Fuseable(Arc<dyn QueueSubscription<T>>),
}

impl<T> SubscriptionRef<T> {
    /// Signals demand for `n` more items.
    #[inline]
    pub fn request(&self, n: u64) {
        match self {
            Self::Plain(s) => s.request(n),
            Self::Fuseable(s) => s.request(n),
        }
    }

    /// Cancels the subscription.
    #[inline]
    pub fn cancel(&self) {
        match self {
            Self::Plain(s) => s.cancel(),
            Self::Fuseable(s) => s.cancel(),
        }
    }

    /// The fusion capability, when offered.
    #[inline]
    pub fn as_fuseable(&self) -> Option<&Arc<dyn QueueSubscription<T>>> {
        match self {
            Self::Plain(_) => None,
            Self::Fuseable(s) => Some(s),
        }
    }
}

impl<T> Clone for SubscriptionRef<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Plain(s) => Self::Plain(s.clone()),
            Self::Fuseable(s) => Self::Fuseable(s.clone()),
        }
    }
}

impl<T> Debug for SubscriptionRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("SubscriptionRef::Plain"),
            Self::Fuseable(_) => f.write_str("SubscriptionRef::Fuseable"),
        }
    }
}

/// Receives the signals of one subscription.
pub trait Subscriber<T>: Send {
    /// First signal, carrying the subscription used to request items or cancel.
    fn on_subscribe(&mut self, subscription: SubscriptionRef<T>);
    /// One item.
    fn on_next(&mut self, item: T);
    /// Terminal failure.
    fn on_error(&mut self, error: BoxError);
    /// Terminal success.
    fn on_complete(&mut self);
    /// The ambient context of this subscription, visible to upstream stages.
    fn current_context(&self) -> Context {
        Context::empty()
    }
}

/// An owned, type-erased subscriber.
pub type BoxSubscriber<T> = Box<dyn Subscriber<T>>;

impl<T, S> Subscriber<T> for Box<S>
where
    S: Subscriber<T> + ?Sized,
{
    fn on_subscribe(&mut self, subscription: SubscriptionRef<T>) {
        (**self).on_subscribe(subscription)
    }
    fn on_next(&mut self, item: T) {
        (**self).on_next(item)
    }
    fn on_error(&mut self, error: BoxError) {
        (**self).on_error(error)
    }
    fn on_complete(&mut self) {
        (**self).on_complete()
    }
    fn current_context(&self) -> Context {
        (**self).current_context()
    }
}

/// A source of signals, subscribed to any number of times.
pub trait Publisher<T>: Send + Sync + 'static {
    /// Starts a new subscription delivering to `subscriber`.
    fn subscribe(&self, subscriber: BoxSubscriber<T>);

    /// Whether this publisher is an immediate value source: at most one item known up front,
    /// no asynchronous signal sequence worth instrumenting.
    fn is_scalar(&self) -> bool {
        false
    }

    /// Whether subscribers are already decorated with trace scope passing.
    fn is_traced(&self) -> bool {
        false
    }
}

/// A shared handle to a [`Publisher`].
pub struct Flux<T> {
    publisher: Arc<dyn Publisher<T>>,
}

impl<T: Send + 'static> Flux<T> {
    /// Wraps a publisher.
    pub fn new<P: Publisher<T>>(publisher: P) -> Self {
        Self { publisher: Arc::new(publisher) }
    }

    /// Wraps an already shared publisher.
    pub fn from_shared(publisher: Arc<dyn Publisher<T>>) -> Self {
        Self { publisher }
    }

    /// Subscribes `subscriber`.
    pub fn subscribe<S: Subscriber<T> + 'static>(&self, subscriber: S) {
        self.publisher.subscribe(Box::new(subscriber))
    }

    /// Subscribes an already boxed subscriber without boxing it again.
    pub fn subscribe_boxed(&self, subscriber: BoxSubscriber<T>) {
        self.publisher.subscribe(subscriber)
    }

    /// See [`Publisher::is_scalar`].
    #[inline]
    pub fn is_scalar(&self) -> bool {
        self.publisher.is_scalar()
    }

    /// See [`Publisher::is_traced`].
    #[inline]
    pub fn is_traced(&self) -> bool {
        self.publisher.is_traced()
    }

    /// Whether both handles point at the same publisher.
    #[inline]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&a.publisher), Arc::as_ptr(&b.publisher))
    }
}

impl<T> Clone for Flux<T> {
    fn clone(&self) -> Self {
        Self {
            publisher: self.publisher.clone(),
        }
    }
}

impl<T: 'static> Debug for Flux<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flux")
            .field("scalar", &self.publisher.is_scalar())
            .field("traced", &self.publisher.is_traced())
            .finish()
    }
}

/// A subscription with nothing to request or cancel.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct EmptySubscription;

impl Subscription for EmptySubscription {
    fn request(&self, _: u64) {}
    fn cancel(&self) {}
}

/// Locks `mutex`, recovering the data if a subscriber panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
