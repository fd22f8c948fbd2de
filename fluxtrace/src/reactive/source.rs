// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! In-memory sources.

use super::demand::{add_cap, take_one};
use super::{lock, BoxSubscriber, EmptySubscription, Flux, Fusion, Publisher, QueueSubscription, Subscription, SubscriptionRef};
use std::iter::Peekable;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

impl<T: Send + 'static> Flux<T> {
    /// A scalar source emitting `value` then completing.
    pub fn just(value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::new(IterPublisher {
            items: std::iter::once(value),
            scalar: true,
        })
    }

    /// A scalar source that completes without emitting.
    pub fn empty() -> Self {
        Self::new(IterPublisher {
            items: std::iter::empty::<T>(),
            scalar: true,
        })
    }

    /// A source that fails every subscriber with a clone of `error`.
    pub fn error<E>(error: E) -> Self
    where
        E: std::error::Error + Clone + Send + Sync + 'static,
    {
        Self::new(ErrorPublisher { error })
    }

    /// A cold source emitting the items of `items` on demand, once per subscriber.
    ///
    /// The subscription grants [`Fusion::Sync`] to subscribers that ask for it.
    pub fn from_iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
        I::IntoIter: Send + 'static,
    {
        Self::new(IterPublisher { items, scalar: false })
    }
}

struct IterPublisher<I> {
    items: I,
    scalar: bool,
}

impl<I, T> Publisher<T> for IterPublisher<I>
where
    I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
    I::IntoIter: Send + 'static,
    T: Send + 'static,
{
    fn subscribe(&self, mut actual: BoxSubscriber<T>) {
        let subscription = Arc::new(IterSubscription::new(Box::new(self.items.clone().into_iter())));
        actual.on_subscribe(SubscriptionRef::Fuseable(subscription.clone()));
        if subscription.fused.load(Ordering::Acquire) {
            // the subscriber pulls with poll() from now on
            return;
        }
        lock(&subscription.state).actual = Some(actual);
        subscription.drain();
    }

    fn is_scalar(&self) -> bool {
        self.scalar
    }
}

struct IterState<T> {
    items: Peekable<Box<dyn Iterator<Item = T> + Send>>,
    actual: Option<BoxSubscriber<T>>,
    done: bool,
}

struct IterSubscription<T> {
    state: Mutex<IterState<T>>,
    requested: AtomicU64,
    wip: AtomicUsize,
    cancelled: AtomicBool,
    fused: AtomicBool,
}

impl<T: Send + 'static> IterSubscription<T> {
    fn new(items: Box<dyn Iterator<Item = T> + Send>) -> Self {
        Self {
            state: Mutex::new(IterState {
                items: items.peekable(),
                actual: None,
                done: false,
            }),
            requested: AtomicU64::new(0),
            // Held by `subscribe` until the subscriber is installed.
            wip: AtomicUsize::new(1),
            cancelled: AtomicBool::new(false),
            fused: AtomicBool::new(false),
        }
    }

    /// Emits while there is demand. Only one caller drains at a time; a request made from inside
    /// `on_next` is picked up by the loop of the caller already draining.
    fn drain(&self) {
        let mut missed = 1;
        loop {
            self.emit();
            missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                break;
            }
        }
    }

    fn emit(&self) {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let Some(actual) = state.actual.as_mut() else {
            return;
        };
        while !state.done {
            if self.cancelled.load(Ordering::Acquire) {
                state.done = true;
                break;
            }
            if state.items.peek().is_none() {
                state.done = true;
                actual.on_complete();
                break;
            }
            if !take_one(&self.requested) {
                break;
            }
            if let Some(item) = state.items.next() {
                actual.on_next(item);
            }
        }
        if state.done {
            state.actual = None;
        }
    }
}

impl<T: Send + 'static> Subscription for IterSubscription<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            debug!("[FLUXTRACE] ignoring a request of zero items");
            return;
        }
        add_cap(&self.requested, n);
        if self.wip.fetch_add(1, Ordering::AcqRel) == 0 {
            self.drain();
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if self.wip.fetch_add(1, Ordering::AcqRel) == 0 {
            self.drain();
        }
    }
}

impl<T: Send + 'static> QueueSubscription<T> for IterSubscription<T> {
    fn request_fusion(&self, requested: Fusion) -> Fusion {
        match requested {
            Fusion::Sync | Fusion::Any => {
                self.fused.store(true, Ordering::Release);
                Fusion::Sync
            },
            Fusion::None | Fusion::Async => Fusion::None,
        }
    }

    fn poll(&self) -> Option<T> {
        if self.cancelled.load(Ordering::Acquire) {
            return None;
        }
        lock(&self.state).items.next()
    }

    fn size(&self) -> usize {
        lock(&self.state).items.size_hint().0
    }

    fn is_empty(&self) -> bool {
        lock(&self.state).items.peek().is_none()
    }

    fn clear(&self) {
        let empty: Box<dyn Iterator<Item = T> + Send> = Box::new(std::iter::empty());
        lock(&self.state).items = empty.peekable();
    }
}

struct ErrorPublisher<E> {
    error: E,
}

impl<E, T> Publisher<T> for ErrorPublisher<E>
where
    E: std::error::Error + Clone + Send + Sync + 'static,
    T: Send + 'static,
{
    fn subscribe(&self, mut actual: BoxSubscriber<T>) {
        actual.on_subscribe(SubscriptionRef::Plain(Arc::new(EmptySubscription)));
        actual.on_error(Box::new(self.error.clone()));
    }
}
