// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! A subscriber that records what it receives.

use super::{lock, Fusion, Subscriber, SubscriptionRef, UNBOUNDED};
use crate::context::Context;
use crate::error::BoxError;
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// One recorded signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal<T> {
    /// `on_subscribe`.
    Subscribe,
    /// `on_next` with its item.
    Next(T),
    /// `on_error` with the rendered error.
    Error(String),
    /// `on_complete`.
    Complete,
}

/// The kind of a signal, as passed to a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// `on_subscribe`.
    Subscribe,
    /// `on_next`.
    Next,
    /// `on_error`.
    Error,
    /// `on_complete`.
    Complete,
}

type Probe = Box<dyn FnMut(SignalKind) + Send>;

struct Shared<T> {
    signals: Mutex<Vec<Signal<T>>>,
    subscription: Mutex<Option<SubscriptionRef<T>>>,
    fusion: Mutex<Fusion>,
    terminated: AtomicBool,
    notify: Notify,
}

impl<T> Shared<T> {
    fn push(&self, signal: Signal<T>) {
        lock(&self.signals).push(signal);
    }

    fn terminate(&self) {
        self.terminated.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

/// A [`Subscriber`] recording every signal, observed through its [`RecorderHandle`].
///
/// By default it requests [`UNBOUNDED`] items on subscribe and does not ask for fusion.
pub struct Recorder<T> {
    shared: Arc<Shared<T>>,
    initial_request: u64,
    fusion: Fusion,
    context: Context,
    probe: Option<Probe>,
}

impl<T: Send + 'static> Recorder<T> {
    /// Returns a recorder and the handle observing it.
    pub fn new() -> (Self, RecorderHandle<T>) {
        let shared = Arc::new(Shared {
            signals: Mutex::new(Vec::new()),
            subscription: Mutex::new(None),
            fusion: Mutex::new(Fusion::None),
            terminated: AtomicBool::new(false),
            notify: Notify::new(),
        });
        let recorder = Self {
            shared: shared.clone(),
            initial_request: UNBOUNDED,
            fusion: Fusion::None,
            context: Context::empty(),
            probe: None,
        };
        (recorder, RecorderHandle { shared })
    }

    /// Set the demand signalled on subscribe.
    /// Default is [`UNBOUNDED`], and zero requests nothing.
    pub fn with_initial_request(mut self, n: u64) -> Self {
        self.initial_request = n;
        self
    }

    /// Set the fusion mode asked of a fuseable subscription. A granted [`Fusion::Sync`] drains the
    /// subscription with `poll` right away.
    /// Default is [`Fusion::None`].
    pub fn with_fusion(mut self, fusion: Fusion) -> Self {
        self.fusion = fusion;
        self
    }

    /// Set the context returned by [`Subscriber::current_context`].
    /// Default is [`Context::empty`].
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Set a callback invoked at the start of every signal, on the thread delivering it.
    pub fn with_probe<F>(mut self, probe: F) -> Self
    where
        F: FnMut(SignalKind) + Send + 'static,
    {
        self.probe = Some(Box::new(probe));
        self
    }

    fn probe(&mut self, kind: SignalKind) {
        if let Some(probe) = self.probe.as_mut() {
            probe(kind);
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for Recorder<T> {
    fn on_subscribe(&mut self, subscription: SubscriptionRef<T>) {
        self.probe(SignalKind::Subscribe);
        self.shared.push(Signal::Subscribe);
        *lock(&self.shared.subscription) = Some(subscription.clone());
        if self.fusion != Fusion::None {
            if let Some(queue) = subscription.as_fuseable() {
                let mode = queue.request_fusion(self.fusion);
                *lock(&self.shared.fusion) = mode;
                if mode == Fusion::Sync {
                    while let Some(item) = queue.poll() {
                        self.probe(SignalKind::Next);
                        self.shared.push(Signal::Next(item));
                    }
                    self.probe(SignalKind::Complete);
                    self.shared.push(Signal::Complete);
                    self.shared.terminate();
                    return;
                }
            }
        }
        if self.initial_request > 0 {
            subscription.request(self.initial_request);
        }
    }

    fn on_next(&mut self, item: T) {
        self.probe(SignalKind::Next);
        self.shared.push(Signal::Next(item));
    }

    fn on_error(&mut self, error: BoxError) {
        self.probe(SignalKind::Error);
        self.shared.push(Signal::Error(error.to_string()));
        self.shared.terminate();
    }

    fn on_complete(&mut self) {
        self.probe(SignalKind::Complete);
        self.shared.push(Signal::Complete);
        self.shared.terminate();
    }

    fn current_context(&self) -> Context {
        self.context.clone()
    }
}

impl<T> Debug for Recorder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recorder")
            .field("initial_request", &self.initial_request)
            .field("fusion", &self.fusion)
            .finish_non_exhaustive()
    }
}

/// Observes and drives the subscription of a [`Recorder`].
pub struct RecorderHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for RecorderHandle<T> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<T> RecorderHandle<T> {
    /// Every signal received so far.
    pub fn signals(&self) -> Vec<Signal<T>>
    where
        T: Clone,
    {
        lock(&self.shared.signals).clone()
    }

    /// The items received so far.
    pub fn items(&self) -> Vec<T>
    where
        T: Clone,
    {
        lock(&self.shared.signals)
            .iter()
            .filter_map(|signal| match signal {
                Signal::Next(item) => Some(item.clone()),
                _ => None,
            })
            .collect()
    }

    /// Whether `on_error` or `on_complete` was received.
    pub fn is_terminated(&self) -> bool {
        self.shared.terminated.load(Ordering::Acquire)
    }

    /// Waits for `on_error` or `on_complete`.
    pub async fn terminated(&self) {
        loop {
            let notified = self.shared.notify.notified();
            let mut notified = std::pin::pin!(notified);
            notified.as_mut().enable();
            if self.is_terminated() {
                return;
            }
            notified.await;
        }
    }

    /// Signals demand through the recorded subscription, if any.
    pub fn request(&self, n: u64) {
        let subscription = lock(&self.shared.subscription).clone();
        if let Some(subscription) = subscription {
            subscription.request(n);
        }
    }

    /// Cancels the recorded subscription, if any.
    pub fn cancel(&self) {
        let subscription = lock(&self.shared.subscription).clone();
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
    }

    /// The fusion mode granted on subscribe.
    pub fn fusion_mode(&self) -> Fusion {
        *lock(&self.shared.fusion)
    }
}

impl<T> Debug for RecorderHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecorderHandle").field("terminated", &self.is_terminated()).finish()
    }
}
