// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! The subscriber decorator making a parent trace context current around every signal.

use crate::context::Context;
use crate::error::BoxError;
use crate::reactive::{BoxSubscriber, Fusion, QueueSubscription, Subscriber, Subscription, SubscriptionRef};
use crate::trace::{CurrentTraceContext, Scope, TraceContext};
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Decorates a subscriber so that each of its signals, and each `request`/`cancel` it sends
/// upstream, runs while `parent` is the current trace context.
///
/// The decorator is transparent: items, errors, completion, demand and cancellation are forwarded
/// unchanged and in order. It reports itself as fuseable but refuses every fusion mode, so the
/// upstream keeps pushing through `on_next` where the scope can be applied.
///
/// A `cancel` received before the upstream subscription is remembered; the upstream is then
/// cancelled as soon as it arrives and the decorated subscriber gets no signal at all.
pub struct ScopePassingSubscriber<T> {
    actual: BoxSubscriber<T>,
    context: Context,
    subscription: Arc<ScopePassingSubscription<T>>,
    suppressed: bool,
}

impl<T: Send + 'static> ScopePassingSubscriber<T> {
    /// Decorates `actual` with `parent`, as tracked by `current`.
    ///
    /// `context` is the ambient context of `actual`. When it carries a trace context other than
    /// `parent`, the one exposed upstream carries `parent` instead.
    pub fn new(actual: BoxSubscriber<T>, context: Context, current: Arc<dyn CurrentTraceContext>, parent: TraceContext) -> Self {
        let stale = matches!(context.get::<TraceContext>(), Some(ambient) if *ambient != parent);
        let context = if stale { context.with(parent) } else { context };
        Self {
            actual,
            context,
            subscription: Arc::new(ScopePassingSubscription {
                upstream: OnceLock::new(),
                cancelled: AtomicBool::new(false),
                current,
                parent,
            }),
            suppressed: false,
        }
    }

    /// The trace context made current around each signal.
    #[inline]
    pub fn parent(&self) -> TraceContext {
        self.subscription.parent
    }

    /// The subscription handed to the decorated subscriber.
    pub fn subscription(&self) -> &Arc<ScopePassingSubscription<T>> {
        &self.subscription
    }

    /// The subscription received from upstream, once `on_subscribe` was delivered.
    pub fn upstream(&self) -> Option<&SubscriptionRef<T>> {
        self.subscription.upstream.get()
    }

    /// The decorated subscriber.
    pub fn actual(&self) -> &dyn Subscriber<T> {
        &*self.actual
    }

    /// Same as [`Subscription::request`] on [`Self::subscription`].
    pub fn request(&self, n: u64) {
        self.subscription.request(n)
    }

    /// Same as [`Subscription::cancel`] on [`Self::subscription`].
    pub fn cancel(&self) {
        self.subscription.cancel()
    }
}

impl<T: Send + 'static> Subscriber<T> for ScopePassingSubscriber<T> {
    fn on_subscribe(&mut self, subscription: SubscriptionRef<T>) {
        let _scope = self.subscription.scope();
        if let Err(duplicate) = self.subscription.upstream.set(subscription) {
            warn!("[FLUXTRACE] upstream subscription already set, cancelling the new one");
            duplicate.cancel();
            return;
        }
        if self.subscription.cancelled.load(Ordering::SeqCst) {
            debug!("[FLUXTRACE] cancelled before subscribe, cancelling upstream");
            self.suppressed = true;
            if let Some(upstream) = self.subscription.upstream.get() {
                upstream.cancel();
            }
            return;
        }
        self.actual.on_subscribe(SubscriptionRef::Fuseable(self.subscription.clone()));
    }

    fn on_next(&mut self, item: T) {
        if self.suppressed {
            return;
        }
        let _scope = self.subscription.scope();
        self.actual.on_next(item);
    }

    fn on_error(&mut self, error: BoxError) {
        if self.suppressed {
            return;
        }
        let _scope = self.subscription.scope();
        self.actual.on_error(error);
    }

    fn on_complete(&mut self) {
        if self.suppressed {
            return;
        }
        let _scope = self.subscription.scope();
        self.actual.on_complete();
    }

    fn current_context(&self) -> Context {
        self.context.clone()
    }
}

impl<T> Debug for ScopePassingSubscriber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopePassingSubscriber")
            .field("parent", &self.subscription.parent)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// The subscription side of a [`ScopePassingSubscriber`], shared with the decorated subscriber.
pub struct ScopePassingSubscription<T> {
    upstream: OnceLock<SubscriptionRef<T>>,
    cancelled: AtomicBool,
    current: Arc<dyn CurrentTraceContext>,
    parent: TraceContext,
}

impl<T> ScopePassingSubscription<T> {
    fn scope(&self) -> Scope {
        self.current.maybe_scope(Some(self.parent))
    }

    /// Whether `cancel` was called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl<T> Subscription for ScopePassingSubscription<T> {
    fn request(&self, n: u64) {
        // no upstream yet: nothing to forward the demand to
        if let Some(upstream) = self.upstream.get() {
            let _scope = self.scope();
            upstream.request(n);
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(upstream) = self.upstream.get() {
            let _scope = self.scope();
            upstream.cancel();
        }
    }
}

impl<T> QueueSubscription<T> for ScopePassingSubscription<T> {
    fn request_fusion(&self, _: Fusion) -> Fusion {
        Fusion::None
    }

    fn poll(&self) -> Option<T> {
        None
    }

    fn size(&self) -> usize {
        0
    }

    fn is_empty(&self) -> bool {
        true
    }

    fn clear(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Flux, Recorder, Signal, SignalKind};
    use crate::trace::ThreadLocalCurrentTraceContext;
    use static_assertions::assert_impl_all;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::Mutex;

    assert_impl_all!(ScopePassingSubscriber<String>: Send);
    assert_impl_all!(ScopePassingSubscription<String>: Send, Sync);

    type Samples = Arc<Mutex<Vec<(&'static str, Option<TraceContext>)>>>;

    struct SamplingSubscription {
        current: Arc<dyn CurrentTraceContext>,
        samples: Samples,
        cancelled: AtomicBool,
    }

    impl Subscription for SamplingSubscription {
        fn request(&self, _: u64) {
            self.samples.lock().unwrap().push(("request", self.current.get()));
        }
        fn cancel(&self) {
            self.cancelled.store(true, Ordering::SeqCst);
            self.samples.lock().unwrap().push(("cancel", self.current.get()));
        }
    }

    fn facility() -> Arc<dyn CurrentTraceContext> {
        Arc::new(ThreadLocalCurrentTraceContext::new())
    }

    fn sampling(current: &Arc<dyn CurrentTraceContext>, samples: &Samples) -> Arc<SamplingSubscription> {
        Arc::new(SamplingSubscription {
            current: current.clone(),
            samples: samples.clone(),
            cancelled: AtomicBool::new(false),
        })
    }

    fn sampling_recorder(current: &Arc<dyn CurrentTraceContext>, samples: &Samples) -> (Recorder<i32>, crate::reactive::RecorderHandle<i32>) {
        let (current, samples) = (current.clone(), samples.clone());
        let (recorder, handle) = Recorder::new();
        let recorder = recorder.with_initial_request(0).with_probe(move |kind| {
            let name = match kind {
                SignalKind::Subscribe => "on_subscribe",
                SignalKind::Next => "on_next",
                SignalKind::Error => "on_error",
                SignalKind::Complete => "on_complete",
            };
            samples.lock().unwrap().push((name, current.get()));
        });
        (recorder, handle)
    }

    #[test]
    fn test_every_signal_runs_in_parent_scope() {
        let current = facility();
        let samples = Samples::default();
        let parent = TraceContext::new_root();
        let (recorder, handle) = sampling_recorder(&current, &samples);
        let mut subscriber = ScopePassingSubscriber::new(Box::new(recorder), Context::empty(), current.clone(), parent);

        subscriber.on_subscribe(SubscriptionRef::Plain(sampling(&current, &samples)));
        handle.request(2);
        subscriber.on_next(1);
        subscriber.on_complete();
        handle.cancel();

        let (recorder, _) = sampling_recorder(&current, &samples);
        let mut failing = ScopePassingSubscriber::new(Box::new(recorder), Context::empty(), current.clone(), parent);
        failing.on_subscribe(SubscriptionRef::Plain(sampling(&current, &samples)));
        failing.on_error("boom".into());

        let samples = samples.lock().unwrap();
        let names: Vec<_> = samples.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["on_subscribe", "request", "on_next", "on_complete", "cancel", "on_subscribe", "on_error"]);
        assert!(samples.iter().all(|(_, seen)| *seen == Some(parent)));
        assert_eq!(current.get(), None);
        assert_eq!(handle.signals(), vec![Signal::Subscribe, Signal::Next(1), Signal::Complete]);
    }

    #[test]
    fn test_scope_restored_when_inner_panics() {
        let current = facility();
        let outer = TraceContext::new_root();
        let _outer = current.new_scope(Some(outer));
        let (recorder, _) = Recorder::<i32>::new();
        let recorder = recorder.with_probe(|kind| {
            if kind == SignalKind::Next {
                panic!("subscriber failure");
            }
        });
        let mut subscriber = ScopePassingSubscriber::new(Box::new(recorder), Context::empty(), current.clone(), TraceContext::new_root());
        subscriber.on_subscribe(SubscriptionRef::Plain(sampling(&current, &Samples::default())));
        let result = catch_unwind(AssertUnwindSafe(|| subscriber.on_next(1)));
        assert!(result.is_err());
        assert_eq!(current.get(), Some(outer));
    }

    #[test]
    fn test_fusion_is_refused() {
        let (recorder, handle) = Recorder::new();
        let subscriber = ScopePassingSubscriber::new(Box::new(recorder.with_fusion(Fusion::Any)), Context::empty(), facility(), TraceContext::new_root());
        let subscription = subscriber.subscription().clone();
        Flux::from_iter(vec![1, 2]).subscribe(subscriber);

        assert_eq!(handle.fusion_mode(), Fusion::None);
        assert_eq!(handle.signals(), vec![Signal::Subscribe, Signal::Next(1), Signal::Next(2), Signal::Complete]);
        assert_eq!(subscription.request_fusion(Fusion::Sync), Fusion::None);
        assert_eq!(subscription.poll(), None);
        assert_eq!(subscription.size(), 0);
        assert!(subscription.is_empty());
        subscription.clear();
    }

    #[test]
    fn test_cancel_before_subscribe_is_deferred() {
        let current = facility();
        let samples = Samples::default();
        let parent = TraceContext::new_root();
        let (recorder, handle) = Recorder::<i32>::new();
        let mut subscriber = ScopePassingSubscriber::new(Box::new(recorder), Context::empty(), current.clone(), parent);

        subscriber.request(3);
        subscriber.cancel();
        assert!(subscriber.subscription().is_cancelled());

        let upstream = sampling(&current, &samples);
        subscriber.on_subscribe(SubscriptionRef::Plain(upstream.clone()));
        subscriber.on_next(1);
        subscriber.on_complete();

        assert!(upstream.cancelled.load(Ordering::SeqCst));
        assert_eq!(*samples.lock().unwrap(), vec![("cancel", Some(parent))]);
        assert!(handle.signals().is_empty());
    }

    #[test]
    fn test_second_upstream_is_cancelled() {
        let current = facility();
        let samples = Samples::default();
        let (recorder, handle) = Recorder::<i32>::new();
        let mut subscriber = ScopePassingSubscriber::new(Box::new(recorder.with_initial_request(0)), Context::empty(), current.clone(), TraceContext::new_root());
        let first = sampling(&current, &samples);
        let second = sampling(&current, &samples);
        subscriber.on_subscribe(SubscriptionRef::Plain(first.clone()));
        subscriber.on_subscribe(SubscriptionRef::Plain(second.clone()));

        assert!(!first.cancelled.load(Ordering::SeqCst));
        assert!(second.cancelled.load(Ordering::SeqCst));
        assert_eq!(handle.signals(), vec![Signal::Subscribe]);
    }

    #[test]
    fn test_upstream_and_actual_are_exposed() {
        #[derive(Debug, PartialEq)]
        struct Tenant(&'static str);

        let current = facility();
        let (recorder, _) = Recorder::<i32>::new();
        let recorder = recorder.with_initial_request(0).with_context(Context::empty().with(Tenant("acme")));
        let mut subscriber = ScopePassingSubscriber::new(Box::new(recorder), Context::empty(), current.clone(), TraceContext::new_root());
        assert!(subscriber.upstream().is_none());
        assert_eq!(subscriber.actual().current_context().get::<Tenant>(), Some(&Tenant("acme")));

        let (first, second) = (sampling(&current, &Samples::default()), sampling(&current, &Samples::default()));
        subscriber.on_subscribe(SubscriptionRef::Plain(first.clone()));
        subscriber.on_subscribe(SubscriptionRef::Plain(second.clone()));
        assert!(matches!(subscriber.upstream(), Some(SubscriptionRef::Plain(_))));
        assert!(second.cancelled.load(Ordering::SeqCst));
        assert!(!first.cancelled.load(Ordering::SeqCst));
        subscriber.upstream().unwrap().cancel();
        assert!(first.cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn test_context_carries_the_parent() {
        #[derive(Debug, PartialEq)]
        struct Tenant(&'static str);

        let parent = TraceContext::new_root();
        let ambient = Context::empty().with(Tenant("acme")).with(TraceContext::new_root());
        let (recorder, _) = Recorder::<i32>::new();
        let subscriber = ScopePassingSubscriber::new(Box::new(recorder), ambient, facility(), parent);
        let context = subscriber.current_context();
        assert_eq!(context.get::<TraceContext>(), Some(&parent));
        assert_eq!(context.get::<Tenant>(), Some(&Tenant("acme")));

        let ambient = Context::empty().with(Tenant("acme"));
        let (recorder, _) = Recorder::<i32>::new();
        let subscriber = ScopePassingSubscriber::new(Box::new(recorder), ambient, facility(), parent);
        assert_eq!(subscriber.current_context().get::<TraceContext>(), None);
        assert_eq!(subscriber.parent(), parent);
    }
}
