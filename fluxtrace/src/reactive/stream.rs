// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Bridges between [`futures_core::Stream`] and the push protocol.
//!
//! An asynchronous producer, such as a database cursor, becomes a [`Flux`] with
//! [`Flux::from_try_stream`]. A [`Flux`] is consumed as a stream with [`Flux::into_stream`].

use super::demand::{add_cap, take_one};
use super::{BoxSubscriber, Flux, Publisher, Subscriber, Subscription, SubscriptionRef};
use crate::error::{BoxError, FluxError};
use futures_core::Stream;
use futures_util::StreamExt;
use std::convert::Infallible;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context as TaskContext, Poll};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, trace, warn};

const DEFAULT_PREFETCH: usize = 32;

impl<T: Send + 'static> Flux<T> {
    /// A cold source driving a fresh stream from `factory` for every subscriber.
    ///
    /// See [`Flux::from_try_stream`].
    pub fn from_stream<F, S>(factory: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: Stream<Item = T> + Send + 'static,
    {
        Self::from_try_stream(move || factory().map(Ok::<T, Infallible>))
    }

    /// A cold source driving a fresh fallible stream from `factory` for every subscriber.
    ///
    /// Each subscription runs on its own task of the tokio runtime entered when subscribing, so
    /// signals may arrive on any worker thread. Items are pulled from the stream only while there
    /// is demand, at most one ahead. An `Err` item terminates the subscription with `on_error`.
    /// Without a runtime the subscriber gets `on_subscribe` then `on_error(FluxError::NoRuntime)`.
    pub fn from_try_stream<F, S, E>(factory: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: Stream<Item = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        Self::new(StreamPublisher {
            factory,
            _stream: PhantomData,
        })
    }

    /// Subscribes and exposes the signals as a stream. Dropping the stream cancels the
    /// subscription.
    pub fn into_stream(self, config: BridgeConfig) -> FluxStream<T> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let link = Arc::new(BridgeLink::default());
        self.subscribe(ChannelSubscriber {
            sender: Some(sender),
            link: link.clone(),
            prefetch: config.prefetch as u64,
        });
        FluxStream {
            receiver,
            link,
            consumed: 0,
            limit: replenish_limit(config.prefetch),
            done: false,
        }
    }
}

struct StreamPublisher<F, S> {
    factory: F,
    _stream: PhantomData<fn() -> S>,
}

impl<F, S, T, E> Publisher<T> for StreamPublisher<F, S>
where
    F: Fn() -> S + Send + Sync + 'static,
    S: Stream<Item = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    fn subscribe(&self, mut actual: BoxSubscriber<T>) {
        let link = Arc::new(StreamSubscription::default());
        actual.on_subscribe(SubscriptionRef::Plain(link.clone()));
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("[FLUXTRACE] no tokio runtime entered, the stream cannot be driven");
            if !link.cancelled.load(Ordering::Acquire) {
                actual.on_error(Box::new(FluxError::NoRuntime));
            }
            return;
        };
        handle.spawn(drive((self.factory)(), actual, link));
    }
}

async fn drive<S, T, E>(stream: S, mut actual: BoxSubscriber<T>, link: Arc<StreamSubscription>)
where
    S: Stream<Item = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    let mut stream = std::pin::pin!(stream);
    loop {
        let next = tokio::select! {
            biased;
            _ = link.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(item)) => {
                if !link.demand().await {
                    break;
                }
                actual.on_next(item);
            },
            Some(Err(err)) => {
                actual.on_error(err.into());
                return;
            },
            None => {
                actual.on_complete();
                return;
            },
        }
    }
    debug!("[FLUXTRACE] stream subscription cancelled");
}

#[derive(Default)]
struct StreamSubscription {
    requested: AtomicU64,
    cancelled: AtomicBool,
    on_request: Notify,
    on_cancel: Notify,
}

impl StreamSubscription {
    /// Waits for one unit of demand. Returns false once cancelled.
    async fn demand(&self) -> bool {
        loop {
            if self.cancelled.load(Ordering::Acquire) {
                return false;
            }
            if take_one(&self.requested) {
                return true;
            }
            self.on_request.notified().await;
        }
    }

    async fn cancelled(&self) {
        while !self.cancelled.load(Ordering::Acquire) {
            self.on_cancel.notified().await;
        }
    }
}

impl Subscription for StreamSubscription {
    fn request(&self, n: u64) {
        if n == 0 {
            debug!("[FLUXTRACE] ignoring a request of zero items");
            return;
        }
        add_cap(&self.requested, n);
        self.on_request.notify_one();
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.on_cancel.notify_one();
        self.on_request.notify_one();
    }
}

/// Settings of [`Flux::into_stream`].
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct BridgeConfig {
    /// Number of items requested up front. Default is 32.
    pub(crate) prefetch: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self { prefetch: DEFAULT_PREFETCH }
    }
}

impl BridgeConfig {
    /// Returns the default config.
    pub fn new() -> Self {
        Self::default()
    }
    /// Set the number of items requested up front. Demand is replenished once three quarters of
    /// it were consumed.
    /// Default is 32, and zero means 32.
    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = if prefetch == 0 { DEFAULT_PREFETCH } else { prefetch };
        self
    }
    /// Number of items requested up front.
    pub fn prefetch(&self) -> usize {
        self.prefetch
    }
}

fn replenish_limit(prefetch: usize) -> usize {
    (prefetch - (prefetch >> 2)).max(1)
}

struct BridgeLink<T> {
    subscription: OnceLock<SubscriptionRef<T>>,
    cancelled: AtomicBool,
}

impl<T> Default for BridgeLink<T> {
    fn default() -> Self {
        Self {
            subscription: OnceLock::new(),
            cancelled: AtomicBool::new(false),
        }
    }
}

impl<T> BridgeLink<T> {
    fn request(&self, n: u64) {
        if let Some(subscription) = self.subscription.get() {
            subscription.request(n);
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(subscription) = self.subscription.get() {
            subscription.cancel();
        }
    }
}

struct ChannelSubscriber<T> {
    sender: Option<mpsc::UnboundedSender<Result<T, BoxError>>>,
    link: Arc<BridgeLink<T>>,
    prefetch: u64,
}

impl<T: Send + 'static> Subscriber<T> for ChannelSubscriber<T> {
    fn on_subscribe(&mut self, subscription: SubscriptionRef<T>) {
        if let Err(duplicate) = self.link.subscription.set(subscription) {
            warn!("[FLUXTRACE] a subscription was already received, cancelling the duplicate");
            duplicate.cancel();
            return;
        }
        if self.link.cancelled.load(Ordering::SeqCst) {
            self.link.cancel();
        } else {
            self.link.request(self.prefetch);
        }
    }

    fn on_next(&mut self, item: T) {
        if let Some(sender) = &self.sender {
            if sender.send(Ok(item)).is_err() {
                trace!("[FLUXTRACE] stream dropped, item discarded");
            }
        }
    }

    fn on_error(&mut self, error: BoxError) {
        if let Some(sender) = self.sender.take() {
            if sender.send(Err(error)).is_err() {
                trace!("[FLUXTRACE] stream dropped, error discarded");
            }
        }
    }

    fn on_complete(&mut self) {
        self.sender = None;
    }
}

/// A [`Flux`] consumed as a [`Stream`]. Yields `Err` once, as the last item, if the flux failed.
pub struct FluxStream<T> {
    receiver: mpsc::UnboundedReceiver<Result<T, BoxError>>,
    link: Arc<BridgeLink<T>>,
    consumed: usize,
    limit: usize,
    done: bool,
}

impl<T> Stream for FluxStream<T> {
    type Item = Result<T, BoxError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.receiver.poll_recv(cx) {
            Poll::Ready(Some(Ok(item))) => {
                this.consumed += 1;
                if this.consumed == this.limit {
                    this.link.request(this.consumed as u64);
                    this.consumed = 0;
                }
                Poll::Ready(Some(Ok(item)))
            },
            Poll::Ready(Some(Err(err))) => {
                this.done = true;
                Poll::Ready(Some(Err(err)))
            },
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            },
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for FluxStream<T> {
    fn drop(&mut self) {
        if !self.done {
            self.link.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Recorder, Signal};
    use assert_matches::assert_matches;
    use futures::stream;

    #[derive(Debug, thiserror::Error)]
    #[error("cursor closed")]
    struct CursorClosed;

    #[tokio::test]
    async fn test_stream_source_delivers_then_completes() {
        let (recorder, handle) = Recorder::new();
        Flux::from_stream(|| stream::iter(vec![1, 2, 3])).subscribe(recorder);
        handle.terminated().await;
        assert_eq!(handle.signals(), vec![Signal::Subscribe, Signal::Next(1), Signal::Next(2), Signal::Next(3), Signal::Complete]);
    }

    #[tokio::test]
    async fn test_stream_source_waits_for_demand() {
        let (recorder, handle) = Recorder::new();
        Flux::from_stream(|| stream::iter(1..=3)).subscribe(recorder.with_initial_request(1));
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(handle.items(), vec![1]);
        handle.request(5);
        handle.terminated().await;
        assert_eq!(handle.items(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_stream_error_is_forwarded() {
        let (recorder, handle) = Recorder::new();
        Flux::from_try_stream(|| stream::iter(vec![Ok(1), Err(CursorClosed), Ok(2)])).subscribe(recorder);
        handle.terminated().await;
        assert_eq!(handle.signals(), vec![Signal::Subscribe, Signal::Next(1), Signal::Error("cursor closed".to_string())]);
    }

    #[tokio::test]
    async fn test_stream_source_cancel_stops_the_task() {
        let (recorder, handle) = Recorder::new();
        Flux::from_stream(|| stream::pending::<i32>()).subscribe(recorder);
        handle.cancel();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(handle.signals(), vec![Signal::Subscribe]);
    }

    #[test]
    fn test_stream_source_without_runtime() {
        let (recorder, handle) = Recorder::new();
        Flux::from_stream(|| stream::iter(vec![1])).subscribe(recorder);
        assert_eq!(handle.signals(), vec![Signal::Subscribe, Signal::Error(FluxError::NoRuntime.to_string())]);
    }

    #[tokio::test]
    async fn test_into_stream_replenishes_demand() {
        let items: Vec<_> = Flux::from_iter(0..100)
            .into_stream(BridgeConfig::new().with_prefetch(4))
            .map(|r| r.map_err(|e| e.to_string()))
            .collect()
            .await;
        assert_eq!(items.len(), 100);
        assert_matches!(items.last(), Some(Ok(99)));
    }

    #[tokio::test]
    async fn test_into_stream_yields_error_last() {
        let mut items = Flux::<i32>::error(std::fmt::Error).into_stream(BridgeConfig::default());
        assert_matches!(items.next().await, Some(Err(_)));
        assert_matches!(items.next().await, None);
    }

    struct CancelFlag(Arc<AtomicBool>);

    impl Subscription for CancelFlag {
        fn request(&self, _: u64) {}
        fn cancel(&self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    struct OneThenSilence(Arc<AtomicBool>);

    impl Publisher<i32> for OneThenSilence {
        fn subscribe(&self, mut actual: BoxSubscriber<i32>) {
            actual.on_subscribe(SubscriptionRef::Plain(Arc::new(CancelFlag(self.0.clone()))));
            actual.on_next(0);
        }
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_upstream() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut items = Flux::new(OneThenSilence(cancelled.clone())).into_stream(BridgeConfig::new().with_prefetch(2));
        assert_matches!(items.next().await, Some(Ok(0)));
        assert!(!cancelled.load(Ordering::SeqCst));
        drop(items);
        assert!(cancelled.load(Ordering::SeqCst));
    }

    struct FailLater(Arc<std::sync::Mutex<Option<BoxSubscriber<i32>>>>);

    impl Publisher<i32> for FailLater {
        fn subscribe(&self, mut actual: BoxSubscriber<i32>) {
            actual.on_subscribe(SubscriptionRef::Plain(Arc::new(CancelFlag(Arc::new(AtomicBool::new(false))))));
            *self.0.lock().unwrap() = Some(actual);
        }
    }

    #[test]
    fn test_error_after_stream_dropped_is_discarded() {
        let parked = Arc::new(std::sync::Mutex::new(None));
        let items = Flux::new(FailLater(parked.clone())).into_stream(BridgeConfig::default());
        drop(items);
        let mut actual = parked.lock().unwrap().take().unwrap();
        actual.on_next(1);
        actual.on_error(Box::new(FluxError::NoRuntime));
        actual.on_complete();
    }

    #[test]
    fn test_bridge_config_defaults() {
        assert_eq!(BridgeConfig::default().prefetch(), 32);
        assert_eq!(BridgeConfig::new().with_prefetch(0).prefetch(), 32);
        assert_eq!(replenish_limit(4), 3);
        assert_eq!(replenish_limit(1), 1);
    }
}
