// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use fluxtrace::reactive::{SubscriptionRef, UNBOUNDED};
use fluxtrace::{BoxError, CurrentTraceContext, Flux, Subscriber, Tracing};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, `info` by default.
pub fn init_tracing(service_name: &'static str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_thread_names(true).try_init().map_err(|e| anyhow::anyhow!(e))?;
    tracing::info!(service_name, "tracing initialized");
    Ok(())
}

/// A stored document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub name: String,
    pub city: String,
}

impl Document {
    pub fn new(name: &str, city: &str) -> Self {
        Self {
            name: name.to_string(),
            city: city.to_string(),
        }
    }
}

/// A queryable set of documents.
pub trait Collection: Send + Sync + 'static {
    /// Documents located in `city`, fetched lazily once subscribed.
    fn find(&self, city: &str) -> Flux<Document>;
}

/// A collection held in memory whose cursor yields one document per millisecond.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCollection {
    documents: Arc<Vec<Document>>,
}

impl InMemoryCollection {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents: Arc::new(documents) }
    }

    pub fn sample() -> Self {
        Self::new(vec![
            Document::new("Louvre", "Paris"),
            Document::new("Orsay", "Paris"),
            Document::new("Confluences", "Lyon"),
            Document::new("Pompidou", "Paris"),
        ])
    }
}

impl Collection for InMemoryCollection {
    fn find(&self, city: &str) -> Flux<Document> {
        let (documents, city) = (self.documents.clone(), city.to_string());
        Flux::from_stream(move || {
            let matches: Vec<Document> = documents.iter().filter(|d| d.city == city).cloned().collect();
            stream::iter(matches).then(|document| async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                document
            })
        })
    }
}

/// Forwards to another collection and lifts every result with a tracing facility.
pub struct TracingCollection<C> {
    delegate: C,
    tracing: Tracing,
}

impl<C: Collection> TracingCollection<C> {
    pub fn new(delegate: C, tracing: Tracing) -> Self {
        Self { delegate, tracing }
    }
}

impl<C: Collection> Collection for TracingCollection<C> {
    fn find(&self, city: &str) -> Flux<Document> {
        self.delegate.find(city).lift_tracing(Some(&self.tracing))
    }
}

/// Logs every document with the trace context current while it is delivered, then reports the
/// outcome through a oneshot channel.
pub struct Printer {
    current: Arc<dyn CurrentTraceContext>,
    count: usize,
    done: Option<oneshot::Sender<Result<usize, BoxError>>>,
}

impl Printer {
    pub fn new(current: Arc<dyn CurrentTraceContext>) -> (Self, oneshot::Receiver<Result<usize, BoxError>>) {
        let (done, receiver) = oneshot::channel();
        (Self { current, count: 0, done: Some(done) }, receiver)
    }

    fn finish(&mut self, outcome: Result<usize, BoxError>) {
        if let Some(done) = self.done.take() {
            let _ = done.send(outcome);
        }
    }
}

impl Subscriber<Document> for Printer {
    fn on_subscribe(&mut self, subscription: SubscriptionRef<Document>) {
        subscription.request(UNBOUNDED);
    }

    fn on_next(&mut self, document: Document) {
        self.count += 1;
        let trace = self.current.get().map(|context| context.to_string()).unwrap_or_else(|| "none".to_string());
        tracing::info!(%trace, name = %document.name, city = %document.city, "document received");
    }

    fn on_error(&mut self, error: BoxError) {
        self.finish(Err(error));
    }

    fn on_complete(&mut self) {
        let count = self.count;
        self.finish(Ok(count));
    }
}
