use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Small typed push feed built on `tokio::sync::broadcast`.
/// - T must be `Clone` so multiple subscribers can receive the same payload.
/// - Bounded channel drops oldest items when subscribers lag.
/// - Dropping a subscription unregisters it.
#[derive(Clone)]
pub struct Feed<T> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> Feed<T> {
    /// Create a feed with bounded buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish one item to current subscribers; no subscribers is not an error.
    pub fn send(&self, value: T) {
        let _ = self.tx.send(value);
    }

    /// Raw receiver for callers that want to handle lag themselves.
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    /// Typed stream of items; lag errors are skipped.
    pub fn subscribe_stream(&self) -> impl Stream<Item = T> + Send + Unpin + 'static {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|res| std::future::ready(res.ok()))
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
