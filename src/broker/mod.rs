//! The `broker` module is the hub's view of the pub/sub store it bridges.
//!
//! - [`Broker`]: the seam every backend implements (subscribe + publish).
//! - [`Subscription`]: a live subscription that releases itself on drop.
//! - [`MemoryBroker`]: in-process topic table, used by default and in tests.
//! - `RedisBroker`: Redis Pub/Sub backend, behind the `redis` cargo feature.
//! - [`TopicScheme`]: how client identities map onto topic names.
//! - [`Notification`]: the envelope payloads are checked against.

pub mod engine;
pub mod message;
#[cfg(feature = "redis")]
pub mod redis_broker;
pub mod topic;

pub use engine::MemoryBroker;
pub use message::Notification;
#[cfg(feature = "redis")]
pub use redis_broker::RedisBroker;
pub use topic::TopicScheme;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;

use crate::config::{BrokerBackend, BrokerSettings};
#[cfg(not(feature = "redis"))]
use crate::utils::HubError;
use crate::utils::Result;

/// Payloads a subscription holds before the broker starts dropping for it.
pub const DEFAULT_SUBSCRIPTION_BUFFER: usize = 64;

/// A topic-based publish/subscribe store.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Opens a subscription on `topic`. Messages published after this
    /// returns are delivered to the subscription in publish order.
    async fn subscribe(&self, topic: &str) -> Result<Subscription>;

    /// Publishes `payload` on `topic`, returning how many subscribers it
    /// reached. Publishing to a topic nobody listens on is not an error.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<usize>;
}

/// Builds the broker selected by `settings`.
pub async fn connect(settings: &BrokerSettings) -> Result<Arc<dyn Broker>> {
    match settings.backend {
        BrokerBackend::Memory => Ok(Arc::new(MemoryBroker::with_buffer(
            settings.subscription_buffer,
        ))),
        #[cfg(feature = "redis")]
        BrokerBackend::Redis => Ok(Arc::new(
            RedisBroker::connect(&settings.url, settings.subscription_buffer).await?,
        )),
        #[cfg(not(feature = "redis"))]
        BrokerBackend::Redis => Err(HubError::Broker(
            "redis backend requested but fanout was built without the `redis` feature"
                .to_string(),
        )),
    }
}

type ReleaseFn = Box<dyn FnOnce() + Send + 'static>;

/// A live broker subscription.
///
/// Backed by a bounded channel: while it is full, the broker drops new
/// payloads for this subscription instead of queueing them.
/// [`recv`](Subscription::recv) yields `None` once the broker side has gone
/// away. The release hook runs exactly once, when the subscription is
/// dropped, whichever way its owner exits.
pub struct Subscription {
    topic: String,
    receiver: Receiver<Bytes>,
    release: Option<ReleaseFn>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, receiver: Receiver<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            receiver,
            release: None,
        }
    }

    /// Attaches the hook that tears the subscription down on the broker side.
    pub fn on_release<F>(mut self, release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.release = Some(Box::new(release));
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Waits for the next payload. `None` means the broker closed the
    /// subscription.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.receiver.close();
        if let Some(release) = self.release.take() {
            release();
        }
    }
}
