//! In-memory broker engine
//!
//! `MemoryBroker` keeps a table of topics, each holding the sending halves
//! of its live subscriptions. It is the default backend and the one the
//! tests run against.
//!
//! Concurrency and usage notes:
//! - The topic table sits behind a single `std::sync::Mutex`; the lock is
//!   never held across an `.await`.
//! - Subscription channels are bounded and `publish` never waits on a
//!   subscriber: a payload for a subscription whose buffer is full is
//!   dropped and counted, so a stalled reader holds at most one buffer of
//!   stale messages.
//! - Dropping a `Subscription` removes it from its topic; topics left
//!   without subscribers are removed as well.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace, warn};

use super::{Broker, DEFAULT_SUBSCRIPTION_BUFFER, Subscription};
use crate::utils::Result;

pub type SubscriberId = u64;

/// A topic and the subscriptions currently attached to it.
#[derive(Debug)]
pub struct Topic {
    pub name: String,
    pub subscribers: HashMap<SubscriberId, mpsc::Sender<Bytes>>,
}

impl Topic {
    /// Creates a new instance of the Topic with the given name
    /// Initializes an empty set of subscribers
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: HashMap::new(),
        }
    }

    /// Subscribes a new subscriber to the topic
    pub fn subscribe(&mut self, id: SubscriberId, sender: mpsc::Sender<Bytes>) {
        self.subscribers.insert(id, sender);
    }

    /// Unsubscribes a subscriber from the topic
    /// If the subscriber is not subscribed, it has no effect
    pub fn unsubscribe(&mut self, id: SubscriberId) {
        self.subscribers.remove(&id);
    }
}

#[derive(Debug)]
struct EngineInner {
    topics: Mutex<HashMap<String, Topic>>,
    next_id: AtomicU64,
    buffer: usize,
    dropped: AtomicU64,
}

impl EngineInner {
    fn topics(&self) -> MutexGuard<'_, HashMap<String, Topic>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unsubscribe(&self, topic: &str, id: SubscriberId) {
        let mut topics = self.topics();
        if let Some(t) = topics.get_mut(topic) {
            t.unsubscribe(id);
            if t.subscribers.is_empty() {
                topics.remove(topic);
            }
        }
    }
}

/// In-process publish/subscribe store. Cloning yields another handle to
/// the same topic table.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    inner: Arc<EngineInner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::with_buffer(DEFAULT_SUBSCRIPTION_BUFFER)
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a broker whose subscriptions each buffer up to `buffer`
    /// payloads.
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                topics: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                buffer: buffer.max(1),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Payloads dropped because a subscription's buffer was full.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics()
            .get(topic)
            .map(|t| t.subscribers.len())
            .unwrap_or(0)
    }

    /// Names of all topics with at least one subscription.
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.topics().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drops every subscription on `topic` from the broker side, as a lost
    /// connection would. Subscribers observe the end of their stream.
    /// Returns how many subscriptions were cut.
    pub fn disconnect(&self, topic: &str) -> usize {
        let removed = self.inner.topics().remove(topic);
        let count = removed.map(|t| t.subscribers.len()).unwrap_or(0);
        debug!(topic, count, "disconnected topic subscribers");
        count
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn subscribe(&self, topic: &str) -> Result<Subscription> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.buffer);

        self.inner
            .topics()
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(topic))
            .subscribe(id, tx);

        trace!(topic, subscriber = id, "subscribed");

        let inner: Weak<EngineInner> = Arc::downgrade(&self.inner);
        let name = topic.to_string();
        Ok(Subscription::new(topic, rx).on_release(move || {
            if let Some(inner) = inner.upgrade() {
                inner.unsubscribe(&name, id);
                trace!(topic = %name, subscriber = id, "released subscription");
            }
        }))
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<usize> {
        let mut topics = self.inner.topics();
        let Some(t) = topics.get_mut(topic) else {
            trace!(topic, "publish to topic without subscribers");
            return Ok(0);
        };

        let mut delivered = 0;
        let mut full = 0;
        // Senders whose receiver is gone are pruned here
        t.subscribers
            .retain(|_, sender| match sender.try_send(payload.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    full += 1;
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            });
        if t.subscribers.is_empty() {
            topics.remove(topic);
        }
        drop(topics);

        if full > 0 {
            self.inner.dropped.fetch_add(full, Ordering::Relaxed);
            warn!(topic, subscribers = full, "subscription buffer full, dropping message");
        }
        Ok(delivered)
    }
}
