//! Client representation
//!
//! `Client` models one live connection registered with the hub. It owns the
//! sending half of a bounded outbound queue, which the connection's two
//! bridge tasks (and the hub's direct-broadcast path) write into and the
//! transport drains, plus a cancellation token for the connection's
//! lifetime.
//!
//! Only the hub closes a client. `close` is guarded by a one-shot flag so
//! the queue is closed, and the lifetime cancelled, exactly once no matter
//! how many teardown paths race.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::ClientIdentity;

/// Unique handle for a registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a payload did not make it into the outbound queue.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("outbound queue stayed full for the whole send timeout")]
    TimedOut,
    #[error("outbound queue is closed")]
    Closed,
    #[error("client lifetime was cancelled")]
    Cancelled,
}

/// Delivery counters for one client.
///
/// A client registered with a hub also adds every count to the hub's
/// running totals at the moment it happens, so the totals never miss a
/// count made while the client is being torn down.
#[derive(Debug, Default)]
pub struct ClientStats {
    delivered: AtomicU64,
    dropped: AtomicU64,
    malformed: AtomicU64,
    totals: Option<Arc<ClientStats>>,
}

impl ClientStats {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Payloads discarded because the consumer was too slow.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Payloads discarded because they were not a notification envelope.
    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    pub(crate) fn record_malformed(&self) {
        self.record(|stats| &stats.malformed);
    }

    fn record(&self, counter: fn(&ClientStats) -> &AtomicU64) {
        counter(self).fetch_add(1, Ordering::Relaxed);
        if let Some(totals) = &self.totals {
            counter(totals).fetch_add(1, Ordering::Relaxed);
        }
    }
}

pub struct Client {
    id: ClientId,
    identity: ClientIdentity,
    sender: Mutex<Option<mpsc::Sender<Bytes>>>,
    receiver: Mutex<Option<mpsc::Receiver<Bytes>>>,
    lifetime: CancellationToken,
    closed: AtomicBool,
    stats: ClientStats,
}

impl Client {
    /// Creates a client with an outbound queue of `capacity` payloads whose
    /// lifetime is `lifetime` (normally a child of the hub's token).
    pub(crate) fn new(identity: ClientIdentity, capacity: usize, lifetime: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            id: ClientId::new(),
            identity,
            sender: Mutex::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
            lifetime,
            closed: AtomicBool::new(false),
            stats: ClientStats::default(),
        }
    }

    /// Also count into `totals`.
    pub(crate) fn with_totals(mut self, totals: Arc<ClientStats>) -> Self {
        self.stats.totals = Some(totals);
        self
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// The connection's lifetime. Cancelled when the hub unregisters the
    /// client or shuts down.
    pub fn lifetime(&self) -> &CancellationToken {
        &self.lifetime
    }

    pub fn stats(&self) -> &ClientStats {
        &self.stats
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Hands the consuming end of the outbound queue to the transport.
    /// Only the first call gets it; the queue has a single consumer.
    pub fn take_outbound(&self) -> Option<mpsc::Receiver<Bytes>> {
        lock(&self.receiver).take()
    }

    /// Enqueues `payload`, waiting at most `timeout` for room.
    ///
    /// Fails with `Closed` once the client has been closed, `TimedOut` when
    /// the queue stayed full, and `Cancelled` when the lifetime ends while
    /// waiting. A timed out payload is counted as dropped.
    pub async fn send_timeout(&self, payload: Bytes, timeout: Duration) -> Result<(), EnqueueError> {
        let Some(sender) = lock(&self.sender).clone() else {
            return Err(EnqueueError::Closed);
        };

        // a cancelled client must not accept a payload even when the queue
        // has room
        let result = tokio::select! {
            biased;
            _ = self.lifetime.cancelled() => Err(EnqueueError::Cancelled),
            sent = sender.send_timeout(payload, timeout) => match sent {
                Ok(()) => Ok(()),
                Err(SendTimeoutError::Timeout(_)) => Err(EnqueueError::TimedOut),
                Err(SendTimeoutError::Closed(_)) => Err(EnqueueError::Closed),
            },
        };

        match result {
            Ok(()) => self.stats.record(|stats| &stats.delivered),
            Err(EnqueueError::TimedOut) => self.stats.record(|stats| &stats.dropped),
            Err(_) => {}
        }
        result
    }

    /// Cancels the lifetime and closes the outbound queue. Only the first
    /// call has any effect; it returns `true`.
    pub(crate) fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.lifetime.cancel();
        lock(&self.sender).take();
        true
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
