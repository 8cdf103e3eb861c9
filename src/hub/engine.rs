//! Hub engine
//!
//! `Hub` is the single authority over which clients are live. It:
//! - registers clients and starts their two broker bridges
//! - unregisters clients, closing each exactly once
//! - pushes hub-originated payloads straight to a primary identity's clients
//! - shuts everything down on process exit
//!
//! Concurrency and usage notes:
//! - Every registry mutation happens under one `std::sync::Mutex`. The lock
//!   is never held across an `.await` and never while writing to a client's
//!   queue; broadcasts copy their targets out first.
//! - Each client's lifetime is a child of the hub's own token, so cancelling
//!   the hub reaches every client even if one were missed by the registry.
//! - `register_client` spawns tasks and must be called from within a tokio
//!   runtime.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::bridge::{Bridge, TopicKind};
use super::registry::Registry;
use crate::broker::{Broker, TopicScheme};
use crate::client::{Client, ClientIdentity, ClientStats, EnqueueError};
use crate::config::HubSettings;
use crate::utils::{HubError, Result};

/// Point-in-time view of the hub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Live connections.
    pub clients: usize,
    /// Distinct primary identities with at least one connection.
    pub primaries: usize,
    /// Payloads enqueued, over every client the hub has ever had.
    pub delivered: u64,
    /// Payloads dropped for slow consumers, over every client.
    pub dropped: u64,
    /// Malformed payloads discarded, over every client.
    pub malformed: u64,
}

struct HubInner {
    broker: Arc<dyn Broker>,
    topics: TopicScheme,
    outbound_capacity: usize,
    send_timeout: Duration,
    registry: Mutex<Registry>,
    lifetime: CancellationToken,
    bridges: TaskTracker,
    totals: Arc<ClientStats>,
}

impl HubInner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fan-out hub between a broker and live client connections. Cloning
/// yields another handle to the same hub.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    pub fn new(broker: Arc<dyn Broker>, settings: &HubSettings) -> Self {
        Self {
            inner: Arc::new(HubInner {
                broker,
                topics: TopicScheme::from(settings),
                outbound_capacity: settings.outbound_capacity,
                send_timeout: Duration::from_millis(settings.send_timeout_ms),
                registry: Mutex::new(Registry::default()),
                lifetime: CancellationToken::new(),
                bridges: TaskTracker::new(),
                totals: Arc::new(ClientStats::default()),
            }),
        }
    }

    pub fn topics(&self) -> &TopicScheme {
        &self.inner.topics
    }

    pub fn send_timeout(&self) -> Duration {
        self.inner.send_timeout
    }

    /// Registers a new connection for `identity` and starts its direct and
    /// group bridges.
    ///
    /// The client is in the registry when this returns. Its broker
    /// subscriptions are opened by the bridge tasks and may complete a
    /// moment later; subscription failures are logged, not returned.
    pub fn register_client(&self, identity: ClientIdentity) -> Result<Arc<Client>> {
        let inner = &self.inner;
        let client = Arc::new(
            Client::new(
                identity,
                inner.outbound_capacity,
                inner.lifetime.child_token(),
            )
            .with_totals(inner.totals.clone()),
        );

        let total = {
            let mut registry = inner.registry();
            if registry.is_shut_down() {
                return Err(HubError::ShutDown);
            }
            registry.insert(client.clone());
            registry.len()
        };

        let identity = client.identity();
        let streams = [
            (TopicKind::Direct, inner.topics.direct(identity.primary_id())),
            (TopicKind::Group, inner.topics.group(identity.group_id())),
        ];
        for (kind, topic) in streams {
            let bridge = Bridge {
                client: client.clone(),
                broker: inner.broker.clone(),
                topic,
                kind,
                send_timeout: inner.send_timeout,
            };
            inner.bridges.spawn(bridge.run());
        }

        info!(
            client_id = %client.id(),
            primary_id = identity.primary_id(),
            group_id = identity.group_id(),
            total,
            "registered client"
        );
        Ok(client)
    }

    /// Removes `client` from the hub: cancels its lifetime, which stops its
    /// bridges, and closes its outbound queue.
    ///
    /// Unregistering a client twice, or one this hub never registered, does
    /// nothing. Returns whether this call removed the client.
    pub fn unregister_client(&self, client: &Client) -> bool {
        let (removed, remaining) = {
            let mut registry = self.inner.registry();
            (registry.remove(client), registry.len())
        };

        if !removed {
            debug!(client_id = %client.id(), "unregister of unknown client ignored");
            return false;
        }

        client.close();
        info!(
            client_id = %client.id(),
            primary_id = client.identity().primary_id(),
            remaining,
            "unregistered client"
        );
        true
    }

    /// Pushes `payload` to every client currently registered under
    /// `primary_id`, with the same bounded wait and drop policy as the
    /// bridges. Returns how many clients accepted it.
    pub async fn broadcast_to_primary(&self, primary_id: &str, payload: Bytes) -> usize {
        let targets = self.inner.registry().clients_for(primary_id);
        if targets.is_empty() {
            debug!(primary_id, "no clients for direct broadcast");
            return 0;
        }

        let timeout = self.inner.send_timeout;
        let results = join_all(
            targets
                .iter()
                .map(|client| client.send_timeout(payload.clone(), timeout)),
        )
        .await;

        let mut accepted = 0;
        for (client, result) in targets.iter().zip(results) {
            match result {
                Ok(()) => accepted += 1,
                Err(EnqueueError::TimedOut) => {
                    warn!(client_id = %client.id(), primary_id, "client too slow, dropping direct broadcast");
                }
                Err(err) => {
                    debug!(client_id = %client.id(), primary_id, %err, "direct broadcast skipped");
                }
            }
        }
        accepted
    }

    /// Cancels every client, closes every outbound queue and empties the
    /// registry. Later registrations fail with [`HubError::ShutDown`].
    ///
    /// Returns once every client has been signalled; bridge tasks wind down
    /// on their own (see [`Hub::wait_for_bridges`]). Returns the number of
    /// clients closed.
    pub fn shutdown(&self) -> usize {
        let clients = self.inner.registry().shut_down();
        for client in &clients {
            client.close();
        }
        self.inner.lifetime.cancel();
        self.inner.bridges.close();

        info!(clients = clients.len(), "hub shut down");
        clients.len()
    }

    /// Waits until every bridge task this hub spawned has exited. Only
    /// meaningful after [`Hub::shutdown`].
    pub async fn wait_for_bridges(&self) {
        self.inner.bridges.close();
        self.inner.bridges.wait().await;
    }

    /// Number of bridge tasks still running.
    pub fn active_bridges(&self) -> usize {
        self.inner.bridges.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.registry().is_shut_down()
    }

    pub fn is_registered(&self, client: &Client) -> bool {
        self.inner.registry().contains(client)
    }

    pub fn client_count(&self) -> usize {
        self.inner.registry().len()
    }

    /// Live connections for one primary identity.
    pub fn connection_count(&self, primary_id: &str) -> usize {
        self.inner.registry().connection_count(primary_id)
    }

    pub fn stats(&self) -> HubStats {
        let (clients, primaries) = {
            let registry = self.inner.registry();
            (registry.len(), registry.primary_count())
        };
        let totals = &self.inner.totals;
        HubStats {
            clients,
            primaries,
            delivered: totals.delivered(),
            dropped: totals.dropped(),
            malformed: totals.malformed(),
        }
    }
}
