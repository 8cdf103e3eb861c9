//! Broker bridge
//!
//! One bridge task runs per client per topic. It owns a single broker
//! subscription for the client's lifetime and relays each payload into the
//! client's outbound queue with a bounded wait:
//!
//! - enqueued: keep going
//! - queue still full when the wait expires: drop the payload and keep going
//! - lifetime cancelled, queue closed or broker stream ended: stop
//!
//! The subscription is dropped, and so released, on every exit path.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::broker::{Broker, Notification};
use crate::client::{Client, EnqueueError};

/// Which of a client's two streams a bridge carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    /// Messages addressed to the client's primary identity.
    Direct,
    /// Messages broadcast to the client's group.
    Group,
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicKind::Direct => f.write_str("direct"),
            TopicKind::Group => f.write_str("group"),
        }
    }
}

pub(crate) struct Bridge {
    pub(crate) client: Arc<Client>,
    pub(crate) broker: Arc<dyn Broker>,
    pub(crate) topic: String,
    pub(crate) kind: TopicKind,
    pub(crate) send_timeout: Duration,
}

impl Bridge {
    pub(crate) async fn run(self) {
        let client = &self.client;
        let lifetime = client.lifetime().clone();
        let client_id = client.id();

        let subscribed = tokio::select! {
            _ = lifetime.cancelled() => {
                debug!(%client_id, topic = %self.topic, "client gone before subscribing");
                return;
            }
            subscribed = self.broker.subscribe(&self.topic) => subscribed,
        };

        let mut subscription = match subscribed {
            Ok(subscription) => subscription,
            Err(err) if lifetime.is_cancelled() => {
                debug!(%client_id, topic = %self.topic, %err, "subscription aborted by disconnect");
                return;
            }
            Err(err) => {
                error!(
                    %client_id,
                    topic = %self.topic,
                    kind = %self.kind,
                    %err,
                    "failed to subscribe, client gets no messages on this topic"
                );
                return;
            }
        };

        debug!(%client_id, topic = %self.topic, kind = %self.kind, "bridge started");

        loop {
            tokio::select! {
                _ = lifetime.cancelled() => break,
                received = subscription.recv() => {
                    let Some(payload) = received else {
                        debug!(%client_id, topic = %self.topic, "broker closed the subscription");
                        break;
                    };

                    if let Err(err) = Notification::parse(&payload) {
                        client.stats().record_malformed();
                        warn!(
                            %client_id,
                            topic = %self.topic,
                            bytes = payload.len(),
                            %err,
                            "dropping malformed notification"
                        );
                        continue;
                    }

                    match client.send_timeout(payload, self.send_timeout).await {
                        Ok(()) => {}
                        Err(EnqueueError::TimedOut) => {
                            warn!(
                                %client_id,
                                primary_id = client.identity().primary_id(),
                                topic = %self.topic,
                                timeout_ms = self.send_timeout.as_millis() as u64,
                                "client too slow, dropping message"
                            );
                        }
                        Err(EnqueueError::Cancelled | EnqueueError::Closed) => break,
                    }
                }
            }
        }

        debug!(%client_id, topic = %self.topic, kind = %self.kind, "bridge stopped");
    }
}
