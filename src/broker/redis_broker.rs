//! Redis Pub/Sub backend.
//!
//! Each subscription opens its own Pub/Sub connection and spawns a
//! forwarding task that relays messages into the subscription's channel
//! until the subscription is released or Redis drops the connection. The
//! subscription channel is bounded; messages arriving while it is full are
//! dropped and counted.
//! Publishing shares one `ConnectionManager`, which reconnects on its own.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Broker, Subscription};
use crate::utils::Result;

pub struct RedisBroker {
    client: Client,
    conn: ConnectionManager,
    buffer: usize,
    dropped: Arc<AtomicU64>,
}

impl RedisBroker {
    /// Connects to Redis.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., redis://localhost:6379)
    /// * `buffer` - payloads buffered per subscription
    pub async fn connect(url: &str, buffer: usize) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;

        info!(url = %url, "Connected to Redis for pub/sub");

        Ok(Self {
            client,
            conn,
            buffer: buffer.max(1),
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Messages dropped because a subscription's buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn subscribe(&self, topic: &str) -> Result<Subscription> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(topic).await?;

        let (tx, rx) = mpsc::channel(self.buffer);
        let dropped = self.dropped.clone();
        let released = CancellationToken::new();
        let stop = released.clone();
        let name = topic.to_string();

        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    msg = messages.next() => match msg {
                        Some(msg) => {
                            let payload = Bytes::copy_from_slice(msg.get_payload_bytes());
                            match tx.try_send(payload) {
                                Ok(()) => {}
                                Err(TrySendError::Full(_)) => {
                                    dropped.fetch_add(1, Ordering::Relaxed);
                                    warn!(topic = %name, "subscription buffer full, dropping message");
                                }
                                Err(TrySendError::Closed(_)) => break,
                            }
                        }
                        None => {
                            debug!(topic = %name, "redis closed the pub/sub stream");
                            break;
                        }
                    }
                }
            }
            // dropping the stream closes the dedicated connection
        });

        Ok(Subscription::new(topic, rx).on_release(move || released.cancel()))
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<usize> {
        let mut conn = self.conn.clone();
        let receivers: usize = conn.publish(topic, payload.as_ref()).await?;
        Ok(receivers)
    }
}
