//! # fanout
//!
//! `fanout` is a real-time event fan-out hub. It bridges a topic-based
//! publish/subscribe broker to many long-lived client connections, giving
//! every connection two independent streams: messages addressed to its
//! primary identity and messages broadcast to its group.
//!
//! Delivery is best effort and at most once. Each connection has a bounded
//! outbound queue; a consumer that cannot keep up has messages dropped after
//! a bounded wait instead of slowing the broker or anyone else.
//!
//! ## Core Modules
//!
//! - `broker`: the pub/sub seam, an in-memory broker and (feature `redis`)
//!   a Redis Pub/Sub backend.
//! - `client`: a registered connection, its identity and outbound queue.
//! - `hub`: the registry of live clients, the per-topic bridge tasks and
//!   shutdown.
//! - `transport`: a WebSocket adapter that registers connections with the hub.
//! - `config`: loading server configuration.
//! - `utils`: error type and logging.

pub mod broker;
pub mod client;
pub mod config;
pub mod hub;
pub mod transport;
pub mod utils;

pub use broker::{Broker, MemoryBroker, Notification, TopicScheme};
pub use client::{Client, ClientIdentity};
pub use hub::Hub;
pub use utils::{HubError, Result};
