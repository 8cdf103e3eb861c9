//! The `client` module defines the representation of a connection in the
//! fan-out hub.
//!
//! It provides [`ClientIdentity`], the immutable pair a connection is routed
//! by, and [`Client`], which holds the per-connection outbound queue and
//! lifetime.

pub mod identity;
pub mod pubsub_client;

pub use identity::ClientIdentity;
pub use pubsub_client::{Client, ClientId, ClientStats, EnqueueError};

#[cfg(test)]
mod tests;
