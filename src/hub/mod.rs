//! The `hub` module fans broker messages out to live connections.
//!
//! - `engine`: [`Hub`], the registry owner and shutdown coordinator.
//! - `registry`: live clients grouped by primary identity.
//! - `bridge`: the per-client, per-topic task relaying broker messages into
//!   a client's outbound queue.

mod bridge;
pub mod engine;
mod registry;

pub use bridge::TopicKind;
pub use engine::{Hub, HubStats};
