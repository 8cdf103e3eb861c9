//! The `error` module defines the error type returned by the fallible parts
//! of the hub: registration preconditions, broker setup, configuration
//! loading and the WebSocket transport.
//!
//! Steady-state delivery failures (slow consumers, malformed payloads,
//! broker disconnects) never surface here; the bridge handles them locally.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("invalid client identity: {0}")]
    InvalidIdentity(String),

    #[error("hub has been shut down")]
    ShutDown,

    #[error("broker error: {0}")]
    Broker(String),

    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, HubError>;
