use serde::{Deserialize, Serialize};

use crate::broker::Notification;

/// Frames a connected client may send.
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Identifies the connection. Must be the first frame.
    #[serde(rename = "hello")]
    Hello { primary_id: String, group_id: String },

    /// Publishes a notification on a broker topic.
    #[serde(rename = "publish")]
    Publish {
        topic: String,
        notification: Notification,
    },
}

/// Frames the server sends besides forwarded notifications, which go out
/// exactly as they were published.
#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "connected")]
    Connected { client_id: String, timestamp: i64 },
    #[serde(rename = "keepalive")]
    KeepAlive { timestamp: i64 },
    #[serde(rename = "published")]
    Published { topic: String, receivers: usize },
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerMessage {
    pub fn keepalive() -> Self {
        Self::KeepAlive {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
