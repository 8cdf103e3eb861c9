//! Notification envelope
//!
//! Producers publish JSON objects of the form
//! `{"type": "...", "data": ..., "timestamp": ...}`. The hub never rewrites
//! them: bridges only parse far enough to reject payloads that are not an
//! envelope at all, then forward the original bytes.
//!
//! - `type`: event name, e.g. `story_updated`
//! - `data`: event body, any JSON value (defaults to `null`)
//! - `timestamp`: milliseconds since UNIX epoch, optional

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Notification {
    /// Creates an envelope stamped with the current time.
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: Some(chrono::Utc::now().timestamp_millis()),
        }
    }

    /// Parses `payload` as an envelope. Anything but a JSON object, or an
    /// object with an empty `type`, is rejected.
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        // derived Deserialize would also take a sequence in field order
        let value: Value = serde_json::from_slice(payload)?;
        if !value.is_object() {
            return Err(serde::de::Error::custom("notification is not a JSON object"));
        }
        let notification: Self = serde_json::from_value(value)?;
        if notification.kind.trim().is_empty() {
            return Err(serde::de::Error::custom("notification type is empty"));
        }
        Ok(notification)
    }

    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}
