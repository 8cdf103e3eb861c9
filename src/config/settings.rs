use serde::Deserialize;

use crate::broker::DEFAULT_SUBSCRIPTION_BUFFER;

/// Top-level configuration settings for the application.
///
/// Groups the listener, hub, broker and logging configurations.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub hub: HubSettings,
    pub broker: BrokerSettings,
    pub log: LogSettings,
}

/// Configuration settings for the server.
///
/// Defines the host and port the WebSocket listener binds to.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Configuration settings for the fan-out hub.
#[derive(Debug, Deserialize, Clone)]
pub struct HubSettings {
    /// Capacity of each client's outbound queue.
    pub outbound_capacity: usize,
    /// Bounded wait for an enqueue before the message is dropped.
    pub send_timeout_ms: u64,
    /// Idle keep-alive cadence of the transport.
    pub keepalive_secs: u64,
    /// How long a new connection may take to identify itself.
    pub handshake_timeout_secs: u64,
    pub direct_topic_prefix: String,
    pub group_topic_prefix: String,
}

/// Which pub/sub store the bridges subscribe to.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BrokerBackend {
    Memory,
    Redis,
}

/// Configuration settings for the broker connection.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub backend: BrokerBackend,
    pub url: String,
    /// Payloads buffered per subscription; more are dropped until the
    /// bridge catches up.
    pub subscription_buffer: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Settings as read from sources, any of which may be missing. Missing values are filled from defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub hub: Option<PartialHubSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialHubSettings {
    pub outbound_capacity: Option<usize>,
    pub send_timeout_ms: Option<u64>,
    pub keepalive_secs: Option<u64>,
    pub handshake_timeout_secs: Option<u64>,
    pub direct_topic_prefix: Option<String>,
    pub group_topic_prefix: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub backend: Option<BrokerBackend>,
    pub url: Option<String>,
    pub subscription_buffer: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            send_timeout_ms: 1000,
            keepalive_secs: 25,
            handshake_timeout_secs: 10,
            direct_topic_prefix: "user:".to_string(),
            group_topic_prefix: "workspace:".to_string(),
        }
    }
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            hub: HubSettings::default(),
            broker: BrokerSettings {
                backend: BrokerBackend::Memory,
                url: "redis://127.0.0.1:6379".to_string(),
                subscription_buffer: DEFAULT_SUBSCRIPTION_BUFFER,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl PartialSettings {
    /// Fills every unset field from `default`.
    pub fn merge(self, default: Settings) -> Settings {
        let server = self.server;
        let hub = self.hub;
        let broker = self.broker;
        let log = self.log;

        Settings {
            server: ServerSettings {
                host: server
                    .as_ref()
                    .and_then(|s| s.host.clone())
                    .unwrap_or(default.server.host),
                port: server
                    .as_ref()
                    .and_then(|s| s.port)
                    .unwrap_or(default.server.port),
            },
            hub: HubSettings {
                outbound_capacity: hub
                    .as_ref()
                    .and_then(|h| h.outbound_capacity)
                    .unwrap_or(default.hub.outbound_capacity),
                send_timeout_ms: hub
                    .as_ref()
                    .and_then(|h| h.send_timeout_ms)
                    .unwrap_or(default.hub.send_timeout_ms),
                keepalive_secs: hub
                    .as_ref()
                    .and_then(|h| h.keepalive_secs)
                    .unwrap_or(default.hub.keepalive_secs),
                handshake_timeout_secs: hub
                    .as_ref()
                    .and_then(|h| h.handshake_timeout_secs)
                    .unwrap_or(default.hub.handshake_timeout_secs),
                direct_topic_prefix: hub
                    .as_ref()
                    .and_then(|h| h.direct_topic_prefix.clone())
                    .unwrap_or(default.hub.direct_topic_prefix),
                group_topic_prefix: hub
                    .as_ref()
                    .and_then(|h| h.group_topic_prefix.clone())
                    .unwrap_or(default.hub.group_topic_prefix),
            },
            broker: BrokerSettings {
                backend: broker
                    .as_ref()
                    .and_then(|b| b.backend)
                    .unwrap_or(default.broker.backend),
                url: broker
                    .as_ref()
                    .and_then(|b| b.url.clone())
                    .unwrap_or(default.broker.url),
                subscription_buffer: broker
                    .as_ref()
                    .and_then(|b| b.subscription_buffer)
                    .unwrap_or(default.broker.subscription_buffer),
            },
            log: LogSettings {
                level: log
                    .as_ref()
                    .and_then(|l| l.level.clone())
                    .unwrap_or(default.log.level),
            },
        }
    }
}
