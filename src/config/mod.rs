mod settings;

use crate::config::settings::PartialSettings;
use crate::utils::{HubError, Result};
use config::{Config, ConfigError, Environment, File};

pub use settings::{
    BrokerBackend, BrokerSettings, HubSettings, LogSettings, ServerSettings, Settings,
};

/// Loads the configuration from `config/default` (any supported format, optional)
/// and `FANOUT__*` environment variables, merged over the default values.
pub fn load_config() -> Result<Settings> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(env_source());

    finish(builder.build()?)
}

/// Like [`load_config`], but reads the given file, which must exist.
pub fn load_config_from(path: &str) -> Result<Settings> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(true))
        .add_source(env_source());

    finish(builder.build()?)
}

fn env_source() -> Environment {
    Environment::with_prefix("FANOUT")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

fn finish(config: Config) -> Result<Settings> {
    // Try to deserialize what is available, then merge with defaults
    let partial: PartialSettings = config.try_deserialize()?;
    let settings = partial.merge(Settings::default());
    validate(&settings)?;
    Ok(settings)
}

/// Rejects settings the hub cannot run with.
pub fn validate(settings: &Settings) -> Result<()> {
    validate_hub(&settings.hub)?;
    if settings.broker.subscription_buffer == 0 {
        return invalid("broker.subscription_buffer must be greater than zero");
    }
    Ok(())
}

/// Checks the hub and transport section on its own, for callers that build
/// `HubSettings` without going through [`load_config`].
pub fn validate_hub(hub: &HubSettings) -> Result<()> {
    if hub.outbound_capacity == 0 {
        return invalid("hub.outbound_capacity must be greater than zero");
    }
    if hub.send_timeout_ms == 0 {
        return invalid("hub.send_timeout_ms must be greater than zero");
    }
    if hub.keepalive_secs == 0 {
        return invalid("hub.keepalive_secs must be greater than zero");
    }
    if hub.handshake_timeout_secs == 0 {
        return invalid("hub.handshake_timeout_secs must be greater than zero");
    }
    if hub.direct_topic_prefix.is_empty() || hub.group_topic_prefix.is_empty() {
        return invalid("topic prefixes must not be empty");
    }
    if hub.direct_topic_prefix == hub.group_topic_prefix {
        return invalid("direct and group topic prefixes must differ");
    }
    Ok(())
}

fn invalid(msg: &str) -> Result<()> {
    Err(HubError::Config(ConfigError::Message(msg.to_string())))
}
