//! CLI for fanout
//!
//! Subcommands:
//! - `serve`: run the hub behind its WebSocket listener
//! - `publish`: connect as a client and publish one notification (useful
//!   for smoke tests)

use std::time::Duration;

use clap::Parser;
use fanout::broker;
use fanout::config::{load_config, load_config_from};
use fanout::hub::Hub;
use fanout::transport::{ClientMessage, ServerMessage, bind, start_websocket_server};
use fanout::utils::{HubError, Result, logging};
use fanout::Notification;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long bridges get to wind down after shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "fanout")]
enum Command {
    /// Start the hub and its WebSocket server
    Serve {
        /// Configuration file to read instead of config/default
        #[arg(long)]
        config: Option<String>,
    },
    /// Connect, identify and publish one notification
    Publish {
        /// WebSocket server URL to connect to
        #[arg(long, default_value = "ws://127.0.0.1:8080")]
        url: String,
        #[arg(long, default_value = "cli")]
        primary_id: String,
        #[arg(long, default_value = "cli")]
        group_id: String,
        /// Broker topic, e.g. workspace:W1
        #[arg(long)]
        topic: String,
        /// Notification type
        #[arg(long = "type")]
        kind: String,
        /// Notification data as JSON
        #[arg(long, default_value = "null")]
        data: String,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let result = match Command::parse() {
        Command::Serve { config } => run_server(config.as_deref()).await,
        Command::Publish {
            url,
            primary_id,
            group_id,
            topic,
            kind,
            data,
        } => {
            logging::init("info");
            run_client(&url, primary_id, group_id, topic, kind, &data).await
        }
    };

    if let Err(e) = result {
        error!("fanout failed: {e}");
        std::process::exit(1);
    }
}

async fn run_server(config_path: Option<&str>) -> Result<()> {
    let settings = match config_path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    logging::init(&settings.log.level);

    let broker = broker::connect(&settings.broker).await?;
    let hub = Hub::new(broker.clone(), &settings.hub);
    let listener = bind(&format!("{}:{}", settings.server.host, settings.server.port)).await?;
    let stop_accepting = CancellationToken::new();

    let mut server = tokio::spawn(start_websocket_server(
        listener,
        hub.clone(),
        broker,
        settings.hub.clone(),
        stop_accepting.clone(),
    ));

    let outcome = tokio::select! {
        joined = &mut server => {
            error!("WebSocket server exited unexpectedly.");
            match joined {
                Ok(result) => result,
                Err(e) => Err(HubError::Protocol(format!("server task failed: {e}"))),
            }
        }
        signal = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
            signal.map_err(HubError::from)
        }
    };

    stop_accepting.cancel();
    hub.shutdown();
    if tokio::time::timeout(SHUTDOWN_GRACE, hub.wait_for_bridges())
        .await
        .is_err()
    {
        warn!(
            remaining = hub.active_bridges(),
            "bridges still running after shutdown grace period"
        );
    }

    outcome
}

async fn run_client(
    url: &str,
    primary_id: String,
    group_id: String,
    topic: String,
    kind: String,
    data: &str,
) -> Result<()> {
    let data: serde_json::Value = serde_json::from_str(data)?;
    let (mut ws_stream, _response) = connect_async(url).await?;

    // 1. Identify
    let hello = ClientMessage::Hello {
        primary_id,
        group_id,
    };
    ws_stream
        .send(WsMessage::Text(serde_json::to_string(&hello)?.into()))
        .await?;

    // 2. Publish
    let publish = ClientMessage::Publish {
        topic,
        notification: Notification::new(kind, data),
    };
    ws_stream
        .send(WsMessage::Text(serde_json::to_string(&publish)?.into()))
        .await?;

    // 3. Print frames until the publish is acknowledged or refused
    while let Some(msg) = ws_stream.next().await {
        let WsMessage::Text(text) = msg? else {
            continue;
        };
        println!("{text}");
        match serde_json::from_str::<ServerMessage>(text.as_str()) {
            Ok(ServerMessage::Published { .. }) => break,
            Ok(ServerMessage::Error { message }) => return Err(HubError::Protocol(message)),
            _ => {}
        }
    }

    ws_stream.close(None).await?;
    Ok(())
}
