//! WebSocket transport
//!
//! This file adapts WebSocket connections to the hub. Responsibilities:
//! - Accept TCP/WebSocket connections until the server is told to stop
//! - Require a `hello` frame naming the connection's identity, then
//!   register a `Client` with the `Hub` and acknowledge with `connected`
//! - Drain the client's outbound queue onto the socket, sending a
//!   `keepalive` frame whenever the connection has been idle for the
//!   configured interval
//! - Forward `publish` frames to the broker
//! - Unregister the client however the connection ends
//!
//! Authentication is expected to happen in front of this listener; the
//! `hello` frame is trusted as-is.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Instant, interval_at, timeout};
use tokio_tungstenite::{WebSocketStream, accept_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::Broker;
use crate::client::{Client, ClientIdentity};
use crate::config::{HubSettings, validate_hub};
use crate::hub::Hub;
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::{HubError, Result};

type WsSender = SplitSink<WebSocketStream<TcpStream>, WsMessage>;
type WsReceiver = SplitStream<WebSocketStream<TcpStream>>;

/// Everything a connection task needs, shared by all of them.
#[derive(Clone)]
struct ConnectionContext {
    hub: Hub,
    broker: Arc<dyn Broker>,
    keepalive: Duration,
    handshake_timeout: Duration,
}

pub async fn bind(addr: &str) -> Result<TcpListener> {
    Ok(TcpListener::bind(addr).await?)
}

/// Serves WebSocket connections from `listener` until `shutdown` is
/// cancelled. Connections already open keep running until their client is
/// unregistered; `Hub::shutdown` ends them all.
///
/// Fails up front if `settings` has a zero keep-alive or handshake timeout.
pub async fn start_websocket_server(
    listener: TcpListener,
    hub: Hub,
    broker: Arc<dyn Broker>,
    settings: HubSettings,
    shutdown: CancellationToken,
) -> Result<()> {
    validate_hub(&settings)?;
    let addr = listener.local_addr()?;
    info!("WebSocket server listening on ws://{addr}");

    let context = ConnectionContext {
        hub,
        broker,
        keepalive: Duration::from_secs(settings.keepalive_secs),
        handshake_timeout: Duration::from_secs(settings.handshake_timeout_secs),
    };

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(%err, "failed to accept connection");
                    continue;
                }
            },
        };

        let context = context.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, peer, context).await {
                debug!(%peer, %err, "connection ended with error");
            }
        });
    }

    info!("WebSocket server on ws://{addr} stopped accepting connections");
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    context: ConnectionContext,
) -> Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let identity = match timeout(context.handshake_timeout, read_hello(&mut ws_receiver)).await {
        Ok(Ok(identity)) => identity,
        Ok(Err(err)) => {
            send_frame(&mut ws_sender, &ServerMessage::error(err.to_string())).await?;
            return Err(err);
        }
        Err(_) => {
            send_frame(&mut ws_sender, &ServerMessage::error("handshake timed out")).await?;
            return Err(HubError::Protocol(format!("{peer} did not say hello in time")));
        }
    };

    let client = match context.hub.register_client(identity) {
        Ok(client) => client,
        Err(err) => {
            send_frame(&mut ws_sender, &ServerMessage::error(err.to_string())).await?;
            return Err(err);
        }
    };
    debug!(%peer, client_id = %client.id(), "connection identified");

    let result = pump(&context, &client, &mut ws_sender, &mut ws_receiver).await;

    context.hub.unregister_client(&client);
    let _ = ws_sender.close().await;
    debug!(%peer, client_id = %client.id(), "connection closed");
    result
}

/// Waits for the `hello` frame and turns it into an identity.
async fn read_hello(ws_receiver: &mut WsReceiver) -> Result<ClientIdentity> {
    while let Some(msg) = ws_receiver.next().await {
        match msg? {
            WsMessage::Text(text) => {
                return match serde_json::from_str::<ClientMessage>(text.as_str())? {
                    ClientMessage::Hello {
                        primary_id,
                        group_id,
                    } => ClientIdentity::new(primary_id, group_id),
                    _ => Err(HubError::Protocol("expected hello frame".to_string())),
                };
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }
    Err(HubError::Protocol("closed before hello".to_string()))
}

/// Moves frames in both directions until the connection or the client's
/// lifetime ends.
async fn pump(
    context: &ConnectionContext,
    client: &Client,
    ws_sender: &mut WsSender,
    ws_receiver: &mut WsReceiver,
) -> Result<()> {
    let Some(mut outbound) = client.take_outbound() else {
        return Err(HubError::Protocol("outbound queue already taken".to_string()));
    };

    send_frame(
        ws_sender,
        &ServerMessage::Connected {
            client_id: client.id().to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        },
    )
    .await?;

    let lifetime = client.lifetime().clone();
    let mut keepalive = interval_at(Instant::now() + context.keepalive, context.keepalive);

    loop {
        tokio::select! {
            _ = lifetime.cancelled() => {
                debug!(client_id = %client.id(), "client lifetime ended");
                break;
            }
            queued = outbound.recv() => {
                let Some(payload) = queued else { break };
                ws_sender.send(payload_frame(payload)).await?;
                keepalive.reset();
            }
            _ = keepalive.tick() => {
                send_frame(ws_sender, &ServerMessage::keepalive()).await?;
            }
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    handle_client_frame(context, ws_sender, text.as_str()).await?;
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err.into()),
            },
        }
    }
    Ok(())
}

async fn handle_client_frame(
    context: &ConnectionContext,
    ws_sender: &mut WsSender,
    text: &str,
) -> Result<()> {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Publish {
            topic,
            notification,
        }) => {
            match context.broker.publish(&topic, notification.to_bytes()?).await {
                Ok(receivers) => {
                    debug!(topic = %topic, receivers, "published notification");
                    send_frame(ws_sender, &ServerMessage::Published { topic, receivers }).await
                }
                Err(err) => {
                    warn!(topic = %topic, %err, "publish failed");
                    send_frame(ws_sender, &ServerMessage::error(err.to_string())).await
                }
            }
        }
        Ok(ClientMessage::Hello { .. }) => {
            send_frame(ws_sender, &ServerMessage::error("already identified")).await
        }
        Err(err) => {
            warn!(
                %err,
                frame = %text.chars().take(100).collect::<String>(),
                "invalid client frame"
            );
            send_frame(ws_sender, &ServerMessage::error(err.to_string())).await
        }
    }
}

/// Notifications go out untouched: as text when they are UTF-8, binary
/// otherwise.
fn payload_frame(payload: Bytes) -> WsMessage {
    match String::from_utf8(payload.to_vec()) {
        Ok(text) => WsMessage::text(text),
        Err(_) => WsMessage::binary(payload),
    }
}

async fn send_frame(ws_sender: &mut WsSender, msg: &ServerMessage) -> Result<()> {
    let text = serde_json::to_string(msg)?;
    ws_sender.send(WsMessage::text(text)).await?;
    Ok(())
}
