//! The `transport` module connects WebSocket clients to the hub.
//!
//! It defines the small framing protocol spoken with clients and the server
//! loop that registers each connection with the hub, drains its outbound
//! queue onto the socket and unregisters it on disconnect.

pub mod message;
pub mod websocket;

pub use message::{ClientMessage, ServerMessage};
pub use websocket::{bind, start_websocket_server};

#[cfg(test)]
mod tests;
#[cfg(test)]
mod websocket_tests;
