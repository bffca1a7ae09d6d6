//! WebSocket Conversation Transport
//!
//! - `protocol`: the JSON message format between the peer and the server.
//! - `bridge`: collaborator implementations that write to the socket.
//! - `session`: the connection lifecycle, from upgrade to shutdown.

pub mod bridge;
pub mod protocol;
pub mod session;

pub use session::ws_handler;
