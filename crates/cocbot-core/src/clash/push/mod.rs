//! Real-time update channel for a single session.

mod codec;
mod socketio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{error::PushError, wire::ClashPush};

pub use socketio::SocketIoChannel;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PushEvent {
    /// The namespace acknowledged the connection. `reconnect` is set on every
    /// acknowledgement after the first.
    Connected { reconnect: bool },
    Clash(ClashPush),
    Disconnected(DisconnectReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The socket died underneath us (error, close frame, missed pings, or
    /// reconnects exhausted). Terminal.
    ConnectionLost,
    /// The server closed the namespace; the channel tries to reconnect.
    ServerClosed,
    /// We asked for the close.
    ClientClosed,
}

/// Outbound half of a live connection.
pub trait PushLink: Send + Sync {
    /// Fire-and-forget emit; dropped while the channel is not connected.
    fn emit(&self, event: &str, payload: Value);

    /// Request a client close. Safe to call more than once.
    fn close(&self);
}

pub struct PushConnection {
    pub events: mpsc::Receiver<PushEvent>,
    pub link: Box<dyn PushLink>,
}

impl std::fmt::Debug for PushConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushConnection").finish_non_exhaustive()
    }
}

/// Factory for push connections; one connection per session.
#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn connect(&self) -> Result<PushConnection, PushError>;
}

/// Room a session joins to receive its lobby's updates.
pub fn lobby_group(handle: &str) -> String {
    format!("clashLobby_{handle}")
}
