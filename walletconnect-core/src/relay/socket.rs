use async_trait::async_trait;
use tokio::sync::broadcast;

use super::RelayError;

/// Events emitted by a relay socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketEvent {
    /// Connection (re-)established.
    Connected,
    /// Connection lost or closed.
    Disconnected,
    /// A text frame from the relay.
    Message(String),
}

/// WebSocket connection to the relay, supplied by the host.
///
/// Implementations reconnect on their own after network changes and emit
/// [`SocketEvent::Connected`] each time; the relay client re-subscribes its
/// topics when it sees that event.
#[async_trait]
pub trait RelaySocket: Send + Sync {
    async fn connect(&self) -> Result<(), RelayError>;

    async fn disconnect(&self) -> Result<(), RelayError>;

    /// Write one text frame.
    async fn send(&self, text: String) -> Result<(), RelayError>;

    /// Subscribe to socket events.
    fn events(&self) -> broadcast::Receiver<SocketEvent>;

    fn is_connected(&self) -> bool;
}
