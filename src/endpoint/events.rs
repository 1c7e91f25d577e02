//! User-facing endpoint events

use crate::protocol::Packet;
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// Events surfaced to the application.
///
/// Delivered on an unbounded channel; take the receiver with
/// [`RudpClient::take_events`](crate::RudpClient::take_events) or
/// [`RudpServer::take_events`](crate::RudpServer::take_events).
#[derive(Debug, Clone)]
pub enum RudpEvent {
    /// Client side: the handshake completed and the connection is open
    Connected(SocketAddr),
    /// Server side: a new client completed its SYN
    ClientConnected(SocketAddr),
    /// Server side: a client was reset and removed
    ClientDisconnected(SocketAddr),
    /// An in-order packet (or a fully reassembled message) arrived
    PacketReceived(Packet),
}

/// Sending half used by the engine
pub type EventSender = mpsc::UnboundedSender<RudpEvent>;

/// Receiving half handed to the application
pub type EventReceiver = mpsc::UnboundedReceiver<RudpEvent>;

/// Create the event channel pair
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
