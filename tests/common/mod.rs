//! Shared test helpers: an in-memory transport and engine-pair plumbing
//!
//! The engine tests drive the pipelines deterministically: `flush` and
//! `process` are called by hand and datagrams move between engines
//! through a captured outbox instead of a socket.

use bytes::Bytes;
use rudp_tokio::endpoint::events::{self, EventReceiver};
use rudp_tokio::transport::{RecvFuture, SendFuture, Transport};
use rudp_tokio::{Packet, Role, RudpConfig, RudpEngine, RudpEvent};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// Captured datagrams: (source, destination, wire bytes)
pub type Outbox = Arc<Mutex<VecDeque<(SocketAddr, SocketAddr, Bytes)>>>;

/// In-memory transport that records every send and never receives;
/// tests inject inbound datagrams via `RudpEngine::handle_datagram`.
pub struct TestTransport {
    local: SocketAddr,
    outbox: Outbox,
}

impl Transport for TestTransport {
    fn send_to<'a>(&'a self, buf: &'a [u8], target: SocketAddr) -> SendFuture<'a> {
        let len = buf.len();
        self.outbox
            .lock()
            .unwrap()
            .push_back((self.local, target, Bytes::copy_from_slice(buf)));
        Box::pin(async move { Ok(len) })
    }

    fn recv_from<'a>(&'a self, _buf: &'a mut [u8]) -> RecvFuture<'a> {
        Box::pin(std::future::pending::<io::Result<(usize, SocketAddr)>>())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }
}

/// One endpoint under test: its engine, event stream and captured wire
pub struct Node {
    pub engine: Arc<RudpEngine>,
    pub events: EventReceiver,
    pub outbox: Outbox,
    pub addr: SocketAddr,
    pub remote: Option<SocketAddr>,
}

impl Node {
    /// Enqueue a data payload for this node's pinned remote
    pub async fn send_data(&self, data: &[u8]) {
        let peer = self.remote.expect("send_data requires a client node");
        self.engine
            .queue(
                peer,
                rudp_tokio::PacketKind::Dat,
                Some(Bytes::copy_from_slice(data)),
            )
            .await
            .unwrap();
    }
}

pub fn node(role: Role, addr: &str, remote: Option<&str>, config: RudpConfig) -> Node {
    let addr: SocketAddr = addr.parse().unwrap();
    let remote: Option<SocketAddr> = remote.map(|r| r.parse().unwrap());
    let outbox: Outbox = Arc::new(Mutex::new(VecDeque::new()));
    let transport = Arc::new(TestTransport {
        local: addr,
        outbox: outbox.clone(),
    });
    let (event_tx, event_rx) = events::channel();
    Node {
        engine: Arc::new(RudpEngine::new(role, config, transport, remote, event_tx)),
        events: event_rx,
        outbox,
        addr,
        remote,
    }
}

/// A client/server pair on fixed test addresses
pub fn pair(config: RudpConfig) -> (Node, Node) {
    let client = node(
        Role::Client,
        "127.0.0.1:4000",
        Some("127.0.0.1:5000"),
        config.clone(),
    );
    let server = node(Role::Server, "127.0.0.1:5000", None, config);
    (client, server)
}

/// Pull everything `from` has put on the wire
pub fn take_wire(from: &Node) -> Vec<(SocketAddr, SocketAddr, Bytes)> {
    from.outbox.lock().unwrap().drain(..).collect()
}

/// Decode captured wire bytes for inspection
pub fn decode_wire(wire: &[(SocketAddr, SocketAddr, Bytes)]) -> Vec<Packet> {
    wire.iter()
        .map(|(_, _, bytes)| Packet::decode(bytes.clone()).expect("captured datagram must decode"))
        .collect()
}

/// Hand captured datagrams to `to` as if they arrived off the socket
pub async fn deliver(to: &Node, wire: Vec<(SocketAddr, SocketAddr, Bytes)>) {
    for (src, dst, bytes) in wire {
        assert_eq!(dst, to.addr, "datagram delivered to the wrong node");
        to.engine.handle_datagram(src, bytes).await;
    }
}

/// Move every pending datagram from one node to the other
pub async fn transfer(from: &Node, to: &Node) {
    let wire = take_wire(from);
    deliver(to, wire).await;
}

/// Drain whatever events have fired so far
pub fn drain_events(node: &mut Node) -> Vec<RudpEvent> {
    let mut events = Vec::new();
    while let Ok(event) = node.events.try_recv() {
        events.push(event);
    }
    events
}

/// Data payloads dispatched so far (reassembled messages included)
pub fn drain_payloads(node: &mut Node) -> Vec<Bytes> {
    drain_events(node)
        .into_iter()
        .filter_map(|event| match event {
            RudpEvent::PacketReceived(packet)
                if packet.kind == rudp_tokio::PacketKind::Dat =>
            {
                Some(packet.data)
            }
            _ => None,
        })
        .collect()
}

/// Run the SYN / SYN|ACK handshake to completion and drain the
/// bootstrap events on both sides.
pub async fn handshake(client: &mut Node, server: &mut Node) {
    client.engine.open(server.addr).await.unwrap();
    client.engine.flush().await.unwrap();
    transfer(client, server).await;
    server.engine.process().await.unwrap();
    server.engine.flush().await.unwrap();
    transfer(server, client).await;
    client.engine.process().await.unwrap();
    // The client acknowledges the handshake packets
    client.engine.flush().await.unwrap();
    transfer(client, server).await;
    server.engine.process().await.unwrap();

    drain_events(client);
    drain_events(server);
}
