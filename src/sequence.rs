//! Per-peer sequence bookkeeping

use crate::protocol::{Packet, PacketId, SeqNum};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

/// Role of an endpoint. Decides which start sequence each side of a
/// stream uses, so either side can tell its own stream from the peer's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Bound ephemerally, pinned to one remote
    Client,
    /// Bound to a fixed address, conversing with many peers
    Server,
}

/// Sequence record for one known peer.
///
/// Created lazily on first send to or receive from the peer, destroyed
/// on RST (emitted or received), recreated on the next interaction.
#[derive(Debug)]
pub struct SequenceRecord {
    /// The peer this record tracks
    pub endpoint: SocketAddr,
    /// Next outbound sequence number
    pub local: SeqNum,
    /// Next expected inbound sequence number
    pub remote: SeqNum,
    /// Next user-message id for fragmentation
    pub packet_id: PacketId,
    /// Sequence numbers already consumed by multi-packet reassembly
    pub skipped: HashSet<SeqNum>,
    /// Partial fragment sets awaiting completion, keyed by message id
    pub fragments: HashMap<PacketId, Vec<Packet>>,
}

impl SequenceRecord {
    /// Create a record with role-appropriate start sequences. The local
    /// stream starts at `local_start`; the peer's stream is expected to
    /// start at `remote_start`.
    pub fn new(endpoint: SocketAddr, local_start: SeqNum, remote_start: SeqNum) -> Self {
        Self {
            endpoint,
            local: local_start,
            remote: remote_start,
            packet_id: 0,
            skipped: HashSet::new(),
            fragments: HashMap::new(),
        }
    }

    /// Take the next outbound sequence number
    pub fn next_seq(&mut self) -> SeqNum {
        let seq = self.local;
        self.local += 1;
        seq
    }

    /// Take the next user-message id, wrapping to 0 past `limit`
    pub fn next_packet_id(&mut self, limit: PacketId) -> PacketId {
        let id = self.packet_id;
        self.packet_id += 1;
        if self.packet_id > limit {
            self.packet_id = 0;
        }
        id
    }
}
