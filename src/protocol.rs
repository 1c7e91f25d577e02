//! Wire protocol types and the datagram codec

use crate::error::{Result, RudpError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

/// RUDP protocol constants
pub mod constants {
    /// Frame prefix carried by every datagram
    pub const MAGIC: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];
    /// Base transport unit
    pub const DEFAULT_MTU: u32 = 1500;
    /// Fragmentation threshold as a fraction of the MTU
    pub const PAYLOAD_FACTOR: f64 = 0.80;
    /// Send-loop tick in milliseconds
    pub const DEFAULT_SEND_INTERVAL_MS: u64 = 10;
    /// Recv-loop tick in milliseconds
    pub const DEFAULT_RECV_INTERVAL_MS: u64 = 10;
    /// Wrap point for user-message ids
    pub const DEFAULT_PACKET_ID_LIMIT: u32 = (i32::MAX / 2) as u32;
    /// Server-side forced reset point for sequence numbers
    pub const DEFAULT_SEQUENCE_LIMIT: u32 = (i32::MAX / 2) as u32;
    /// Initial sequence on the client side of a stream
    pub const CLIENT_START_SEQUENCE: u32 = 100;
    /// Initial sequence on the server side of a stream
    pub const SERVER_START_SEQUENCE: u32 = 200;
    /// Packets drained per recv-loop tick
    pub const DEFAULT_RECV_BATCH: usize = 50;
    /// Delay before a client rebuilds its state after a peer reset
    pub const RESET_DELAY_MS: u64 = 1000;
}

/// Sequence number type (per-peer 32-bit counter stream)
pub type SeqNum = u32;

/// User-message identifier, used to group fragments of one logical message
pub type PacketId = u32;

/// Timestamp type (milliseconds since epoch)
pub type Timestamp = u64;

/// Get current timestamp in milliseconds
pub fn current_timestamp() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Timestamp
}

/// Packet kinds carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    /// Connection open request
    Syn = 1,
    /// Pure acknowledgement, no payload
    Ack = 2,
    /// User data
    Dat = 3,
    /// Keep-alive
    Nul = 4,
    /// Connection reset
    Rst = 5,
}

impl PacketKind {
    /// Decode a kind from its wire value
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            1 => Some(PacketKind::Syn),
            2 => Some(PacketKind::Ack),
            3 => Some(PacketKind::Dat),
            4 => Some(PacketKind::Nul),
            5 => Some(PacketKind::Rst),
            _ => None,
        }
    }

    /// Get the kind as a string for debugging
    pub fn as_str(&self) -> &'static str {
        match self {
            PacketKind::Syn => "SYN",
            PacketKind::Ack => "ACK",
            PacketKind::Dat => "DAT",
            PacketKind::Nul => "NUL",
            PacketKind::Rst => "RST",
        }
    }
}

/// Packet flags, orthogonal to the kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFlags(u8);

impl PacketFlags {
    /// No flags set
    pub const NONE: PacketFlags = PacketFlags(0);
    /// Marks SYN|ACK handshake completion
    pub const ACK: PacketFlags = PacketFlags(0b01);
    /// Server sequence-overflow reset marker
    pub const RST: PacketFlags = PacketFlags(0b10);

    /// Check whether all bits of `other` are set
    pub fn contains(self, other: PacketFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`
    pub fn insert(&mut self, other: PacketFlags) {
        self.0 |= other.0;
    }

    /// Raw wire value
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Rebuild from a wire value, masking unknown bits
    pub fn from_wire(value: u8) -> Self {
        PacketFlags(value & 0b11)
    }
}

/// An in-memory protocol packet.
///
/// `src`, `dst`, `received_at` and `confirmed` are local bookkeeping and
/// never serialized; everything else crosses the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Peer the packet came from (stamped on receive)
    pub src: Option<SocketAddr>,
    /// Peer the packet is headed to (stamped on send)
    pub dst: Option<SocketAddr>,
    /// Local receive timestamp in milliseconds, 0 until stamped
    pub received_at: Timestamp,
    /// Whether this packet has been confirmed to the peer
    pub confirmed: bool,

    /// Sequence number in the peer's stream
    pub seq: SeqNum,
    /// User-message id grouping fragments
    pub id: PacketId,
    /// Total fragment count for the message, 0 when not fragmented
    pub qty: u32,
    /// Packet kind
    pub kind: PacketKind,
    /// Packet flags
    pub flags: PacketFlags,
    /// Opaque payload, possibly empty
    pub data: Bytes,
    /// Sequence numbers being acknowledged
    pub ack: Vec<SeqNum>,
}

impl Packet {
    /// Fixed body overhead: kind + flags + seq + id + qty + ack count + data length
    pub const HEADER_SIZE: usize = 1 + 1 + 4 + 4 + 4 + 2 + 4;

    /// Create a control packet of the given kind with no payload
    pub fn control(kind: PacketKind) -> Self {
        Self {
            src: None,
            dst: None,
            received_at: 0,
            confirmed: false,
            seq: 0,
            id: 0,
            qty: 0,
            kind,
            flags: PacketFlags::NONE,
            data: Bytes::new(),
            ack: Vec::new(),
        }
    }

    /// Create a DAT packet carrying `data`
    pub fn dat(data: Bytes) -> Self {
        let mut packet = Self::control(PacketKind::Dat);
        packet.data = data;
        packet
    }

    /// Total encoded size on the wire, including the frame prefix
    pub fn wire_len(&self) -> usize {
        constants::MAGIC.len() + Self::HEADER_SIZE + self.ack.len() * 4 + self.data.len()
    }

    /// Encode into a framed datagram: magic prefix followed by the body.
    ///
    /// The bookkeeping fields (`src`, `dst`, `received_at`, `confirmed`)
    /// are not serialized.
    pub fn encode(&self) -> Result<Bytes> {
        if self.ack.len() > u16::MAX as usize {
            return Err(RudpError::internal("ack list exceeds wire limit"));
        }

        let mut buf = BytesMut::with_capacity(self.wire_len());
        buf.put_slice(&constants::MAGIC);
        buf.put_u8(self.kind as u8);
        buf.put_u8(self.flags.bits());
        buf.put_u32_le(self.seq);
        buf.put_u32_le(self.id);
        buf.put_u32_le(self.qty);
        buf.put_u16_le(self.ack.len() as u16);
        for seq in &self.ack {
            buf.put_u32_le(*seq);
        }
        buf.put_u32_le(self.data.len() as u32);
        buf.extend_from_slice(&self.data);
        Ok(buf.freeze())
    }

    /// Decode a framed datagram. Rejects datagrams without the magic
    /// prefix and truncated or malformed bodies.
    pub fn decode(mut buf: Bytes) -> Result<Self> {
        if buf.len() < constants::MAGIC.len() {
            return Err(RudpError::protocol("datagram shorter than frame prefix"));
        }
        if buf[..constants::MAGIC.len()] != constants::MAGIC {
            return Err(RudpError::protocol("bad frame prefix"));
        }
        buf.advance(constants::MAGIC.len());

        if buf.len() < Self::HEADER_SIZE {
            return Err(RudpError::protocol("truncated packet header"));
        }

        let kind_raw = buf.get_u8();
        let kind = PacketKind::from_wire(kind_raw)
            .ok_or_else(|| RudpError::protocol(format!("unknown packet kind {kind_raw}")))?;
        let flags = PacketFlags::from_wire(buf.get_u8());
        let seq = buf.get_u32_le();
        let id = buf.get_u32_le();
        let qty = buf.get_u32_le();

        let ack_count = buf.get_u16_le() as usize;
        if buf.len() < ack_count * 4 {
            return Err(RudpError::protocol("truncated ack list"));
        }
        let mut ack = Vec::with_capacity(ack_count);
        for _ in 0..ack_count {
            ack.push(buf.get_u32_le());
        }

        if buf.len() < 4 {
            return Err(RudpError::protocol("truncated payload length"));
        }
        let data_len = buf.get_u32_le() as usize;
        if buf.len() != data_len {
            return Err(RudpError::protocol("payload length mismatch"));
        }
        let data = buf;

        Ok(Self {
            src: None,
            dst: None,
            received_at: 0,
            confirmed: false,
            seq,
            id,
            qty,
            kind,
            flags,
            data,
            ack,
        })
    }
}
