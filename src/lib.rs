//! # rudp-tokio — Reliable UDP Transport
//!
//! A connection-oriented, sequenced, acknowledged datagram transport
//! layered on UDP, built on Tokio. Delivery is best-effort plus
//! retransmission-on-reset, reception is strictly in order, and payloads
//! above the MTU threshold are fragmented and reassembled transparently.
//!
//! ## Features
//!
//! - **Async-First Design**: worker loops and socket I/O on tokio tasks
//! - **Connection-Oriented**: SYN handshake, reset protocol, keep-alives
//! - **Ordered Delivery**: per-peer sequence streams, at-most-once dispatch
//! - **Fragmentation**: large payloads split and reassembled by message id
//! - **Observability**: integrated tracing and per-endpoint counters
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rudp_tokio::{RudpClient, RudpConfig, RudpEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let addr = "127.0.0.1:8080".parse()?;
//!     let mut client = RudpClient::connect(addr, RudpConfig::default()).await?;
//!     let mut events = client.take_events().unwrap();
//!
//!     client.send("Hello, RUDP!").await?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let RudpEvent::PacketReceived(packet) = event {
//!             println!("received: {:?}", packet.data);
//!             break;
//!         }
//!     }
//!
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │   High-Level API    │  RudpClient, RudpServer
//! ├─────────────────────┤
//! │   Protocol Core     │  RudpEngine: send/recv pipelines,
//! │                     │  sequencing, reassembly, reset FSM
//! ├─────────────────────┤
//! │   Wire Layer        │  Packet codec, magic framing
//! ├─────────────────────┤
//! │   Transport Layer   │  Transport trait, UDP socket
//! └─────────────────────┘
//! ```

pub mod endpoint;
pub use endpoint::{ConnectionState, RudpClient, RudpEngine, RudpEvent, RudpServer};

// Transport abstraction
pub mod transport;
pub use transport::{Transport, UdpTransport};

// Wire protocol and per-peer state
pub mod protocol;
pub mod sequence;
pub use protocol::{Packet, PacketFlags, PacketKind};
pub use sequence::Role;

// Common types and utilities
pub mod config;
pub mod error;
pub mod stats;

// Re-exports
pub use config::RudpConfig;
pub use error::{ConnectionError, Result, RudpError};
pub use stats::StatsSnapshot;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PROTOCOL_VERSION: u32 = 1;
