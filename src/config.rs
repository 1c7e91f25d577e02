//! Configuration types for RUDP endpoints

use crate::error::{Result, RudpError};
use crate::protocol::constants;
use std::time::Duration;

/// RUDP configuration builder
#[derive(Debug, Clone)]
pub struct RudpConfig {
    /// Maximum transmission unit
    pub mtu: u32,
    /// Fragmentation threshold; payloads at or above this are split.
    /// `None` derives it as 80% of the MTU.
    pub max_payload: Option<usize>,
    /// Send-loop tick interval
    pub send_interval: Duration,
    /// Recv-loop tick interval
    pub recv_interval: Duration,
    /// Wrap point for user-message ids
    pub packet_id_limit: u32,
    /// Server-side forced reset point for sequence numbers
    pub sequence_limit: u32,
    /// Initial sequence on the client side of a stream
    pub client_start_sequence: u32,
    /// Initial sequence on the server side of a stream
    pub server_start_sequence: u32,
    /// Packets drained per recv-loop tick
    pub recv_batch: usize,
    /// Automatic server keep-alive interval (NUL to every client)
    pub keep_alive: Option<Duration>,
}

impl Default for RudpConfig {
    fn default() -> Self {
        Self {
            mtu: constants::DEFAULT_MTU,
            max_payload: None,
            send_interval: Duration::from_millis(constants::DEFAULT_SEND_INTERVAL_MS),
            recv_interval: Duration::from_millis(constants::DEFAULT_RECV_INTERVAL_MS),
            packet_id_limit: constants::DEFAULT_PACKET_ID_LIMIT,
            sequence_limit: constants::DEFAULT_SEQUENCE_LIMIT,
            client_start_sequence: constants::CLIENT_START_SEQUENCE,
            server_start_sequence: constants::SERVER_START_SEQUENCE,
            recv_batch: constants::DEFAULT_RECV_BATCH,
            keep_alive: None,
        }
    }
}

impl RudpConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set MTU (Maximum Transmission Unit)
    pub fn mtu(mut self, mtu: u32) -> Self {
        self.mtu = mtu;
        self
    }

    /// Set an explicit fragmentation threshold
    pub fn max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = Some(max_payload);
        self
    }

    /// Set the send-loop tick interval
    pub fn send_interval(mut self, interval: Duration) -> Self {
        self.send_interval = interval;
        self
    }

    /// Set the recv-loop tick interval
    pub fn recv_interval(mut self, interval: Duration) -> Self {
        self.recv_interval = interval;
        self
    }

    /// Set the user-message id wrap point
    pub fn packet_id_limit(mut self, limit: u32) -> Self {
        self.packet_id_limit = limit;
        self
    }

    /// Set the server-side sequence reset point
    pub fn sequence_limit(mut self, limit: u32) -> Self {
        self.sequence_limit = limit;
        self
    }

    /// Set both stream start sequences
    pub fn start_sequences(mut self, client: u32, server: u32) -> Self {
        self.client_start_sequence = client;
        self.server_start_sequence = server;
        self
    }

    /// Set the number of packets drained per recv-loop tick
    pub fn recv_batch(mut self, batch: usize) -> Self {
        self.recv_batch = batch;
        self
    }

    /// Set the automatic server keep-alive interval
    pub fn keep_alive(mut self, interval: Option<Duration>) -> Self {
        self.keep_alive = interval;
        self
    }

    /// Effective fragmentation threshold in bytes
    pub fn effective_max_payload(&self) -> usize {
        self.max_payload
            .unwrap_or((self.mtu as f64 * constants::PAYLOAD_FACTOR) as usize)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.mtu < 64 || self.mtu > 65535 {
            return Err(RudpError::config("MTU must be between 64 and 65535"));
        }

        let max_payload = self.effective_max_payload();
        if max_payload == 0 || max_payload > self.mtu as usize {
            return Err(RudpError::config(
                "fragmentation threshold must be between 1 and the MTU",
            ));
        }

        if self.send_interval.is_zero() || self.recv_interval.is_zero() {
            return Err(RudpError::config("loop intervals must be greater than 0"));
        }

        if self.client_start_sequence == self.server_start_sequence {
            return Err(RudpError::config("start sequences must be distinct"));
        }

        if self.sequence_limit <= self.client_start_sequence.max(self.server_start_sequence) {
            return Err(RudpError::config(
                "sequence limit must exceed both start sequences",
            ));
        }

        if self.recv_batch == 0 {
            return Err(RudpError::config("recv batch must be greater than 0"));
        }

        Ok(())
    }
}

/// Preset configurations for common use cases
impl RudpConfig {
    /// Configuration for low-latency links: tighter loop ticks
    pub fn lan() -> Self {
        Self::default()
            .send_interval(Duration::from_millis(5))
            .recv_interval(Duration::from_millis(5))
    }

    /// Configuration for lossy links: smaller datagrams, server
    /// keep-alives to detect dead peers sooner
    pub fn lossy() -> Self {
        Self::default()
            .mtu(1200)
            .keep_alive(Some(Duration::from_secs(5)))
    }
}
