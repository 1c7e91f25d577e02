//! Per-endpoint traffic counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Traffic counters for one endpoint, shared between the worker loops
/// and the public API.
#[derive(Debug, Default)]
pub struct EndpointStats {
    /// Total packets transmitted
    pub packets_sent: AtomicU64,
    /// Total packets accepted off the wire
    pub packets_received: AtomicU64,
    /// Total payload bytes transmitted
    pub bytes_sent: AtomicU64,
    /// Total payload bytes accepted
    pub bytes_received: AtomicU64,
    /// Packets re-enqueued after a connection reset
    pub retransmissions: AtomicU64,
    /// Connection resets observed (emitted or received)
    pub resets: AtomicU64,
    /// Datagrams dropped at the decode gate
    pub decode_failures: AtomicU64,
    /// Messages handed to the user (reassembled messages count once)
    pub messages_dispatched: AtomicU64,
}

impl EndpointStats {
    /// Record one transmitted packet of `bytes` payload
    pub fn record_sent(&self, bytes: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record one accepted packet of `bytes` payload
    pub fn record_received(&self, bytes: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a packet queued for retransmission
    pub fn record_retransmission(&self) {
        self.retransmissions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection reset
    pub fn record_reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a datagram dropped at the decode gate
    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a message dispatched to the user
    pub fn record_dispatch(&self) {
        self.messages_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current counters as a plain snapshot
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            retransmissions: self.retransmissions.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            messages_dispatched: self.messages_dispatched.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of endpoint counters at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub retransmissions: u64,
    pub resets: u64,
    pub decode_failures: u64,
    pub messages_dispatched: u64,
}
