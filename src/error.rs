//! Error types for the RUDP transport

use std::fmt;
use thiserror::Error;

/// Result type for RUDP operations
pub type Result<T> = std::result::Result<T, RudpError>;

/// Error types for RUDP operations
#[derive(Error, Debug)]
pub enum RudpError {
    /// I/O related errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire-level errors: bad frame prefix, truncated or malformed body
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Connection-related errors
    #[error("connection error: {kind}")]
    Connection { kind: ConnectionError },

    /// Configuration errors
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Internal errors that shouldn't normally occur
    #[error("internal error: {message}")]
    Internal { message: String },
}

/// Specific connection error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionError {
    /// Endpoint already shut down
    Closed,
    /// Connection reset by peer
    Reset,
    /// Operation requires an established connection
    NotConnected,
    /// Peer is not a known client
    UnknownPeer,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::Closed => write!(f, "endpoint closed"),
            ConnectionError::Reset => write!(f, "connection reset by peer"),
            ConnectionError::NotConnected => write!(f, "not connected"),
            ConnectionError::UnknownPeer => write!(f, "unknown peer"),
        }
    }
}

impl RudpError {
    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        RudpError::Protocol {
            message: message.into(),
        }
    }

    /// Create a connection error
    pub fn connection(kind: ConnectionError) -> Self {
        RudpError::Connection { kind }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        RudpError::Config {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        RudpError::Internal {
            message: message.into(),
        }
    }

    /// Check if this is a recoverable error. The worker loops keep running
    /// when a single datagram fails to decode or a single send fails.
    pub fn is_recoverable(&self) -> bool {
        match self {
            RudpError::Io(e) => {
                matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::Interrupted
                )
            }
            RudpError::Protocol { .. } => true,
            RudpError::Connection { kind } => {
                matches!(kind, ConnectionError::Reset | ConnectionError::UnknownPeer)
            }
            _ => false,
        }
    }

    /// Check if this error indicates the endpoint is closed
    pub fn is_closed(&self) -> bool {
        match self {
            RudpError::Connection { kind } => {
                matches!(kind, ConnectionError::Closed | ConnectionError::Reset)
            }
            RudpError::Io(e) => {
                matches!(
                    e.kind(),
                    std::io::ErrorKind::BrokenPipe
                        | std::io::ErrorKind::ConnectionAborted
                        | std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::UnexpectedEof
                )
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(RudpError::protocol("bad frame").is_recoverable());
        assert!(!RudpError::config("bad mtu").is_recoverable());
        assert!(RudpError::connection(ConnectionError::Closed).is_closed());
        assert!(!RudpError::connection(ConnectionError::UnknownPeer).is_closed());
    }
}
