//! Error types.

use std::{io, time::Duration};

use remote_console_protocol::ProtocolError;
use thiserror::Error;

/// Failure that ends a connect attempt or a connected phase.
///
/// Always recovered by the reconnect loop; the display text is what the
/// error callback receives.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Connection failed: timed out after {0:?}")]
    Timeout(Duration),
    #[error("Connection failed: {0}")]
    Connect(#[source] io::Error),
    #[error("Send error: {0}")]
    Send(#[source] io::Error),
    #[error("Receive error: {0}")]
    Receive(#[source] io::Error),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Why a command produced no response.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Command is empty")]
    Empty,
    #[error("Command timed out after {0:?}")]
    TimedOut(Duration),
    #[error("Command cancelled by disconnect or shutdown")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(
            ConnectionError::Connect(refused).to_string(),
            "Connection failed: refused"
        );
        assert_eq!(
            ConnectionError::Timeout(Duration::from_secs(10)).to_string(),
            "Connection failed: timed out after 10s"
        );

        let protocol = ProtocolError::LengthMismatch {
            expected: 4,
            actual: 3,
        };
        assert_eq!(
            ConnectionError::from(protocol).to_string(),
            "Protocol error: Payload length mismatch: expected 4, got 3"
        );
    }
}
