//! Dial outcome reporting toward the front-end collaborator
//!
//! The front-end proxy hands the bridge a one-shot sender per accepted
//! connection; the bridge delivers exactly one outcome on it once the
//! peer reports how the remote dial went.

use std::net::SocketAddr;
use tokio::sync::oneshot;

/// Result of the remote dial for a locally-initiated stream.
///
/// Failures are coarse categories the front-end can translate into its
/// own reply codes; the peer's full error text is only logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialOutcome {
    /// The peer dialed the destination; `bound_addr` is the local
    /// address the peer's outbound socket is bound to.
    Success { bound_addr: SocketAddr },
    ConnectionRefused,
    NetworkUnreachable,
    HostUnreachable,
}

impl DialOutcome {
    /// Categorize a peer-reported dial error message by substring, the
    /// way SOCKS-style front-ends expect.
    pub fn from_error_text(message: &str) -> Self {
        if message.contains("refused") {
            DialOutcome::ConnectionRefused
        } else if message.contains("network is unreachable") {
            DialOutcome::NetworkUnreachable
        } else {
            DialOutcome::HostUnreachable
        }
    }
}

/// Sender half handed to the bridge per locally-initiated connection.
pub type DialReplySender = oneshot::Sender<DialOutcome>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refused_categorization() {
        assert_eq!(
            DialOutcome::from_error_text("dial tcp 10.0.0.1:81: connect: connection refused"),
            DialOutcome::ConnectionRefused
        );
        assert_eq!(
            DialOutcome::from_error_text("Connection refused (os error 111)"),
            DialOutcome::ConnectionRefused
        );
    }

    #[test]
    fn test_network_unreachable_categorization() {
        assert_eq!(
            DialOutcome::from_error_text("connect: network is unreachable"),
            DialOutcome::NetworkUnreachable
        );
    }

    #[test]
    fn test_everything_else_is_host_unreachable() {
        assert_eq!(
            DialOutcome::from_error_text("no route to host"),
            DialOutcome::HostUnreachable
        );
        assert_eq!(
            DialOutcome::from_error_text(""),
            DialOutcome::HostUnreachable
        );
    }
}
