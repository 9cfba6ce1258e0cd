//! Dial failure classification.
//!
//! Every failure the transport substrate can report is folded into one of a
//! handful of classes so the coordinator and the supervisor can reason about
//! them without knowing which provider produced them.

use thiserror::Error;

/// Why a dial attempt did not produce a connection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DialError {
    /// No response within the configured dial timeout
    #[error("dial timed out")]
    Timeout,

    /// The remote (or a local policy) actively refused the connection
    #[error("connection refused: {0}")]
    Refused(String),

    /// The transport connected but the security or muxer upgrade failed
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// None of the known addresses could be reached
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    /// The attempt was abandoned by a disconnect request
    #[error("dial cancelled")]
    Cancelled,

    /// Anything the provider could not classify
    #[error("transport error: {0}")]
    Other(String),
}

impl DialError {
    /// Stable machine-readable code, used on the wire
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Timeout => "dial_timeout",
            Self::Refused(_) => "dial_refused",
            Self::HandshakeFailed(_) => "handshake_failed",
            Self::Unreachable(_) => "unreachable",
            Self::Cancelled => "cancelled",
            Self::Other(_) => "transport_error",
        }
    }

    /// Whether the failure came from the local side rather than the network
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_are_distinct() {
        let errors = [
            DialError::Timeout,
            DialError::Refused("x".into()),
            DialError::HandshakeFailed("x".into()),
            DialError::Unreachable("x".into()),
            DialError::Cancelled,
            DialError::Other("x".into()),
        ];
        let mut codes: Vec<_> = errors.iter().map(DialError::reason_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_display_is_human_readable() {
        let err = DialError::Refused("port closed".into());
        assert_eq!(err.to_string(), "connection refused: port closed");
        assert!(DialError::Cancelled.is_local());
        assert!(!DialError::Timeout.is_local());
    }
}
