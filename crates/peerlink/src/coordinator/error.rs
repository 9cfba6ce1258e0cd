//! Coordinator error types.

use std::time::Duration;

use libp2p::PeerId;
use thiserror::Error;

use crate::registry::ConnectionState;

/// Why a connect request did not start a dial
///
/// Everything except `Internal` is an informational, expected outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("a dial to {peer_id} is already in progress (attempt {attempt})")]
    AlreadyConnecting { peer_id: PeerId, attempt: u64 },

    #[error("already connected to {peer_id}")]
    AlreadyConnected { peer_id: PeerId },

    #[error("no known addresses for {peer_id}")]
    UnknownPeer { peer_id: PeerId },

    #[error("{peer_id} is still disconnecting")]
    Disconnecting { peer_id: PeerId },

    #[error("retry for {peer_id} is backing off for another {remaining:?}")]
    BackingOff { peer_id: PeerId, remaining: Duration },

    #[error("{peer_id} disconnected recently, cooling down for another {remaining:?}")]
    CoolingDown { peer_id: PeerId, remaining: Duration },

    #[error("state of {peer_id} kept changing under the request")]
    Contended { peer_id: PeerId },

    #[error(transparent)]
    Internal(#[from] CoordinatorError),
}

impl ConnectError {
    /// Stable machine-readable code, used on the wire
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyConnecting { .. } => "already_connecting",
            Self::AlreadyConnected { .. } => "already_connected",
            Self::UnknownPeer { .. } => "unknown_peer",
            Self::Disconnecting { .. } => "disconnecting",
            Self::BackingOff { .. } => "backing_off",
            Self::CoolingDown { .. } => "cooling_down",
            Self::Contended { .. } => "contended",
            Self::Internal(_) => "internal_error",
        }
    }

    /// The existing state a no-op request reports, if this is a dedup no-op
    pub fn existing_state(&self) -> Option<ConnectionState> {
        match self {
            Self::AlreadyConnecting { .. } => Some(ConnectionState::Dialing),
            Self::AlreadyConnected { .. } => Some(ConnectionState::Connected),
            _ => None,
        }
    }
}

/// Failures that indicate a bug rather than a network condition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    #[error("invariant violated for {peer_id}: {detail}")]
    Invariant { peer_id: PeerId, detail: String },

    #[error("state of {peer_id} kept changing under the request")]
    Contended { peer_id: PeerId },
}

/// What a disconnect request did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// Nothing to do; the peer held no connection
    NotConnected,
    /// Another teardown was already running
    AlreadyDisconnecting,
    /// An in-flight dial was abandoned and recorded as failed
    DialCancelled,
    /// The active connection was closed
    Closed,
}

impl DisconnectOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotConnected => "not_connected",
            Self::AlreadyDisconnecting => "already_disconnecting",
            Self::DialCancelled => "dial_cancelled",
            Self::Closed => "closed",
        }
    }
}
