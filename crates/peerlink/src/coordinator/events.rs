//! Lifecycle events produced by the coordinator, and the transport
//! notifications it consumes.

use chrono::{DateTime, Utc};
use libp2p::{Multiaddr, PeerId};

use crate::{
    registry::DiscoveryMethod,
    transport::{ConnectionHandle, DialError, RemoteEvent},
};

/// Who tore a connection down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// A local disconnect request
    Local,
    /// The remote side or the network
    Remote { cause: Option<String> },
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote { .. } => "remote",
        }
    }
}

/// Transition-specific payload of a [`ConnectionEvent`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEventKind {
    PeerDiscovered {
        addresses: Vec<Multiaddr>,
        method: DiscoveryMethod,
    },
    DialStarted {
        attempt: u64,
        addresses: Vec<Multiaddr>,
    },
    ConnectionEstablished {
        attempt: u64,
        remote_addr: Option<Multiaddr>,
        inbound: bool,
    },
    ConnectionFailed {
        attempt: u64,
        error: DialError,
    },
    ConnectionClosed {
        reason: CloseReason,
    },
}

impl ConnectionEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PeerDiscovered { .. } => "peer_discovered",
            Self::DialStarted { .. } => "dial_started",
            Self::ConnectionEstablished { .. } => "connection_established",
            Self::ConnectionFailed { .. } => "connection_failed",
            Self::ConnectionClosed { .. } => "connection_closed",
        }
    }
}

/// An immutable record of one committed lifecycle transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    peer_id: PeerId,
    timestamp: DateTime<Utc>,
    kind: ConnectionEventKind,
}

impl ConnectionEvent {
    pub(crate) fn new(peer_id: PeerId, kind: ConnectionEventKind) -> Self {
        Self { peer_id, timestamp: Utc::now(), kind }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn kind(&self) -> &ConnectionEventKind {
        &self.kind
    }
}

/// Asynchronous notifications funnelled through
/// [`Coordinator::on_transport_event`](super::Coordinator::on_transport_event)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A dial we started produced a connection
    DialSucceeded {
        peer_id: PeerId,
        attempt: u64,
        handle: ConnectionHandle,
    },
    /// A dial we started failed or timed out
    DialFailed {
        peer_id: PeerId,
        attempt: u64,
        error: DialError,
    },
    /// A connection appeared without a dial of ours
    ConnectionOpened { handle: ConnectionHandle, inbound: bool },
    /// A connection went away
    ConnectionClosed {
        handle: ConnectionHandle,
        cause: Option<String>,
    },
}

impl From<RemoteEvent> for TransportEvent {
    fn from(event: RemoteEvent) -> Self {
        match event {
            RemoteEvent::ConnectionOpened { handle, inbound } => {
                Self::ConnectionOpened { handle, inbound }
            },
            RemoteEvent::ConnectionClosed { handle, cause } => {
                Self::ConnectionClosed { handle, cause }
            },
        }
    }
}
