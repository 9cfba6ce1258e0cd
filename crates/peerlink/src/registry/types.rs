//! Peer record types.

use std::{collections::BTreeSet, fmt, time::Duration};

use chrono::{DateTime, Utc};
use libp2p::{Multiaddr, PeerId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::{ConnectionHandle, DialError};

/// Where a peer was first learned from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    /// Supplied by an operator, a bootstrap list or a connection URL
    Manual,
    /// Local network broadcast (mDNS)
    LocalBroadcast,
    /// Reached through a relay circuit
    Relay,
    /// Distributed hash table routing
    DistributedTable,
    /// First seen as a remote-initiated connection
    Inbound,
}

impl DiscoveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::LocalBroadcast => "local_broadcast",
            Self::Relay => "relay",
            Self::DistributedTable => "distributed_table",
            Self::Inbound => "inbound",
        }
    }
}

impl fmt::Display for DiscoveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-peer connection state, owned by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No record exists
    Unknown,
    Discovered,
    Dialing,
    Connected,
    Disconnecting,
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Discovered => "discovered",
            Self::Dialing => "dialing",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Failed => "failed",
        }
    }

    /// States from which a new dial may start
    pub fn is_dialable(&self) -> bool {
        matches!(self, Self::Discovered | Self::Failed)
    }

    /// States in which the peer holds or is acquiring a connection
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Dialing | Self::Connected | Self::Disconnecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about a remote peer
///
/// Always handed out as a snapshot; mutating a copy has no effect on the
/// registry.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub id: PeerId,
    pub addresses: BTreeSet<Multiaddr>,
    pub discovery_method: DiscoveryMethod,
    pub connection_state: ConnectionState,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub state_changed_at: DateTime<Utc>,
    /// When the last connection of this peer was torn down
    pub last_disconnected_at: Option<DateTime<Utc>>,
    /// Dial generation, bumped on every entry into `Dialing`
    pub attempt: u64,
    pub last_failure: Option<DialError>,
    pub active_connection: Option<ConnectionHandle>,
}

impl PeerRecord {
    pub(crate) fn new(id: PeerId, method: DiscoveryMethod, now: DateTime<Utc>) -> Self {
        Self {
            id,
            addresses: BTreeSet::new(),
            discovery_method: method,
            connection_state: ConnectionState::Discovered,
            first_seen_at: now,
            last_seen_at: now,
            state_changed_at: now,
            last_disconnected_at: None,
            attempt: 0,
            last_failure: None,
            active_connection: None,
        }
    }

    /// Informational only; stale records are never removed automatically
    pub fn is_stale(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(threshold) {
            Ok(threshold) => now.signed_duration_since(self.last_seen_at) > threshold,
            Err(_) => false,
        }
    }

    pub fn has_addresses(&self) -> bool {
        !self.addresses.is_empty()
    }
}

/// Value published on a peer's state watch after every commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateWatch {
    pub state: ConnectionState,
    pub attempt: u64,
}

/// A compare-and-swap request against one peer's state
#[derive(Debug, Clone)]
pub struct Transition {
    pub(crate) expected: ConnectionState,
    pub(crate) next: ConnectionState,
    pub(crate) attempt: Option<u64>,
    pub(crate) handle: Option<ConnectionHandle>,
    pub(crate) failure: Option<DialError>,
}

impl Transition {
    pub fn new(expected: ConnectionState, next: ConnectionState) -> Self {
        Self { expected, next, attempt: None, handle: None, failure: None }
    }

    /// Only commit if the stored dial generation matches
    pub fn for_attempt(mut self, attempt: u64) -> Self {
        self.attempt = Some(attempt);
        self
    }

    /// Connection handle to install; required when entering `Connected`
    pub fn with_handle(mut self, handle: ConnectionHandle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Failure detail recorded when entering `Failed`
    pub fn with_failure(mut self, failure: DialError) -> Self {
        self.failure = Some(failure);
        self
    }
}

/// Why a compare-and-swap did not commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Stored state differs from the expected one
    StateMismatch,
    /// State matched but the dial generation moved on
    StaleAttempt,
    /// Entering `Connected` without a connection handle
    HandleRequired,
    /// The handle named by the caller is not the active one
    HandleMismatch,
}

/// Outcome of a compare-and-swap that lost; an expected, non-exceptional result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("state conflict for {peer_id}: expected {expected}, found {actual} ({kind:?})")]
pub struct StateConflict {
    pub peer_id: PeerId,
    pub expected: ConnectionState,
    pub actual: ConnectionState,
    pub kind: ConflictKind,
}
