//! Transport provider contract.
//!
//! The coordinator never talks to a network stack directly. It consumes the
//! [`TransportProvider`] capability defined here, which supplies discovery
//! events, dial/close primitives and unsolicited connection notifications.

pub mod error;
pub mod memory;
pub mod swarm;

use std::fmt;

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use libp2p::{Multiaddr, PeerId};
use tokio::sync::broadcast;
use tracing::warn;

pub use error::DialError;
pub use memory::{DialBehaviour, MemoryTransport};
pub use swarm::Libp2pTransport;

use crate::registry::DiscoveryMethod;

/// Opaque handle to an established connection, issued by the provider
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    id: u64,
    peer_id: PeerId,
    remote_addr: Option<Multiaddr>,
}

impl ConnectionHandle {
    pub fn new(id: u64, peer_id: PeerId, remote_addr: Option<Multiaddr>) -> Self {
        Self { id, peer_id, remote_addr }
    }

    /// Provider-scoped connection id
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn remote_addr(&self) -> Option<&Multiaddr> {
        self.remote_addr.as_ref()
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}@{}", self.id, self.peer_id)
    }
}

/// Something a discovery mechanism learned about a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// The peer is reachable at these addresses
    Discovered {
        peer_id: PeerId,
        addresses: Vec<Multiaddr>,
        method: DiscoveryMethod,
    },
    /// The discovery mechanism explicitly lost these addresses
    Expired { peer_id: PeerId, addresses: Vec<Multiaddr> },
}

impl DiscoveryEvent {
    pub fn peer_id(&self) -> PeerId {
        match self {
            Self::Discovered { peer_id, .. } | Self::Expired { peer_id, .. } => *peer_id,
        }
    }
}

/// Connection notifications the local side did not ask for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    /// A connection appeared that no dial of ours is waiting for
    ConnectionOpened {
        handle: ConnectionHandle,
        /// `true` when the remote dialed us
        inbound: bool,
    },
    /// A connection went away
    ConnectionClosed {
        handle: ConnectionHandle,
        cause: Option<String>,
    },
}

/// Capability the coordinator consumes from the network substrate
#[async_trait]
pub trait TransportProvider: Send + Sync + 'static {
    /// Infinite stream of discovery events; dropping it stops consumption
    fn discover(&self) -> BoxStream<'static, DiscoveryEvent>;

    /// Dial `peer_id` using the given addresses
    async fn dial(
        &self,
        peer_id: PeerId,
        addresses: Vec<Multiaddr>,
    ) -> Result<ConnectionHandle, DialError>;

    /// Close an established connection
    async fn close(&self, handle: ConnectionHandle);

    /// Stop pursuing any in-flight dial to `peer_id`; a connection that still
    /// materialises afterwards must be closed by the provider
    fn abandon_dial(&self, peer_id: &PeerId);

    /// Unsolicited connect/disconnect notifications
    fn remote_events(&self) -> BoxStream<'static, RemoteEvent>;

    /// Release network resources; the provider is unusable afterwards
    async fn shutdown(&self) {}
}

/// Turn a broadcast receiver into a stream, skipping over lag
pub(crate) fn broadcast_stream<T>(rx: broadcast::Receiver<T>) -> BoxStream<'static, T>
where
    T: Clone + Send + 'static,
{
    futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(item) => return Some((item, rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Transport stream consumer lagged behind");
                },
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}
