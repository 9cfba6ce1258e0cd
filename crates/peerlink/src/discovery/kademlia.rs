//! Kademlia DHT configuration for peer discovery.

use std::time::Duration;

use libp2p::{
    kad::{self, store::MemoryStore},
    Multiaddr, PeerId,
};
use tracing::{debug, warn};

use crate::network::split_peer_address;

/// A bootstrap entry: a full multiaddr ending in `/p2p/<peer>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapPeer {
    pub peer_id: PeerId,
    pub address: Multiaddr,
}

impl BootstrapPeer {
    /// Parse `addr`, which must name its peer
    pub fn parse(addr: &str) -> Result<Self, String> {
        let full: Multiaddr = addr.parse().map_err(|e| format!("Invalid address '{addr}': {e}"))?;
        let (peer_id, address) = split_peer_address(&full)
            .ok_or_else(|| format!("Address '{addr}' does not end in /p2p/<peer id>"))?;
        Ok(Self { peer_id, address })
    }
}

/// Configure and create a Kademlia DHT for peer discovery
pub fn configure_kademlia(local_peer_id: PeerId) -> kad::Behaviour<MemoryStore> {
    let store = MemoryStore::new(local_peer_id);
    let mut config = kad::Config::new(kad::PROTOCOL_NAME);
    config.set_query_timeout(Duration::from_secs(30));

    let mut kademlia = kad::Behaviour::with_config(local_peer_id, store, config);
    kademlia.set_mode(Some(kad::Mode::Server));

    debug!(peer = %local_peer_id, "Kademlia discovery initialized");
    kademlia
}

/// Parse bootstrap entries and seed the routing table with them; returns the
/// usable entries and the errors for the rest
pub fn add_bootstrap_peers(
    kademlia: Option<&mut kad::Behaviour<MemoryStore>>,
    bootstrap_peers: &[String],
) -> (Vec<BootstrapPeer>, Vec<String>) {
    let mut peers = Vec::new();
    let mut errors = Vec::new();

    for raw in bootstrap_peers {
        match BootstrapPeer::parse(raw) {
            Ok(peer) => peers.push(peer),
            Err(e) => {
                warn!("Skipping bootstrap peer: {}", e);
                errors.push(e);
            },
        }
    }

    if let Some(kademlia) = kademlia {
        for peer in &peers {
            debug!(peer = %peer.peer_id, addr = %peer.address, "Adding bootstrap peer to Kademlia");
            kademlia.add_address(&peer.peer_id, peer.address.clone());
        }
        if !peers.is_empty() {
            if let Err(e) = kademlia.bootstrap() {
                warn!("Kademlia bootstrap did not start: {}", e);
            }
        }
    }

    (peers, errors)
}
