//! mDNS configuration for local peer discovery.

use anyhow::Result;
use libp2p::{mdns, PeerId};
use tracing::debug;

/// Create the mDNS behaviour; fails where multicast sockets are unavailable
pub fn configure_mdns(local_peer_id: PeerId) -> Result<mdns::tokio::Behaviour> {
    let behaviour = mdns::tokio::Behaviour::new(mdns::Config::default(), local_peer_id)?;

    debug!(peer = %local_peer_id, "mDNS discovery initialized");
    Ok(behaviour)
}
