//! Network behaviour for peerlink.
//!
//! Connection management only: relay client for NAT traversal, identify for
//! address exchange, and optional mDNS and Kademlia for discovery.

use libp2p::{
    identify,
    identity::Keypair,
    kad::{self, store::MemoryStore},
    mdns, relay,
    swarm::{behaviour::toggle::Toggle, NetworkBehaviour},
    PeerId,
};
use tracing::{info, warn};

use super::events::NetworkEvent;
use crate::{
    discovery::{configure_kademlia, configure_mdns},
    node::NodeConfig,
    IDENTIFY_PROTOCOL,
};

/// The composed libp2p behaviour driven by the swarm transport
#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "NetworkEvent")]
pub struct PeerLinkBehaviour {
    /// Relay client for NAT traversal
    pub relay_client: relay::client::Behaviour,
    /// Identify, to learn listen addresses of connected peers
    pub identify: identify::Behaviour,
    /// mDNS for local peer discovery
    pub mdns: Toggle<mdns::tokio::Behaviour>,
    /// Kademlia for DHT discovery
    pub kademlia: Toggle<kad::Behaviour<MemoryStore>>,
}

impl PeerLinkBehaviour {
    /// Assemble the behaviour; the relay client comes from the swarm builder
    pub fn new(keypair: &Keypair, relay_client: relay::client::Behaviour, config: &NodeConfig) -> Self {
        let local_peer_id = PeerId::from(keypair.public());

        let identify = identify::Behaviour::new(identify::Config::new(
            IDENTIFY_PROTOCOL.to_string(),
            keypair.public(),
        ));

        // mDNS fails on some platforms; discovery then relies on the DHT and bootstrap peers
        let mdns = if config.enable_mdns {
            match configure_mdns(local_peer_id) {
                Ok(behaviour) => {
                    info!("mDNS local peer discovery enabled");
                    Some(behaviour)
                },
                Err(e) => {
                    warn!("Failed to enable mDNS: {}", e);
                    None
                },
            }
        } else {
            info!("mDNS disabled by configuration");
            None
        };

        let kademlia = if config.enable_kademlia {
            info!("Kademlia DHT peer discovery enabled");
            Some(configure_kademlia(local_peer_id))
        } else {
            info!("Kademlia DHT disabled by configuration");
            None
        };

        Self { relay_client, identify, mdns: mdns.into(), kademlia: kademlia.into() }
    }
}
