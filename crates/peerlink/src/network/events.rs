//! Events emitted by the composed network behaviour.

use libp2p::{identify, kad, mdns, relay};

/// Everything [`PeerLinkBehaviour`](super::PeerLinkBehaviour) reports to the
/// swarm driver
#[derive(Debug)]
pub enum NetworkEvent {
    /// Relay client reservations and circuits
    Relay(relay::client::Event),
    /// Identify exchanges; boxed, the info payload is large
    Identify(Box<identify::Event>),
    /// Local network discovery
    Mdns(mdns::Event),
    /// DHT routing changes and query progress
    Kademlia(kad::Event),
}
