//! Discovery mechanism setup.
//!
//! mDNS covers the local network, Kademlia the wider one. Both are optional
//! and feed the swarm transport's discovery stream.

pub mod kademlia;
pub mod mdns;

pub use kademlia::{add_bootstrap_peers, configure_kademlia, BootstrapPeer};
pub use mdns::configure_mdns;
