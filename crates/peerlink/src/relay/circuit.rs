//! Relay circuit addresses.

use libp2p::{multiaddr::Protocol, Multiaddr, PeerId};

/// Whether `addr` routes through a relay circuit
pub fn is_relayed(addr: &Multiaddr) -> bool {
    addr.iter().any(|p| matches!(p, Protocol::P2pCircuit))
}

/// Address for reaching `peer_id` through `relay`.
///
/// `relay` may be a bare relay address, already end in `/p2p-circuit`, or
/// already name the destination peer.
pub fn circuit_address(relay: &Multiaddr, peer_id: &PeerId) -> Multiaddr {
    let names_peer = matches!(relay.iter().last(), Some(Protocol::P2p(last)) if last == *peer_id);
    if names_peer && is_relayed(relay) {
        return relay.clone();
    }
    let mut addr = relay.clone();
    if !is_relayed(&addr) {
        addr.push(Protocol::P2pCircuit);
    }
    addr.push(Protocol::P2p(*peer_id));
    addr
}

/// Listen address that asks `relay` for a reservation
pub fn reservation_address(relay: &Multiaddr) -> Multiaddr {
    let mut addr = relay.clone();
    if !is_relayed(&addr) {
        addr.push(Protocol::P2pCircuit);
    }
    addr
}
