//! Multiaddr helpers.

use libp2p::{multiaddr::Protocol, Multiaddr, PeerId};

/// Split `/.../p2p/<peer>` into the peer and the address leading to it.
///
/// Relay circuits keep the relay's own `/p2p` component.
pub fn split_peer_address(addr: &Multiaddr) -> Option<(PeerId, Multiaddr)> {
    let mut address = addr.clone();
    match address.pop()? {
        Protocol::P2p(peer_id) => Some((peer_id, address)),
        _ => None,
    }
}
