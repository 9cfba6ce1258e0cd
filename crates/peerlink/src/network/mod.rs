//! libp2p network layer.
//!
//! The composed [`PeerLinkBehaviour`], the events it surfaces to the swarm
//! driver, and the bookkeeping the driver keeps about connections.

pub mod behaviour;
pub mod conversions;
pub mod events;
pub mod helpers;
pub mod state;

pub use behaviour::PeerLinkBehaviour;
pub use events::NetworkEvent;
pub use helpers::split_peer_address;
pub use state::ConnectionTable;
