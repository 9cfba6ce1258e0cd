//! Node module for peerlink.
//!
//! Configuration, identity handling and the [`PeerLinkNode`] that wires a
//! transport provider to the registry and coordinator.

pub mod config;
pub mod core;
pub mod keys;

pub use config::{NodeConfig, NodeConfigBuilder, DEFAULT_IDLE_CONNECTION_TIMEOUT};
pub use core::PeerLinkNode;
pub use keys::{generate_keypair, load_keypair, load_or_generate_keypair, peer_id_from_keypair, save_keypair};
