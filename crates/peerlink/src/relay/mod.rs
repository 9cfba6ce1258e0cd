//! Relay support for NAT traversal.
//!
//! Address arithmetic for relay circuits and validation of configured relay
//! servers. The relay client behaviour itself is installed by the swarm
//! builder.

pub mod circuit;
pub mod servers;

pub use circuit::{circuit_address, is_relayed, reservation_address};
pub use servers::validate_relay_addresses;
