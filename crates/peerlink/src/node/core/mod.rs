//! The node: a transport, a registry and a coordinator wired together.

mod discovery;
mod peer_node;
mod run;

pub use peer_node::PeerLinkNode;
