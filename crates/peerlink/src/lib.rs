//! peerlink - peer connection lifecycle management
//!
//! Discovers peers, tracks their connection state in a concurrent registry,
//! coordinates dials and accepts so each peer holds at most one connection,
//! and bridges lifecycle events to a supervising process over a typed
//! message channel.

pub mod bridge;
pub mod coordinator;
pub mod discovery;
pub mod network;
pub mod node;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod transport;

// Re-export main types
pub use bridge::{BridgeConfig, ChannelPort, DiscoveryControl, EventBridge, LinePort, MessagePort};
pub use coordinator::{ConnectError, ConnectionEvent, Coordinator, CoordinatorConfig, DialOutcome};
pub use node::{NodeConfig, PeerLinkNode};
pub use registry::{ConnectionState, DiscoveryMethod, PeerRecord, PeerRegistry};
pub use transport::{
    ConnectionHandle, DialError, Libp2pTransport, MemoryTransport, TransportProvider,
};

/// Re-export common error types
pub use anyhow;

/// peerlink result type using anyhow for error handling
pub type Result<T> = anyhow::Result<T>;

/// The version of the supervisor protocol, announced in `ready`
pub const PROTOCOL_VERSION: &str = "1.0";

/// Protocol string announced by identify
pub const IDENTIFY_PROTOCOL: &str = "/peerlink/id/1.0.0";

/// Default port range for peerlink nodes
pub const DEFAULT_PORT_RANGE: (u16, u16) = (9000, 9010);
