//! Node configuration types for peerlink.

use std::time::Duration;

use crate::{bridge::BridgeConfig, coordinator::CoordinatorConfig, DEFAULT_PORT_RANGE};

/// Default idle timeout before the swarm drops an unused connection
pub const DEFAULT_IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration options for a peerlink node
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// The port range to listen on; `(0, 0)` picks an ephemeral port
    pub port_range: (u16, u16),

    /// Path to keypair file (will be generated if it doesn't exist)
    pub keypair_path: Option<String>,

    /// Bootstrap peers, as multiaddrs ending in `/p2p/<peer id>`
    pub bootstrap_peers: Vec<String>,

    /// Relay servers to reserve a circuit slot on
    pub relay_servers: Vec<String>,

    /// Whether to enable mDNS discovery
    pub enable_mdns: bool,

    /// Whether to enable Kademlia discovery
    pub enable_kademlia: bool,

    /// Whether to enable relay support
    pub enable_relay: bool,

    /// How long the swarm keeps a connection without active streams
    pub idle_connection_timeout: Duration,

    /// Dial timeout, backoff and event buffering
    pub coordinator: CoordinatorConfig,

    /// Supervisor bridge settings
    pub bridge: BridgeConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            port_range: DEFAULT_PORT_RANGE,
            keypair_path: None,
            bootstrap_peers: Vec::new(),
            relay_servers: Vec::new(),
            enable_mdns: true,
            enable_kademlia: true,
            enable_relay: true,
            idle_connection_timeout: DEFAULT_IDLE_CONNECTION_TIMEOUT,
            coordinator: CoordinatorConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Create a new configuration builder
    pub fn builder() -> NodeConfigBuilder {
        NodeConfigBuilder::default()
    }
}

/// Builder for NodeConfig
#[derive(Default)]
pub struct NodeConfigBuilder {
    pub(crate) config: NodeConfig,
}
