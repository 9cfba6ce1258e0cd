//! PeerLinkNode struct definition.

use std::sync::Arc;

use anyhow::Result;
use libp2p::PeerId;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use crate::{
    bridge::{DiscoveryControl, EventBridge},
    coordinator::Coordinator,
    node::{config::NodeConfig, keys},
    registry::PeerRegistry,
    transport::{Libp2pTransport, TransportProvider},
};

/// A peerlink node
pub struct PeerLinkNode {
    /// The node's configuration
    pub(crate) config: NodeConfig,

    /// Set when the identity is known, i.e. for libp2p-backed nodes
    pub(crate) local_peer_id: Option<PeerId>,

    pub(crate) coordinator: Coordinator,

    pub(crate) transport: Arc<dyn TransportProvider>,

    /// Task draining the provider's discovery stream, while discovery runs
    pub(crate) discovery_task: Mutex<Option<JoinHandle<()>>>,

    /// Task forwarding unsolicited connection events to the coordinator
    pub(crate) remote_task: Mutex<Option<JoinHandle<()>>>,
}

impl PeerLinkNode {
    /// Wire `transport` to a fresh registry and coordinator.
    ///
    /// Must be called from within a tokio runtime: the remote-event pump
    /// starts immediately. Discovery does not.
    pub fn new(config: NodeConfig, transport: Arc<dyn TransportProvider>) -> Self {
        let registry = Arc::new(PeerRegistry::new());
        let coordinator =
            Coordinator::new(registry, Arc::clone(&transport), config.coordinator.clone());

        let remote_task = Self::spawn_remote_pump(&coordinator, transport.as_ref());

        Self {
            config,
            local_peer_id: None,
            coordinator,
            transport,
            discovery_task: Mutex::new(None),
            remote_task: Mutex::new(Some(remote_task)),
        }
    }

    /// Build a node over a real libp2p swarm, loading or generating the
    /// identity at `config.keypair_path`
    pub async fn start(config: NodeConfig) -> Result<Self> {
        config.validate()?;

        let keypair = match &config.keypair_path {
            Some(path) => keys::load_or_generate_keypair(path)?,
            None => keys::generate_keypair(),
        };
        let local_peer_id = keys::peer_id_from_keypair(&keypair);

        let transport = Libp2pTransport::spawn(keypair, &config)?;
        info!(peer = %local_peer_id, "Node transport started");

        let mut node = Self::new(config, Arc::new(transport));
        node.local_peer_id = Some(local_peer_id);
        Ok(node)
    }

    /// Record the identity announced to the supervisor
    pub fn with_local_peer_id(mut self, peer_id: PeerId) -> Self {
        self.local_peer_id = Some(peer_id);
        self
    }

    pub fn local_peer_id(&self) -> Option<PeerId> {
        self.local_peer_id
    }

    /// Get the configuration of this node
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        self.coordinator.registry()
    }

    pub fn transport(&self) -> &Arc<dyn TransportProvider> {
        &self.transport
    }

    /// A bridge serving supervisor commands against this node
    pub fn bridge(self: &Arc<Self>) -> EventBridge {
        let discovery: Arc<dyn DiscoveryControl> = Arc::clone(self) as Arc<dyn DiscoveryControl>;
        let bridge =
            EventBridge::new(self.coordinator.clone(), discovery, self.config.bridge.clone());
        match self.local_peer_id {
            Some(peer_id) => bridge.with_local_peer_id(peer_id),
            None => bridge,
        }
    }
}
