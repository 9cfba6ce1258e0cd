//! Background pumps and orderly shutdown.

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::peer_node::PeerLinkNode;
use crate::{
    bridge::DiscoveryControl,
    coordinator::Coordinator,
    registry::ConnectionState,
    transport::TransportProvider,
};

impl PeerLinkNode {
    /// Forward remote connection events to the coordinator one at a time so
    /// they are applied in the order the provider reported them
    pub(crate) fn spawn_remote_pump(
        coordinator: &Coordinator,
        transport: &dyn TransportProvider,
    ) -> JoinHandle<()> {
        // subscribe before spawning so nothing emitted in between is lost
        let mut events = transport.remote_events();
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                coordinator.on_transport_event(event.into()).await;
            }
            debug!("Remote event stream ended");
        })
    }

    /// Stop discovery, tear down every connection and dial, then release the
    /// transport
    pub async fn shutdown(&self) {
        self.stop_discovery();

        let registry = self.coordinator.registry();
        let active = registry
            .list_by_state(ConnectionState::Connected)
            .into_iter()
            .chain(registry.list_by_state(ConnectionState::Dialing));
        for record in active {
            if let Err(e) = self.coordinator.request_disconnect(record.id).await {
                warn!(peer = %record.id, "Disconnect during shutdown failed: {}", e);
            }
        }

        let pump = self.remote_task.lock().take();
        if let Some(pump) = pump {
            pump.abort();
        }

        self.transport.shutdown().await;
        info!("Node shut down");
    }
}
