//! Starting and stopping the discovery drain.

use futures::StreamExt;
use tracing::{debug, info};

use super::peer_node::PeerLinkNode;
use crate::bridge::DiscoveryControl;

impl DiscoveryControl for PeerLinkNode {
    fn start_discovery(&self) -> bool {
        let mut task = self.discovery_task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("Discovery already running");
            return false;
        }

        let mut events = self.transport.discover();
        let coordinator = self.coordinator.clone();
        *task = Some(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                coordinator.on_discovery_event(event);
            }
            debug!("Discovery stream ended");
        }));
        info!("Discovery started");
        true
    }

    fn stop_discovery(&self) -> bool {
        match self.discovery_task.lock().take() {
            Some(task) => {
                let running = !task.is_finished();
                task.abort();
                if running {
                    info!("Discovery stopped");
                }
                running
            },
            None => false,
        }
    }
}
