//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use libp2p::{Multiaddr, PeerId};
use peerlink::{
    coordinator::{ConnectionEvent, ConnectionEventKind},
    registry::DiscoveryMethod,
    transport::{DialBehaviour, MemoryTransport},
    ConnectionState, Coordinator, CoordinatorConfig, PeerRegistry,
};
use tokio::sync::broadcast;

/// Upper bound for anything a test waits on
pub const PATIENCE: Duration = Duration::from_secs(5);

pub struct Harness {
    pub coordinator: Coordinator,
    pub transport: MemoryTransport,
    pub events: broadcast::Receiver<ConnectionEvent>,
}

impl Harness {
    pub fn new(behaviour: DialBehaviour) -> Self {
        Self::with_config(behaviour, CoordinatorConfig::default())
    }

    pub fn with_config(behaviour: DialBehaviour, config: CoordinatorConfig) -> Self {
        logger::init_test();
        let transport = MemoryTransport::new(behaviour);
        let coordinator =
            Coordinator::new(Arc::new(PeerRegistry::new()), Arc::new(transport.clone()), config);
        let events = coordinator.events();
        Self { coordinator, transport, events }
    }

    /// A fresh peer already discovered at one address
    pub fn discovered_peer(&self) -> PeerId {
        let peer = PeerId::random();
        self.coordinator.on_peer_discovered(peer, vec![addr(4001)], DiscoveryMethod::LocalBroadcast);
        peer
    }

    pub fn state(&self, peer: &PeerId) -> ConnectionState {
        self.coordinator.registry().state_of(peer)
    }

    /// Next lifecycle event, failing the test if none arrives in time
    pub async fn next_event(&mut self) -> ConnectionEvent {
        next_event(&mut self.events).await
    }

    /// Drain events until one for `peer` named `name` shows up
    pub async fn expect_event(&mut self, peer: PeerId, name: &str) -> ConnectionEventKind {
        loop {
            let event = self.next_event().await;
            if event.peer_id() == peer && event.kind().name() == name {
                return event.kind().clone();
            }
        }
    }

    /// Everything already buffered, for asserting on what did not happen
    pub fn drain_events(&mut self) -> Vec<ConnectionEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}

pub async fn next_event(rx: &mut broadcast::Receiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(PATIENCE, rx.recv())
        .await
        .expect("timed out waiting for a lifecycle event")
        .expect("event channel closed")
}

pub fn addr(port: u16) -> Multiaddr {
    format!("/ip4/192.168.1.10/tcp/{port}").parse().unwrap()
}

/// Poll `condition` until it holds or the test runs out of patience
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    let polled = tokio::time::timeout(PATIENCE, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "condition never became true");
}
