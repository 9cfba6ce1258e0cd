//! A simple peerlink node example.
//!
//! Starts a libp2p-backed node, runs discovery and prints every lifecycle
//! event until Ctrl+C.

use std::env;

use anyhow::Result;
use peerlink::{protocol::OutboundEvent, DiscoveryControl, NodeConfig, PeerLinkNode};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> Result<()> {
    logger::init();

    let mut config = NodeConfig::default();

    // Allow overriding the port range via environment variables
    let min_port = env::var("PEERLINK_MIN_PORT").ok().and_then(|s| s.parse::<u16>().ok());
    let max_port = env::var("PEERLINK_MAX_PORT").ok().and_then(|s| s.parse::<u16>().ok());
    if let (Some(min_port), Some(max_port)) = (min_port, max_port) {
        config.port_range = (min_port, max_port);
    }

    if let Ok(keypair_path) = env::var("PEERLINK_KEYPAIR_PATH") {
        config.keypair_path = Some(keypair_path);
    }

    // Comma-separated multiaddrs ending in /p2p/<peer id>
    if let Ok(bootstrap_peers) = env::var("PEERLINK_BOOTSTRAP_PEERS") {
        config.bootstrap_peers = bootstrap_peers.split(',').map(|s| s.trim().to_string()).collect();
    }

    let node = PeerLinkNode::start(config).await?;
    if let Some(peer_id) = node.local_peer_id() {
        println!("Node started with peer id {peer_id}");
    }

    let mut events = node.coordinator().events();
    node.start_discovery();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let event = OutboundEvent::from(&event);
                    println!("{}: {}", event.wire_type(), serde_json::to_string(&event)?);
                },
                Err(RecvError::Lagged(skipped)) => println!("missed {skipped} events"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    node.shutdown().await;
    Ok(())
}
