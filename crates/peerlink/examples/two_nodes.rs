//! Example: two peerlink nodes connecting over loopback in the same process.

use std::{sync::Arc, time::Duration};

use anyhow::{bail, Result};
use peerlink::{
    node::{generate_keypair, peer_id_from_keypair},
    registry::DiscoveryMethod,
    ConnectionState, Libp2pTransport, NodeConfig, PeerLinkNode,
};
use tokio::time::sleep;

fn config() -> NodeConfig {
    NodeConfig::builder().port_range((0, 0)).disable_mdns().disable_kademlia().disable_relay().build()
}

#[tokio::main]
async fn main() -> Result<()> {
    logger::init();

    let keypair1 = generate_keypair();
    let peer1 = peer_id_from_keypair(&keypair1);
    let transport1 = Arc::new(Libp2pTransport::spawn(keypair1, &config())?);
    let node1 = PeerLinkNode::new(config(), transport1.clone()).with_local_peer_id(peer1);

    let keypair2 = generate_keypair();
    let peer2 = peer_id_from_keypair(&keypair2);
    let transport2 = Arc::new(Libp2pTransport::spawn(keypair2, &config())?);
    let node2 = PeerLinkNode::new(config(), transport2).with_local_peer_id(peer2);

    // wait for node1 to report a loopback listen address
    let mut addr1 = None;
    for _ in 0..50 {
        addr1 = transport1
            .listen_addresses()
            .into_iter()
            .find(|a| a.to_string().starts_with("/ip4/127.0.0.1/tcp/"));
        if addr1.is_some() {
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }
    let Some(addr1) = addr1 else {
        bail!("node1 never started listening");
    };
    println!("Node1: {peer1} at {addr1}");
    println!("Node2: {peer2}");

    let outcome = node2.coordinator().request_connect_with(peer1, vec![addr1], DiscoveryMethod::Manual)?;
    let state = outcome.wait().await;
    println!("Node2 -> Node1: {state}");

    // node1 sees the same connection as inbound
    sleep(Duration::from_millis(200)).await;
    println!("Node1 sees node2 as {}", node1.registry().state_of(&peer2));

    if state == ConnectionState::Connected {
        node2.coordinator().request_disconnect(peer1).await?;
        println!("Node2 disconnected: {}", node2.registry().state_of(&peer1));
    }

    node2.shutdown().await;
    node1.shutdown().await;
    Ok(())
}
