//! Example: the full supervisor protocol against the in-memory transport.
//!
//! No network is touched. A scripted supervisor talks to the bridge over an
//! in-process port and prints every message it receives.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use libp2p::PeerId;
use peerlink::{
    protocol::{encode_command, InboundCommand},
    transport::{DialBehaviour, DiscoveryEvent},
    registry::DiscoveryMethod,
    ChannelPort, MemoryTransport, MessagePort, NodeConfig, PeerLinkNode,
};

#[tokio::main]
async fn main() -> Result<()> {
    logger::init();

    let transport = MemoryTransport::new(DialBehaviour::SucceedAfter(Duration::from_millis(50)));
    let node = Arc::new(PeerLinkNode::new(NodeConfig::default(), Arc::new(transport.clone())));
    let bridge = node.bridge();

    let (mut supervisor, port) = ChannelPort::pair(64);
    let served = tokio::spawn(async move { bridge.run(port).await });

    let peer = PeerId::random();
    let script = [
        InboundCommand::StartDiscovery,
        InboundCommand::Connect { peer_id: peer, relay_hint: None },
        InboundCommand::ListPeers,
        InboundCommand::Disconnect { peer_id: peer },
    ];

    // ready must arrive before the first command
    if let Some(Ok(ready)) = supervisor.recv().await {
        println!("<- {} {}", ready.kind, ready.payload);
    }

    for (i, command) in script.iter().enumerate() {
        if matches!(command, InboundCommand::Connect { .. }) {
            transport.inject_discovery(DiscoveryEvent::Discovered {
                peer_id: peer,
                addresses: vec!["/ip4/192.168.1.20/tcp/4001".parse()?],
                method: DiscoveryMethod::LocalBroadcast,
            });
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let envelope = encode_command(command).with_correlation_id(Some(format!("cmd-{i}")));
        println!("-> {}", envelope.kind);
        supervisor.send(envelope).await?;

        // print everything that arrives while the command settles
        while let Ok(Some(Ok(message))) =
            tokio::time::timeout(Duration::from_millis(150), supervisor.recv()).await
        {
            let correlation = message.correlation_id.as_deref().unwrap_or("-");
            println!("<- {} [{}] {}", message.kind, correlation, message.payload);
        }
    }

    drop(supervisor);
    served.await??;
    node.shutdown().await;
    Ok(())
}
