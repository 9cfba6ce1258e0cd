mod cli;
mod config;

use std::sync::Arc;

use anyhow::Result;
use peerlink::{DiscoveryControl, LinePort, PeerLinkNode};
use tracing::{error, info};

use crate::{cli::Cli, config::Config};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    logger::init_with_level(cli.log_level);

    let file_config = Config::from_config(cli.config.as_deref())?;
    info!("{}", file_config);

    let node_config = cli.apply(file_config.to_node_config());
    let node = Arc::new(PeerLinkNode::start(node_config).await?);
    if let Some(peer_id) = node.local_peer_id() {
        info!(peer = %peer_id, "peerlink node started");
    }

    if cli.discover {
        node.start_discovery();
    }

    let bridge = node.bridge();
    tokio::select! {
        served = bridge.run(LinePort::stdio()) => match served {
            Ok(()) => info!("Supervisor disconnected, shutting down"),
            Err(e) => error!("Bridge failed: {}", e),
        },
        _ = tokio::signal::ctrl_c() => info!("Ctrl+C received, shutting down"),
    }

    node.shutdown().await;
    Ok(())
}
