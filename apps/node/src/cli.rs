//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;
use logger::LevelFilter;
use peerlink::NodeConfig;

/// peerlink utility process: speaks the bridge protocol on stdin/stdout
#[derive(Parser, Debug, Clone)]
#[command(name = "peerlink-node")]
#[command(version)]
pub struct Cli {
    /// Config file; defaults to $XDG_CONFIG_HOME/peerlink/config.toml
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Listen on this port only
    #[arg(long)]
    pub port: Option<u16>,

    /// Extra bootstrap peers (comma-separated multiaddrs ending in /p2p/<id>)
    #[arg(long, value_delimiter = ',')]
    pub bootstrap: Vec<String>,

    /// Extra relay servers (comma-separated multiaddrs)
    #[arg(long, value_delimiter = ',')]
    pub relay: Vec<String>,

    #[arg(long)]
    pub no_mdns: bool,

    #[arg(long)]
    pub no_kademlia: bool,

    #[arg(long)]
    pub no_relay: bool,

    /// Use a throwaway identity instead of the persisted one
    #[arg(long)]
    pub ephemeral: bool,

    /// Start discovery without waiting for a `start_discovery` command
    #[arg(long)]
    pub discover: bool,

    /// Scheme accepted in `connect_url` commands
    #[arg(long)]
    pub url_scheme: Option<String>,

    /// Log level (trace, debug, info, warn, error), overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    pub log_level: LevelFilter,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Layer the flags over the file configuration
    pub fn apply(&self, mut config: NodeConfig) -> NodeConfig {
        if let Some(port) = self.port {
            config.port_range = (port, port);
        }
        config.bootstrap_peers.extend(self.bootstrap.iter().cloned());
        config.relay_servers.extend(self.relay.iter().cloned());
        if self.no_mdns {
            config.enable_mdns = false;
        }
        if self.no_kademlia {
            config.enable_kademlia = false;
        }
        if self.no_relay {
            config.enable_relay = false;
        }
        if self.ephemeral {
            config.keypair_path = None;
        }
        if let Some(scheme) = &self.url_scheme {
            config.bridge.url_scheme = scheme.clone();
        }
        config
    }
}
