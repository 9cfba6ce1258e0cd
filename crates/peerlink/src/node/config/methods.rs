//! Node configuration methods for peerlink.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};

use super::types::{NodeConfig, NodeConfigBuilder};
use crate::{coordinator::CoordinatorConfig, discovery::BootstrapPeer, relay::validate_relay_addresses};

impl NodeConfig {
    /// Enable or disable mDNS discovery
    pub fn with_mdns(mut self, enable: bool) -> Self {
        self.enable_mdns = enable;
        self
    }

    /// Enable or disable Kademlia discovery
    pub fn with_kademlia(mut self, enable: bool) -> Self {
        self.enable_kademlia = enable;
        self
    }

    /// Enable or disable relay support
    pub fn with_relay(mut self, enable: bool) -> Self {
        self.enable_relay = enable;
        self
    }

    /// Set bootstrap peers
    pub fn with_bootstrap_peers(mut self, peers: Vec<String>) -> Self {
        self.bootstrap_peers = peers;
        self
    }

    /// Set relay servers
    pub fn with_relay_servers(mut self, relays: Vec<String>) -> Self {
        self.relay_servers = relays;
        self
    }

    /// Set keypair path
    pub fn with_keypair_path(mut self, path: String) -> Self {
        self.keypair_path = Some(path);
        self
    }

    /// Set port range
    pub fn with_port_range(mut self, range: (u16, u16)) -> Self {
        self.port_range = range;
        self
    }

    /// Replace the coordinator policy
    pub fn with_coordinator(mut self, coordinator: CoordinatorConfig) -> Self {
        self.coordinator = coordinator;
        self
    }

    /// Check the settings the swarm would otherwise reject at startup
    pub fn validate(&self) -> Result<()> {
        let (low, high) = self.port_range;
        if low > high {
            bail!("port range {}-{} is inverted", low, high);
        }
        if self.coordinator.dial_timeout.is_zero() {
            bail!("dial timeout must be greater than zero");
        }
        if self.bridge.url_scheme.is_empty()
            || !self.bridge.url_scheme.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c))
        {
            bail!("invalid url scheme '{}'", self.bridge.url_scheme);
        }
        for peer in &self.bootstrap_peers {
            BootstrapPeer::parse(peer).map_err(|e| anyhow!(e))?;
        }
        if self.enable_relay {
            if let Err(errors) = validate_relay_addresses(&self.relay_servers) {
                bail!("invalid relay servers: {}", errors.join("; "));
            }
        }
        Ok(())
    }
}

impl NodeConfigBuilder {
    /// Build the configuration
    pub fn build(self) -> NodeConfig {
        self.config
    }

    /// Set port range
    pub fn port_range(mut self, range: (u16, u16)) -> Self {
        self.config.port_range = range;
        self
    }

    /// Set keypair path
    pub fn keypair_path(mut self, path: impl Into<String>) -> Self {
        self.config.keypair_path = Some(path.into());
        self
    }

    /// Add bootstrap peer
    pub fn bootstrap_peer(mut self, peer: impl Into<String>) -> Self {
        self.config.bootstrap_peers.push(peer.into());
        self
    }

    /// Add relay server
    pub fn relay_server(mut self, relay: impl Into<String>) -> Self {
        self.config.relay_servers.push(relay.into());
        self
    }

    /// Enable mDNS
    pub fn enable_mdns(mut self) -> Self {
        self.config.enable_mdns = true;
        self
    }

    /// Disable mDNS
    pub fn disable_mdns(mut self) -> Self {
        self.config.enable_mdns = false;
        self
    }

    /// Enable Kademlia
    pub fn enable_kademlia(mut self) -> Self {
        self.config.enable_kademlia = true;
        self
    }

    /// Disable Kademlia
    pub fn disable_kademlia(mut self) -> Self {
        self.config.enable_kademlia = false;
        self
    }

    /// Enable relay
    pub fn enable_relay(mut self) -> Self {
        self.config.enable_relay = true;
        self
    }

    /// Disable relay
    pub fn disable_relay(mut self) -> Self {
        self.config.enable_relay = false;
        self
    }

    pub fn idle_connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_connection_timeout = timeout;
        self
    }

    pub fn coordinator(mut self, coordinator: CoordinatorConfig) -> Self {
        self.config.coordinator = coordinator;
        self
    }

    /// Scheme accepted in `connect_url` commands
    pub fn url_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.config.bridge.url_scheme = scheme.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = NodeConfig::default();
        assert!(config.enable_mdns && config.enable_kademlia && config.enable_relay);
        assert_eq!(config.bridge.url_scheme, "peerlink");
        config.validate().unwrap();
    }

    #[test]
    fn test_builder_sets_fields() {
        let config = NodeConfig::builder()
            .port_range((0, 0))
            .disable_mdns()
            .disable_kademlia()
            .disable_relay()
            .url_scheme("myapp")
            .coordinator(CoordinatorConfig::default().with_dial_timeout(Duration::from_secs(5)))
            .build();

        assert_eq!(config.port_range, (0, 0));
        assert!(!config.enable_mdns && !config.enable_kademlia && !config.enable_relay);
        assert_eq!(config.bridge.url_scheme, "myapp");
        assert_eq!(config.coordinator.dial_timeout, Duration::from_secs(5));
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        assert!(NodeConfig::default().with_port_range((10, 5)).validate().is_err());
        assert!(NodeConfig::builder().url_scheme("no scheme").build().validate().is_err());
        assert!(NodeConfig::builder().bootstrap_peer("/ip4/1.2.3.4/tcp/1").build().validate().is_err());
        assert!(NodeConfig::builder().relay_server("garbage").build().validate().is_err());
        // relay servers are ignored while relay is off
        assert!(NodeConfig::builder()
            .relay_server("garbage")
            .disable_relay()
            .build()
            .validate()
            .is_ok());
    }
}
