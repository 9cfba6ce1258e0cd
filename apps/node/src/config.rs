use std::{env, fmt, fs, path, time::Duration};

use peerlink::{BridgeConfig, CoordinatorConfig, NodeConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: std::io::Error },

    #[error("failed to write {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: std::io::Error },

    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),

    #[error("neither XDG_CONFIG_HOME nor HOME is set")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: Network,
    pub coordinator: Coordinator,
    pub bridge: Bridge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Network {
    pub port_range: (u16, u16),
    /// Defaults to `identity.key` next to the config file
    pub keypair_path: Option<String>,
    pub bootstrap_peers: Vec<String>,
    pub relay_servers: Vec<String>,
    pub enable_mdns: bool,
    pub enable_kademlia: bool,
    pub enable_relay: bool,
    pub idle_connection_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Coordinator {
    pub dial_timeout_secs: u64,
    pub retry_backoff_secs: u64,
    pub reconnect_cooldown_secs: u64,
    pub stale_after_secs: u64,
    pub event_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bridge {
    pub url_scheme: String,
}

impl Default for Network {
    fn default() -> Self {
        let defaults = NodeConfig::default();
        Self {
            port_range: defaults.port_range,
            keypair_path: None,
            bootstrap_peers: Vec::new(),
            relay_servers: Vec::new(),
            enable_mdns: defaults.enable_mdns,
            enable_kademlia: defaults.enable_kademlia,
            enable_relay: defaults.enable_relay,
            idle_connection_timeout_secs: defaults.idle_connection_timeout.as_secs(),
        }
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        let defaults = CoordinatorConfig::default();
        Self {
            dial_timeout_secs: defaults.dial_timeout.as_secs(),
            retry_backoff_secs: defaults.retry_backoff.as_secs(),
            reconnect_cooldown_secs: defaults.reconnect_cooldown.as_secs(),
            stale_after_secs: defaults.stale_after.as_secs(),
            event_capacity: defaults.event_capacity,
        }
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self { url_scheme: BridgeConfig::default().url_scheme }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self { network: Network::default(), coordinator: Coordinator::default(), bridge: Bridge::default() }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Default config directory ($XDG_CONFIG_HOME/peerlink or
/// $HOME/.config/peerlink)
pub fn default_config_dir() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("peerlink"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_1 = |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
            writeln!(f, "    {}: {}", label, value)
        };

        writeln!(f, "Current Internal Configuration State:")?;
        writeln!(f, "  Network")?;
        let (low, high) = self.network.port_range;
        write_1(f, "Port Range", &format!("{low}-{high}"))?;
        write_1(f, "Bootstrap Peers", &self.network.bootstrap_peers.len())?;
        write_1(f, "Relay Servers", &self.network.relay_servers.len())?;
        write_1(f, "mDNS", &self.network.enable_mdns)?;
        write_1(f, "Kademlia", &self.network.enable_kademlia)?;
        write_1(f, "Relay", &self.network.enable_relay)?;
        writeln!(f, "  Coordinator")?;
        write_1(f, "Dial Timeout (s)", &self.coordinator.dial_timeout_secs)?;
        write_1(f, "Retry Backoff (s)", &self.coordinator.retry_backoff_secs)?;
        write_1(f, "Reconnect Cooldown (s)", &self.coordinator.reconnect_cooldown_secs)?;
        writeln!(f, "  Bridge")?;
        write_1(f, "URL Scheme", &self.bridge.url_scheme)?;

        Ok(())
    }
}

impl Config {
    /// Read the config at `optional_path`, or at the default location.
    ///
    /// A missing file is created with the defaults.
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_dir()?.join("config.toml")
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| ConfigError::ReadFailed { path: config_path.clone(), source })?;
            let mut config: Self = toml::from_str(&raw_string)?;
            config.default_keypair_path(&config_path);
            Ok(config)
        } else {
            let mut config = Self::default();
            config.write_config(&config_path)?;
            config.default_keypair_path(&config_path);
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| ConfigError::WriteFailed { path: parent.to_path_buf(), source })?;
        }

        fs::write(path, config_str)
            .map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })
    }

    fn default_keypair_path(&mut self, config_path: &path::Path) {
        if self.network.keypair_path.is_none() {
            if let Some(dir) = config_path.parent() {
                self.network.keypair_path = Some(dir.join("identity.key").to_string_lossy().into_owned());
            }
        }
    }

    /// Library configuration described by this file
    pub fn to_node_config(&self) -> NodeConfig {
        let coordinator = CoordinatorConfig::default()
            .with_dial_timeout(Duration::from_secs(self.coordinator.dial_timeout_secs))
            .with_retry_backoff(Duration::from_secs(self.coordinator.retry_backoff_secs))
            .with_reconnect_cooldown(Duration::from_secs(self.coordinator.reconnect_cooldown_secs))
            .with_stale_after(Duration::from_secs(self.coordinator.stale_after_secs))
            .with_event_capacity(self.coordinator.event_capacity);

        let mut builder = NodeConfig::builder()
            .port_range(self.network.port_range)
            .idle_connection_timeout(Duration::from_secs(self.network.idle_connection_timeout_secs))
            .coordinator(coordinator)
            .url_scheme(self.bridge.url_scheme.clone());
        if let Some(path) = &self.network.keypair_path {
            builder = builder.keypair_path(path.clone());
        }
        for peer in &self.network.bootstrap_peers {
            builder = builder.bootstrap_peer(peer.clone());
        }
        for relay in &self.network.relay_servers {
            builder = builder.relay_server(relay.clone());
        }

        builder
            .build()
            .with_mdns(self.network.enable_mdns)
            .with_kademlia(self.network.enable_kademlia)
            .with_relay(self.network.enable_relay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config");

        let config = Config::from_config(Some(&path)).unwrap();
        assert!(dir.path().join("sub/config.toml").exists());
        assert_eq!(config.bridge.url_scheme, "peerlink");
        assert!(config.network.keypair_path.as_deref().unwrap().ends_with("identity.key"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[coordinator]\ndial_timeout_secs = 5\n\n[network]\nenable_mdns = false\n")
            .unwrap();

        let config = Config::from_config(Some(&path)).unwrap();
        assert_eq!(config.coordinator.dial_timeout_secs, 5);
        assert!(!config.network.enable_mdns);
        assert!(config.network.enable_kademlia);

        let node = config.to_node_config();
        assert_eq!(node.coordinator.dial_timeout, Duration::from_secs(5));
        assert!(!node.enable_mdns);
        node.validate().unwrap();
    }

    #[test]
    fn test_bad_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[network\n").unwrap();

        assert!(matches!(Config::from_config(Some(&path)), Err(ConfigError::ParseFailed(_))));
    }
}
