//! Node configuration for peerlink.

mod methods;
mod types;

pub use types::{NodeConfig, NodeConfigBuilder, DEFAULT_IDLE_CONNECTION_TIMEOUT};
