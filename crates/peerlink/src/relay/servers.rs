//! Relay server list handling.

use libp2p::multiaddr::Multiaddr;
use tracing::debug;

/// Parse configured relay server addresses, collecting every bad entry
pub fn validate_relay_addresses(addresses: &[String]) -> Result<Vec<Multiaddr>, Vec<String>> {
    let mut valid_addresses = Vec::new();
    let mut errors = Vec::new();

    for addr_str in addresses {
        match addr_str.parse::<Multiaddr>() {
            Ok(addr) => {
                debug!(relay = %addr, "Relay server configured");
                valid_addresses.push(addr);
            },
            Err(e) => {
                errors.push(format!("Invalid relay address '{addr_str}': {e}"));
            },
        }
    }

    if errors.is_empty() {
        Ok(valid_addresses)
    } else {
        Err(errors)
    }
}
