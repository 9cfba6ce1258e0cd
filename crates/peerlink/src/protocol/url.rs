//! Connection URLs of the form `scheme://connect/<peerId>?relay=<multiaddr>`.

use libp2p::{Multiaddr, PeerId};
use thiserror::Error;
use url::Url;

/// Default scheme for connection URLs
pub const DEFAULT_URL_SCHEME: &str = "peerlink";

const CONNECT_ACTION: &str = "connect";
const RELAY_PARAM: &str = "relay";

/// A parsed connection URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectUrl {
    pub peer_id: PeerId,
    pub relay: Option<Multiaddr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    #[error("not a url: {0}")]
    Parse(#[from] url::ParseError),

    #[error("expected scheme `{expected}`, found `{found}`")]
    Scheme { expected: String, found: String },

    #[error("unsupported action `{0}`")]
    Action(String),

    #[error("missing peer id")]
    MissingPeer,

    #[error("invalid peer id `{0}`")]
    PeerId(String),

    #[error("invalid relay address `{0}`")]
    Relay(String),
}

impl ConnectUrl {
    /// Parse `input`, requiring the given scheme
    pub fn parse(input: &str, scheme: &str) -> Result<Self, UrlError> {
        let url = Url::parse(input.trim())?;
        if !url.scheme().eq_ignore_ascii_case(scheme) {
            return Err(UrlError::Scheme {
                expected: scheme.to_string(),
                found: url.scheme().to_string(),
            });
        }

        let action = url.host_str().unwrap_or_default();
        if action != CONNECT_ACTION {
            return Err(UrlError::Action(action.to_string()));
        }

        let mut segments = url.path().split('/').filter(|s| !s.is_empty());
        let raw_peer = segments.next().ok_or(UrlError::MissingPeer)?;
        if segments.next().is_some() {
            return Err(UrlError::PeerId(url.path().trim_start_matches('/').to_string()));
        }
        let peer_id = raw_peer
            .parse::<PeerId>()
            .map_err(|_| UrlError::PeerId(raw_peer.to_string()))?;

        let relay = url
            .query_pairs()
            .find(|(key, _)| key == RELAY_PARAM)
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
            .map(|value| value.parse::<Multiaddr>().map_err(|_| UrlError::Relay(value)))
            .transpose()?;

        Ok(Self { peer_id, relay })
    }

    /// Render back to a URL string
    pub fn to_url(&self, scheme: &str) -> String {
        let mut url = format!("{scheme}://{CONNECT_ACTION}/{}", self.peer_id);
        if let Some(relay) = &self.relay {
            let encoded: String =
                url::form_urlencoded::byte_serialize(relay.to_string().as_bytes()).collect();
            url.push_str(&format!("?{RELAY_PARAM}={encoded}"));
        }
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        let peer = PeerId::random();
        let parsed = ConnectUrl::parse(&format!("peerlink://connect/{peer}"), "peerlink").unwrap();
        assert_eq!(parsed, ConnectUrl { peer_id: peer, relay: None });
    }

    #[test]
    fn test_parse_with_relay() {
        let peer = PeerId::random();
        let input = format!("peerlink://connect/{peer}/?relay=/ip4/1.2.3.4/tcp/4001");
        let parsed = ConnectUrl::parse(&input, "peerlink").unwrap();
        assert_eq!(parsed.relay, Some("/ip4/1.2.3.4/tcp/4001".parse().unwrap()));
    }

    #[test]
    fn test_rejects_bad_input() {
        let peer = PeerId::random();
        assert!(matches!(
            ConnectUrl::parse(&format!("other://connect/{peer}"), "peerlink"),
            Err(UrlError::Scheme { .. })
        ));
        assert!(matches!(
            ConnectUrl::parse(&format!("peerlink://join/{peer}"), "peerlink"),
            Err(UrlError::Action(_))
        ));
        assert_eq!(ConnectUrl::parse("peerlink://connect/", "peerlink"), Err(UrlError::MissingPeer));
        assert!(matches!(
            ConnectUrl::parse("peerlink://connect/not-a-peer", "peerlink"),
            Err(UrlError::PeerId(_))
        ));
        assert!(matches!(
            ConnectUrl::parse(&format!("peerlink://connect/{peer}?relay=garbage"), "peerlink"),
            Err(UrlError::Relay(_))
        ));
        assert!(matches!(ConnectUrl::parse("not a url", "peerlink"), Err(UrlError::Parse(_))));
    }

    #[test]
    fn test_to_url_parses_back() {
        let url = ConnectUrl {
            peer_id: PeerId::random(),
            relay: Some("/ip4/1.2.3.4/tcp/4001/p2p-circuit".parse().unwrap()),
        };
        assert_eq!(ConnectUrl::parse(&url.to_url("peerlink"), "peerlink").unwrap(), url);
    }
}
