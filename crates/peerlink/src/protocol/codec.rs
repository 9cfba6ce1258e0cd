//! Envelope encoding and decoding.
//!
//! Decoding is two-step: the envelope is parsed first, then its payload is
//! validated against the declared type, so every failure can name the message
//! type it belongs to.

use libp2p::{Multiaddr, PeerId};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;

use super::{
    types::{
        command, ConnectPayload, ConnectUrlPayload, DisconnectPayload, Envelope, InboundCommand,
        OutboundEvent,
    },
    url::{ConnectUrl, UrlError},
};

/// Why an inbound message could not be turned into a command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Envelope(String),

    #[error("unknown message type `{0}`")]
    UnknownType(String),

    #[error("invalid `{kind}` payload: {reason}")]
    Payload { kind: String, reason: String },

    #[error("invalid peer id `{0}`")]
    PeerId(String),

    #[error("invalid multiaddr `{value}`: {reason}")]
    Multiaddr { value: String, reason: String },

    #[error("invalid connection url: {0}")]
    Url(#[from] UrlError),
}

impl DecodeError {
    /// Stable machine-readable code, used on the wire
    pub fn code(&self) -> &'static str {
        match self {
            Self::Envelope(_) => "malformed_envelope",
            Self::UnknownType(_) => "unknown_type",
            Self::Payload { .. } => "invalid_payload",
            Self::PeerId(_) => "invalid_peer_id",
            Self::Multiaddr { .. } => "invalid_multiaddr",
            Self::Url(_) => "invalid_url",
        }
    }
}

/// Parse one JSON text into an envelope
pub fn parse_envelope(text: &str) -> Result<Envelope, DecodeError> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| DecodeError::Envelope(e.to_string()))?;
    if envelope.kind.is_empty() {
        return Err(DecodeError::Envelope("empty message type".into()));
    }
    Ok(envelope)
}

/// Render an envelope as a single line of JSON (no trailing newline)
pub fn to_json_line(envelope: &Envelope) -> Result<String, serde_json::Error> {
    serde_json::to_string(envelope)
}

/// Decode a supervisor command; `url_scheme` is the accepted scheme for
/// `connect_url`
pub fn decode_command(envelope: &Envelope, url_scheme: &str) -> Result<InboundCommand, DecodeError> {
    let kind = envelope.kind.as_str();
    match kind {
        command::START_DISCOVERY => Ok(InboundCommand::StartDiscovery),
        command::STOP_DISCOVERY => Ok(InboundCommand::StopDiscovery),
        command::LIST_PEERS => Ok(InboundCommand::ListPeers),
        command::CONNECT_TO_PEER => {
            let payload: ConnectPayload = decode_payload(envelope)?;
            let peer_id = parse_peer_id(&payload.peer_id)?;
            let relay_hint = payload.relay.as_deref().map(parse_multiaddr).transpose()?;
            Ok(InboundCommand::Connect { peer_id, relay_hint })
        },
        command::CONNECT_URL => {
            let payload: ConnectUrlPayload = decode_payload(envelope)?;
            let url = ConnectUrl::parse(&payload.url, url_scheme)?;
            Ok(InboundCommand::Connect { peer_id: url.peer_id, relay_hint: url.relay })
        },
        command::DISCONNECT_FROM_PEER => {
            let payload: DisconnectPayload = decode_payload(envelope)?;
            Ok(InboundCommand::Disconnect { peer_id: parse_peer_id(&payload.peer_id)? })
        },
        other => Err(DecodeError::UnknownType(other.to_string())),
    }
}

/// Encode a command the way a supervisor would send it
pub fn encode_command(command: &InboundCommand) -> Envelope {
    let payload = match command {
        InboundCommand::Connect { peer_id, relay_hint } => json!({
            "peerId": peer_id.to_string(),
            "relay": relay_hint.as_ref().map(ToString::to_string),
        }),
        InboundCommand::Disconnect { peer_id } => json!({ "peerId": peer_id.to_string() }),
        _ => json!({}),
    };
    Envelope::new(command.wire_type(), payload)
}

/// Encode an outbound event into its envelope
pub fn encode_event(
    event: &OutboundEvent,
    correlation_id: Option<String>,
) -> Result<Envelope, serde_json::Error> {
    let mut tagged = serde_json::to_value(event)?;
    let payload = tagged.get_mut("payload").map(Value::take).unwrap_or(Value::Null);
    Ok(Envelope::new(event.wire_type(), payload).with_correlation_id(correlation_id))
}

/// Decode an outbound event, as the supervisor side does
pub fn decode_event(envelope: &Envelope) -> Result<OutboundEvent, DecodeError> {
    let tagged = json!({ "type": envelope.kind, "payload": envelope.payload });
    serde_json::from_value(tagged).map_err(|e| DecodeError::Payload {
        kind: envelope.kind.clone(),
        reason: e.to_string(),
    })
}

fn decode_payload<T: DeserializeOwned>(envelope: &Envelope) -> Result<T, DecodeError> {
    let value = match &envelope.payload {
        Value::Null => json!({}),
        other => other.clone(),
    };
    serde_json::from_value(value).map_err(|e| DecodeError::Payload {
        kind: envelope.kind.clone(),
        reason: e.to_string(),
    })
}

fn parse_peer_id(raw: &str) -> Result<PeerId, DecodeError> {
    raw.trim().parse().map_err(|_| DecodeError::PeerId(raw.to_string()))
}

fn parse_multiaddr(raw: &str) -> Result<Multiaddr, DecodeError> {
    raw.trim().parse().map_err(|e: libp2p::multiaddr::Error| DecodeError::Multiaddr {
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::{CommandResultPayload, CommandStatus};

    fn envelope(kind: &str, payload: Value) -> Envelope {
        Envelope::new(kind, payload)
    }

    #[test]
    fn test_decode_connect() {
        let peer = PeerId::random();
        let cmd = decode_command(
            &envelope("connect_to_peer", json!({ "peerId": peer.to_string() })),
            "peerlink",
        )
        .unwrap();
        assert_eq!(cmd, InboundCommand::Connect { peer_id: peer, relay_hint: None });

        let cmd = decode_command(
            &envelope(
                "connect_to_peer",
                json!({ "peerId": peer.to_string(), "relayHint": "/ip4/1.2.3.4/tcp/4001" }),
            ),
            "peerlink",
        )
        .unwrap();
        assert!(matches!(cmd, InboundCommand::Connect { relay_hint: Some(_), .. }));
    }

    #[test]
    fn test_decode_errors_are_specific() {
        let err = decode_command(&envelope("connect_to_peer", json!({})), "peerlink").unwrap_err();
        assert_eq!(err.code(), "invalid_payload");

        let err = decode_command(
            &envelope("connect_to_peer", json!({ "peerId": "bogus" })),
            "peerlink",
        )
        .unwrap_err();
        assert_eq!(err, DecodeError::PeerId("bogus".into()));

        let err = decode_command(&envelope("teleport", json!({})), "peerlink").unwrap_err();
        assert_eq!(err.code(), "unknown_type");

        let err = decode_command(
            &envelope("connect_url", json!({ "url": "https://example.com" })),
            "peerlink",
        )
        .unwrap_err();
        assert_eq!(err.code(), "invalid_url");
    }

    #[test]
    fn test_parse_envelope() {
        let env = parse_envelope(r#"{"type":"list_peers","timestamp":"x","correlationId":"7"}"#)
            .unwrap();
        assert_eq!(env.kind, "list_peers");
        assert_eq!(env.correlation_id.as_deref(), Some("7"));
        assert_eq!(env.payload, Value::Null);

        assert_eq!(parse_envelope("{not json").unwrap_err().code(), "malformed_envelope");
        assert_eq!(parse_envelope(r#"{"payload":{}}"#).unwrap_err().code(), "malformed_envelope");
    }

    #[test]
    fn test_encode_event_carries_correlation() {
        let event = OutboundEvent::CommandResult(CommandResultPayload::new(
            "list_peers",
            CommandStatus::Completed,
        ));
        let env = encode_event(&event, Some("abc".into())).unwrap();
        assert_eq!(env.kind, "command_result");
        assert_eq!(env.payload["status"], "completed");
        assert_eq!(env.correlation_id.as_deref(), Some("abc"));
        assert!(env.timestamp.ends_with('Z'));

        assert_eq!(decode_event(&env).unwrap(), event);
    }

    #[test]
    fn test_encoded_commands_decode() {
        let peer = PeerId::random();
        for cmd in [
            InboundCommand::StartDiscovery,
            InboundCommand::Disconnect { peer_id: peer },
            InboundCommand::Connect { peer_id: peer, relay_hint: None },
        ] {
            assert_eq!(decode_command(&encode_command(&cmd), "peerlink").unwrap(), cmd);
        }
    }
}
