//! Message types exchanged with the supervising process.
//!
//! Every message travels inside an [`Envelope`]. Commands flowing in are a
//! closed set ([`InboundCommand`]), and so are events flowing out
//! ([`OutboundEvent`]). Payload field names are camelCase on the wire.

use chrono::{DateTime, SecondsFormat, Utc};
use libp2p::{Multiaddr, PeerId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    coordinator::{ConnectionEvent, ConnectionEventKind},
    registry::{ConnectionState, DiscoveryMethod, PeerRecord},
};

/// Uniform, type-tagged wrapper used in both directions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    /// RFC 3339, millisecond precision, UTC
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self { kind: kind.into(), payload, timestamp: timestamp_now(), correlation_id: None }
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

/// Wire timestamp for `at`
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn timestamp_now() -> String {
    format_timestamp(Utc::now())
}

/// Wire names of inbound commands
pub mod command {
    pub const START_DISCOVERY: &str = "start_discovery";
    pub const STOP_DISCOVERY: &str = "stop_discovery";
    pub const CONNECT_TO_PEER: &str = "connect_to_peer";
    pub const CONNECT_URL: &str = "connect_url";
    pub const DISCONNECT_FROM_PEER: &str = "disconnect_from_peer";
    pub const LIST_PEERS: &str = "list_peers";

    pub const ALL: [&str; 6] = [
        START_DISCOVERY,
        STOP_DISCOVERY,
        CONNECT_TO_PEER,
        CONNECT_URL,
        DISCONNECT_FROM_PEER,
        LIST_PEERS,
    ];
}

/// A decoded command from the supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundCommand {
    StartDiscovery,
    StopDiscovery,
    /// Produced by both `connect_to_peer` and `connect_url`
    Connect {
        peer_id: PeerId,
        relay_hint: Option<Multiaddr>,
    },
    Disconnect {
        peer_id: PeerId,
    },
    ListPeers,
}

impl InboundCommand {
    /// Canonical wire type used when encoding this command
    pub fn wire_type(&self) -> &'static str {
        match self {
            Self::StartDiscovery => command::START_DISCOVERY,
            Self::StopDiscovery => command::STOP_DISCOVERY,
            Self::Connect { .. } => command::CONNECT_TO_PEER,
            Self::Disconnect { .. } => command::DISCONNECT_FROM_PEER,
            Self::ListPeers => command::LIST_PEERS,
        }
    }

    pub fn peer_id(&self) -> Option<PeerId> {
        match self {
            Self::Connect { peer_id, .. } | Self::Disconnect { peer_id } => Some(*peer_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConnectPayload {
    pub peer_id: String,
    #[serde(default, alias = "relayHint", skip_serializing_if = "Option::is_none")]
    pub relay: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DisconnectPayload {
    pub peer_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConnectUrlPayload {
    pub url: String,
}

/// Sent once, before anything else
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyPayload {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_peer_id: Option<String>,
    pub url_scheme: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerDiscoveredPayload {
    pub peer_id: String,
    pub multiaddrs: Vec<String>,
    pub method: DiscoveryMethod,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialStartedPayload {
    pub peer_id: String,
    pub attempt: u64,
    pub multiaddrs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub state: ConnectionState,
    pub multiaddrs: Vec<String>,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionEstablishedPayload {
    pub peer_id: String,
    pub attempt: u64,
    pub connection: ConnectionInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionFailedPayload {
    pub peer_id: String,
    pub attempt: u64,
    /// Stable reason code, e.g. `dial_timeout`
    pub reason: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionClosedPayload {
    pub peer_id: String,
    /// `local` or `remote`
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

/// Terminal status of one inbound command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Work started; lifecycle events will follow
    Accepted,
    /// Nothing further will happen for this command
    Completed,
    /// Refused; `reason` carries the code
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResultPayload {
    /// Wire type of the command this answers
    pub command: String,
    pub status: CommandStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ConnectionState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandResultPayload {
    pub fn new(command: impl Into<String>, status: CommandStatus) -> Self {
        Self {
            command: command.into(),
            status,
            peer_id: None,
            state: None,
            reason: None,
            message: None,
        }
    }

    pub fn peer(mut self, peer_id: PeerId) -> Self {
        self.peer_id = Some(peer_id.to_string());
        self
    }

    pub fn state(mut self, state: ConnectionState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn reason(mut self, reason: impl Into<String>, message: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self.message = Some(message.into());
        self
    }
}

/// Registry snapshot entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    pub peer_id: String,
    pub state: ConnectionState,
    pub multiaddrs: Vec<String>,
    pub discovery_method: DiscoveryMethod,
    pub first_seen_at: String,
    pub last_seen_at: String,
    pub attempt: u64,
    pub stale: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<String>,
}

impl PeerSummary {
    pub fn from_record(record: &PeerRecord, stale: bool) -> Self {
        Self {
            peer_id: record.id.to_string(),
            state: record.connection_state,
            multiaddrs: addrs_to_strings(record.addresses.iter()),
            discovery_method: record.discovery_method,
            first_seen_at: format_timestamp(record.first_seen_at),
            last_seen_at: format_timestamp(record.last_seen_at),
            attempt: record.attempt,
            stale,
            last_failure: record.last_failure.as_ref().map(|e| e.reason_code().to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerListPayload {
    pub peers: Vec<PeerSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Type of the offending inbound message, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    pub reason: String,
    pub message: String,
}

/// Everything the bridge can send to the supervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum OutboundEvent {
    Ready(ReadyPayload),
    PeerDiscovered(PeerDiscoveredPayload),
    DialStarted(DialStartedPayload),
    ConnectionEstablished(ConnectionEstablishedPayload),
    ConnectionFailed(ConnectionFailedPayload),
    ConnectionClosed(ConnectionClosedPayload),
    CommandResult(CommandResultPayload),
    PeerList(PeerListPayload),
    Error(ErrorPayload),
}

impl OutboundEvent {
    pub fn wire_type(&self) -> &'static str {
        match self {
            Self::Ready(_) => "ready",
            Self::PeerDiscovered(_) => "peer_discovered",
            Self::DialStarted(_) => "dial_started",
            Self::ConnectionEstablished(_) => "connection_established",
            Self::ConnectionFailed(_) => "connection_failed",
            Self::ConnectionClosed(_) => "connection_closed",
            Self::CommandResult(_) => "command_result",
            Self::PeerList(_) => "peer_list",
            Self::Error(_) => "error",
        }
    }

    pub fn error(message_type: Option<String>, reason: &str, message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message_type,
            reason: reason.to_string(),
            message: message.into(),
        })
    }
}

impl From<&ConnectionEvent> for OutboundEvent {
    fn from(event: &ConnectionEvent) -> Self {
        let peer_id = event.peer_id().to_string();
        match event.kind() {
            ConnectionEventKind::PeerDiscovered { addresses, method } => {
                Self::PeerDiscovered(PeerDiscoveredPayload {
                    peer_id,
                    multiaddrs: addrs_to_strings(addresses),
                    method: *method,
                })
            },
            ConnectionEventKind::DialStarted { attempt, addresses } => {
                Self::DialStarted(DialStartedPayload {
                    peer_id,
                    attempt: *attempt,
                    multiaddrs: addrs_to_strings(addresses),
                })
            },
            ConnectionEventKind::ConnectionEstablished { attempt, remote_addr, inbound } => {
                Self::ConnectionEstablished(ConnectionEstablishedPayload {
                    peer_id,
                    attempt: *attempt,
                    connection: ConnectionInfo {
                        state: ConnectionState::Connected,
                        multiaddrs: addrs_to_strings(remote_addr),
                        direction: if *inbound { Direction::Inbound } else { Direction::Outbound },
                    },
                })
            },
            ConnectionEventKind::ConnectionFailed { attempt, error } => {
                Self::ConnectionFailed(ConnectionFailedPayload {
                    peer_id,
                    attempt: *attempt,
                    reason: error.reason_code().to_string(),
                    message: error.to_string(),
                })
            },
            ConnectionEventKind::ConnectionClosed { reason } => {
                let cause = match reason {
                    crate::coordinator::CloseReason::Remote { cause } => cause.clone(),
                    crate::coordinator::CloseReason::Local => None,
                };
                Self::ConnectionClosed(ConnectionClosedPayload {
                    peer_id,
                    reason: reason.as_str().to_string(),
                    cause,
                })
            },
        }
    }
}

fn addrs_to_strings<'a>(addresses: impl IntoIterator<Item = &'a Multiaddr>) -> Vec<String> {
    addresses.into_iter().map(ToString::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_format() {
        let at = DateTime::parse_from_rfc3339("2025-11-10T10:00:00.123456Z").unwrap();
        assert_eq!(format_timestamp(at.with_timezone(&Utc)), "2025-11-10T10:00:00.123Z");
    }

    #[test]
    fn test_outbound_tagging() {
        let event = OutboundEvent::ConnectionEstablished(ConnectionEstablishedPayload {
            peer_id: "12D3KooW".into(),
            attempt: 1,
            connection: ConnectionInfo {
                state: ConnectionState::Connected,
                multiaddrs: vec!["/ip4/10.0.0.1/tcp/4001".into()],
                direction: Direction::Outbound,
            },
        });

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "connection_established");
        assert_eq!(value["payload"]["peerId"], "12D3KooW");
        assert_eq!(value["payload"]["connection"]["state"], "connected");
        assert_eq!(event.wire_type(), "connection_established");
    }

    #[test]
    fn test_command_result_omits_empty_fields() {
        let payload = CommandResultPayload::new(command::START_DISCOVERY, CommandStatus::Completed);
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value, serde_json::json!({ "command": "start_discovery", "status": "completed" }));
    }
}
