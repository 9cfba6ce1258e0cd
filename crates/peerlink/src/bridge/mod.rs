//! Cross-process event bridge.
//!
//! Forwards coordinator lifecycle events to a supervising process and turns
//! the supervisor's commands into coordinator calls. `ready` is always the
//! first message sent; every inbound message gets exactly one answer, either
//! a `command_result`, a `peer_list`, or an `error`.

mod port;

use std::sync::Arc;

use chrono::Utc;
use libp2p::PeerId;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

pub use port::{ChannelPort, LinePort, MessagePort};

use crate::{
    coordinator::Coordinator,
    protocol::{
        decode_command, encode_event, CommandResultPayload, CommandStatus, Envelope,
        InboundCommand, OutboundEvent, PeerListPayload, PeerSummary, ReadyPayload,
        DEFAULT_URL_SCHEME,
    },
    registry::{ConnectionState, DiscoveryMethod},
    relay::circuit_address,
    PROTOCOL_VERSION,
};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("message port closed")]
    Closed,

    #[error("message port i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Bridge settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Scheme accepted in `connect_url` commands
    pub url_scheme: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self { url_scheme: DEFAULT_URL_SCHEME.to_string() }
    }
}

/// Starting and stopping discovery, as commanded by the supervisor
pub trait DiscoveryControl: Send + Sync {
    /// Returns `false` if discovery was already running
    fn start_discovery(&self) -> bool;

    /// Returns `false` if discovery was not running
    fn stop_discovery(&self) -> bool;
}

/// Serves one supervisor connection at a time
pub struct EventBridge {
    coordinator: Coordinator,
    discovery: Arc<dyn DiscoveryControl>,
    config: BridgeConfig,
    local_peer_id: Option<PeerId>,
}

impl EventBridge {
    pub fn new(
        coordinator: Coordinator,
        discovery: Arc<dyn DiscoveryControl>,
        config: BridgeConfig,
    ) -> Self {
        Self { coordinator, discovery, config, local_peer_id: None }
    }

    /// Announce this peer id in the `ready` message
    pub fn with_local_peer_id(mut self, peer_id: PeerId) -> Self {
        self.local_peer_id = Some(peer_id);
        self
    }

    /// Serve `port` until the supervisor goes away
    pub async fn run<P: MessagePort>(&self, mut port: P) -> Result<(), BridgeError> {
        // subscribe first so nothing committed after `ready` is missed
        let mut events = self.coordinator.events();

        let ready = OutboundEvent::Ready(ReadyPayload {
            version: PROTOCOL_VERSION.to_string(),
            local_peer_id: self.local_peer_id.map(|p| p.to_string()),
            url_scheme: self.config.url_scheme.clone(),
        });
        self.send(&mut port, &ready, None).await?;
        info!("Bridge ready");

        loop {
            tokio::select! {
                inbound = port.recv() => match inbound {
                    Some(Ok(envelope)) => self.dispatch(&mut port, envelope).await?,
                    Some(Err(err)) => {
                        warn!(reason = err.code(), "Undecodable message from supervisor: {}", err);
                        let reply = OutboundEvent::error(None, err.code(), err.to_string());
                        self.send(&mut port, &reply, None).await?;
                    },
                    None => {
                        info!("Supervisor closed the message port");
                        return Ok(());
                    },
                },
                event = events.recv() => match event {
                    Ok(event) => self.send(&mut port, &OutboundEvent::from(&event), None).await?,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Bridge fell behind the coordinator");
                        let reply = OutboundEvent::error(
                            None,
                            "events_lagged",
                            format!("{skipped} lifecycle events were dropped"),
                        );
                        self.send(&mut port, &reply, None).await?;
                    },
                    Err(RecvError::Closed) => return Ok(()),
                },
            }
        }
    }

    /// Apply one decoded command and build its answer
    pub async fn execute(&self, wire_type: &str, command: InboundCommand) -> OutboundEvent {
        match command {
            InboundCommand::StartDiscovery => {
                let changed = self.discovery.start_discovery();
                OutboundEvent::CommandResult(
                    CommandResultPayload::new(wire_type, CommandStatus::Completed)
                        .message(if changed { "discovery started" } else { "discovery already running" }),
                )
            },
            InboundCommand::StopDiscovery => {
                let changed = self.discovery.stop_discovery();
                OutboundEvent::CommandResult(
                    CommandResultPayload::new(wire_type, CommandStatus::Completed)
                        .message(if changed { "discovery stopped" } else { "discovery not running" }),
                )
            },
            InboundCommand::ListPeers => OutboundEvent::PeerList(self.snapshot()),
            InboundCommand::Connect { peer_id, relay_hint } => {
                OutboundEvent::CommandResult(self.connect(wire_type, peer_id, relay_hint))
            },
            InboundCommand::Disconnect { peer_id } => {
                let result = match self.coordinator.request_disconnect(peer_id).await {
                    Ok(outcome) => CommandResultPayload::new(wire_type, CommandStatus::Completed)
                        .peer(peer_id)
                        .state(self.coordinator.registry().state_of(&peer_id))
                        .message(outcome.as_str()),
                    Err(err) => CommandResultPayload::new(wire_type, CommandStatus::Rejected)
                        .peer(peer_id)
                        .reason("internal_error", err.to_string()),
                };
                OutboundEvent::CommandResult(result)
            },
        }
    }

    /// Registry snapshot with staleness flags
    pub fn snapshot(&self) -> PeerListPayload {
        let now = Utc::now();
        let stale_after = self.coordinator.config().stale_after;
        let peers = self
            .coordinator
            .registry()
            .list()
            .iter()
            .map(|record| PeerSummary::from_record(record, record.is_stale(stale_after, now)))
            .collect();
        PeerListPayload { peers }
    }

    fn connect(
        &self,
        wire_type: &str,
        peer_id: PeerId,
        relay_hint: Option<libp2p::Multiaddr>,
    ) -> CommandResultPayload {
        let requested = match relay_hint {
            Some(relay) => self.coordinator.request_connect_with(
                peer_id,
                vec![circuit_address(&relay, &peer_id)],
                DiscoveryMethod::Relay,
            ),
            None => self.coordinator.request_connect(peer_id),
        };

        match requested {
            Ok(outcome) => CommandResultPayload::new(wire_type, CommandStatus::Accepted)
                .peer(peer_id)
                .state(ConnectionState::Dialing)
                .message(format!("dial attempt {} started", outcome.attempt())),
            Err(err) => match err.existing_state() {
                Some(state) => CommandResultPayload::new(wire_type, CommandStatus::Completed)
                    .peer(peer_id)
                    .state(state)
                    .reason(err.code(), err.to_string()),
                None => CommandResultPayload::new(wire_type, CommandStatus::Rejected)
                    .peer(peer_id)
                    .state(self.coordinator.registry().state_of(&peer_id))
                    .reason(err.code(), err.to_string()),
            },
        }
    }

    async fn dispatch<P: MessagePort>(
        &self,
        port: &mut P,
        envelope: Envelope,
    ) -> Result<(), BridgeError> {
        let correlation_id = envelope.correlation_id.clone();
        let reply = match decode_command(&envelope, &self.config.url_scheme) {
            Ok(command) => {
                debug!(command = %envelope.kind, peer = ?command.peer_id(), "Supervisor command");
                self.execute(&envelope.kind, command).await
            },
            Err(err) => {
                warn!(message_type = %envelope.kind, reason = err.code(), "Rejected command: {}", err);
                OutboundEvent::error(Some(envelope.kind.clone()), err.code(), err.to_string())
            },
        };
        self.send(port, &reply, correlation_id).await
    }

    async fn send<P: MessagePort>(
        &self,
        port: &mut P,
        event: &OutboundEvent,
        correlation_id: Option<String>,
    ) -> Result<(), BridgeError> {
        let envelope = encode_event(event, correlation_id)?;
        port.send(envelope).await
    }
}
