//! Connection coordinator.
//!
//! The single authority deciding when to dial, accept, tear down and record
//! the failure of peer connections. All state changes go through the
//! registry's compare-and-swap primitives and every lifecycle event is
//! emitted from inside the commit hook, so for any one peer the order of
//! events on [`Coordinator::events`] is the order in which transitions were
//! committed.
//!
//! ```text
//! Unknown ─► Discovered ─► Dialing ─► Connected ─► Disconnecting ─► Discovered
//!                 ▲           │                                        │
//!                 │           ▼                                        │
//!                 │         Failed ──(retry)──► Dialing                │
//!                 └────────────────────────────────────────────────────┘
//! ```

mod config;
mod error;
mod events;
mod outcome;

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use libp2p::{Multiaddr, PeerId};
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

pub use config::{
    CoordinatorConfig, DEFAULT_DIAL_TIMEOUT, DEFAULT_EVENT_CAPACITY, DEFAULT_STALE_AFTER,
};
pub use error::{ConnectError, CoordinatorError, DisconnectOutcome};
pub use events::{CloseReason, ConnectionEvent, ConnectionEventKind, TransportEvent};
pub use outcome::DialOutcome;

use crate::{
    registry::{ConnectionState, DiscoveryMethod, PeerRecord, PeerRegistry, Transition},
    transport::{ConnectionHandle, DialError, DiscoveryEvent, TransportProvider},
};

/// How often a request re-reads the state after losing a compare-and-swap
const MAX_CAS_ROUNDS: usize = 4;

struct Inner {
    registry: Arc<PeerRegistry>,
    transport: Arc<dyn TransportProvider>,
    config: CoordinatorConfig,
    events: broadcast::Sender<ConnectionEvent>,
}

/// Cheaply cloneable handle to the connection state machine
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn new(
        registry: Arc<PeerRegistry>,
        transport: Arc<dyn TransportProvider>,
        config: CoordinatorConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self { inner: Arc::new(Inner { registry, transport, config, events }) }
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.inner.registry
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Subscribe to lifecycle events committed from now on
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Record a discovery sighting; announces the peer only the first time
    pub fn on_peer_discovered(
        &self,
        peer_id: PeerId,
        addresses: Vec<Multiaddr>,
        method: DiscoveryMethod,
    ) -> PeerRecord {
        let (record, first_sighting) =
            self.inner.registry.upsert_with(peer_id, addresses, method, |record, first_sighting| {
                if first_sighting {
                    self.emit(peer_id, ConnectionEventKind::PeerDiscovered {
                        addresses: record.addresses.iter().cloned().collect(),
                        method,
                    });
                }
            });

        if first_sighting {
            info!(peer = %peer_id, %method, addresses = record.addresses.len(), "Discovered peer");
        } else {
            trace!(peer = %peer_id, %method, "Peer seen again");
        }
        record
    }

    /// Route one event from a discovery stream
    pub fn on_discovery_event(&self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::Discovered { peer_id, addresses, method } => {
                self.on_peer_discovered(peer_id, addresses, method);
            },
            DiscoveryEvent::Expired { peer_id, addresses } => {
                if let Some(record) = self.inner.registry.forget_addresses(&peer_id, &addresses) {
                    debug!(
                        peer = %peer_id,
                        expired = addresses.len(),
                        remaining = record.addresses.len(),
                        "Peer addresses expired"
                    );
                }
            },
        }
    }

    /// Start a dial to `peer_id` unless one is already running or the peer is
    /// connected. Returns immediately; the dial proceeds in the background.
    pub fn request_connect(&self, peer_id: PeerId) -> Result<DialOutcome, ConnectError> {
        self.request_connect_with(peer_id, Vec::new(), DiscoveryMethod::Manual)
    }

    /// [`request_connect`](Self::request_connect) that first merges
    /// caller-supplied addresses (a relay circuit, a manual endpoint)
    pub fn request_connect_with(
        &self,
        peer_id: PeerId,
        addresses: Vec<Multiaddr>,
        method: DiscoveryMethod,
    ) -> Result<DialOutcome, ConnectError> {
        let registry = &self.inner.registry;
        if !addresses.is_empty() {
            self.on_peer_discovered(peer_id, addresses, method);
        }

        for _ in 0..MAX_CAS_ROUNDS {
            let record = registry.ensure(peer_id, method);
            match record.connection_state {
                ConnectionState::Dialing => {
                    return Err(ConnectError::AlreadyConnecting { peer_id, attempt: record.attempt });
                },
                ConnectionState::Connected => return Err(ConnectError::AlreadyConnected { peer_id }),
                ConnectionState::Disconnecting => return Err(ConnectError::Disconnecting { peer_id }),
                ConnectionState::Unknown => {
                    return Err(self.invariant(peer_id, "record reported as unknown after ensure").into());
                },
                ConnectionState::Discovered | ConnectionState::Failed => {},
            }

            if !record.has_addresses() {
                debug!(peer = %peer_id, "Connect requested for peer without addresses");
                return Err(ConnectError::UnknownPeer { peer_id });
            }
            self.check_redial_policy(&record)?;

            let change = Transition::new(record.connection_state, ConnectionState::Dialing);
            let committed = registry.transition_with(&peer_id, change, |record| {
                self.emit(peer_id, ConnectionEventKind::DialStarted {
                    attempt: record.attempt,
                    addresses: record.addresses.iter().cloned().collect(),
                });
            });

            match committed {
                Ok(record) => {
                    info!(peer = %peer_id, attempt = record.attempt, "Dialing peer");
                    let outcome =
                        DialOutcome::new(peer_id, record.attempt, registry.subscribe(&peer_id));
                    self.spawn_dial(peer_id, record.attempt, record.addresses.into_iter().collect());
                    return Ok(outcome);
                },
                Err(conflict) => {
                    trace!(peer = %peer_id, %conflict, "Lost dial race, re-reading state");
                },
            }
        }

        Err(ConnectError::Contended { peer_id })
    }

    /// Follow the dial currently in flight for `peer_id`, if any
    pub fn subscribe(&self, peer_id: &PeerId) -> Option<DialOutcome> {
        let record = self.inner.registry.get(peer_id)?;
        (record.connection_state == ConnectionState::Dialing).then(|| {
            DialOutcome::new(*peer_id, record.attempt, self.inner.registry.subscribe(peer_id))
        })
    }

    /// Tear down the connection to `peer_id`, or abandon the dial in flight.
    /// A peer holding no connection is a successful no-op.
    pub async fn request_disconnect(
        &self,
        peer_id: PeerId,
    ) -> Result<DisconnectOutcome, CoordinatorError> {
        let registry = &self.inner.registry;

        for _ in 0..MAX_CAS_ROUNDS {
            let Some(record) = registry.get(&peer_id) else {
                return Ok(DisconnectOutcome::NotConnected);
            };

            match record.connection_state {
                ConnectionState::Unknown | ConnectionState::Discovered | ConnectionState::Failed => {
                    debug!(peer = %peer_id, state = %record.connection_state, "Disconnect is a no-op");
                    return Ok(DisconnectOutcome::NotConnected);
                },
                ConnectionState::Disconnecting => return Ok(DisconnectOutcome::AlreadyDisconnecting),
                ConnectionState::Dialing => {
                    let attempt = record.attempt;
                    let change = Transition::new(ConnectionState::Dialing, ConnectionState::Failed)
                        .for_attempt(attempt)
                        .with_failure(DialError::Cancelled);
                    let committed = registry.transition_with(&peer_id, change, |_| {
                        self.emit(peer_id, ConnectionEventKind::ConnectionFailed {
                            attempt,
                            error: DialError::Cancelled,
                        });
                    });
                    if committed.is_ok() {
                        self.inner.transport.abandon_dial(&peer_id);
                        info!(peer = %peer_id, attempt, "Dial cancelled by disconnect request");
                        return Ok(DisconnectOutcome::DialCancelled);
                    }
                },
                ConnectionState::Connected => {
                    if let Ok((_, handle)) = registry.detach(&peer_id, None) {
                        // the peer leaves Disconnecting even if this future is dropped mid-close
                        let teardown = LocalTeardown::new(self, peer_id);
                        self.inner.transport.close(handle).await;
                        teardown.finish()?;
                        return Ok(DisconnectOutcome::Closed);
                    }
                },
            }
        }

        Err(CoordinatorError::Contended { peer_id })
    }

    /// Sole ingress for asynchronous transport notifications
    pub async fn on_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::DialSucceeded { peer_id, attempt, handle } => {
                self.complete_dial(peer_id, attempt, handle).await;
            },
            TransportEvent::DialFailed { peer_id, attempt, error } => {
                self.fail_dial(peer_id, attempt, error);
            },
            TransportEvent::ConnectionOpened { handle, inbound } => {
                self.accept_connection(handle, inbound).await;
            },
            TransportEvent::ConnectionClosed { handle, cause } => {
                self.connection_lost(handle, cause);
            },
        }
    }

    async fn complete_dial(&self, peer_id: PeerId, attempt: u64, handle: ConnectionHandle) {
        let remote_addr = handle.remote_addr().cloned();
        let change = Transition::new(ConnectionState::Dialing, ConnectionState::Connected)
            .for_attempt(attempt)
            .with_handle(handle.clone());

        let committed = self.inner.registry.transition_with(&peer_id, change, |_| {
            self.emit(peer_id, ConnectionEventKind::ConnectionEstablished {
                attempt,
                remote_addr,
                inbound: false,
            });
        });

        match committed {
            Ok(_) => info!(peer = %peer_id, attempt, handle = %handle, "Connection established"),
            Err(conflict) => {
                // the attempt was cancelled or superseded; never keep its connection
                debug!(peer = %peer_id, %conflict, "Closing connection from superseded dial");
                self.inner.transport.close(handle).await;
            },
        }
    }

    fn fail_dial(&self, peer_id: PeerId, attempt: u64, error: DialError) {
        let change = Transition::new(ConnectionState::Dialing, ConnectionState::Failed)
            .for_attempt(attempt)
            .with_failure(error.clone());
        let reason = error.reason_code();

        let committed = self.inner.registry.transition_with(&peer_id, change, |_| {
            self.emit(peer_id, ConnectionEventKind::ConnectionFailed { attempt, error });
        });

        match committed {
            Ok(_) => warn!(peer = %peer_id, attempt, reason, "Dial failed"),
            Err(conflict) => debug!(peer = %peer_id, %conflict, "Ignoring failure of superseded dial"),
        }
    }

    async fn accept_connection(&self, handle: ConnectionHandle, inbound: bool) {
        let peer_id = handle.peer_id();
        let registry = &self.inner.registry;

        // a connection we dialed ourselves outside the coordinator proves the
        // address works; an inbound send-back address usually does not
        let (addresses, method) = match (inbound, handle.remote_addr()) {
            (false, Some(addr)) => (vec![addr.clone()], DiscoveryMethod::Manual),
            _ => (Vec::new(), DiscoveryMethod::Inbound),
        };
        self.on_peer_discovered(peer_id, addresses, method);

        for _ in 0..MAX_CAS_ROUNDS {
            let state = registry.state_of(&peer_id);
            match state {
                ConnectionState::Discovered | ConnectionState::Failed | ConnectionState::Dialing => {
                    let remote_addr = handle.remote_addr().cloned();
                    let change = Transition::new(state, ConnectionState::Connected)
                        .with_handle(handle.clone());
                    let committed = registry.transition_with(&peer_id, change, |record| {
                        self.emit(peer_id, ConnectionEventKind::ConnectionEstablished {
                            attempt: record.attempt,
                            remote_addr,
                            inbound,
                        });
                    });
                    if committed.is_ok() {
                        if state == ConnectionState::Dialing {
                            debug!(peer = %peer_id, "Simultaneous open, keeping remote connection");
                            self.inner.transport.abandon_dial(&peer_id);
                        }
                        info!(peer = %peer_id, handle = %handle, inbound, "Connection accepted");
                        return;
                    }
                },
                ConnectionState::Connected | ConnectionState::Disconnecting => {
                    debug!(peer = %peer_id, handle = %handle, %state, "Closing duplicate connection");
                    self.inner.transport.close(handle).await;
                    return;
                },
                ConnectionState::Unknown => {
                    registry.ensure(peer_id, DiscoveryMethod::Inbound);
                },
            }
        }

        warn!(peer = %peer_id, handle = %handle, "Could not settle inbound connection, closing it");
        self.inner.transport.close(handle).await;
    }

    fn connection_lost(&self, handle: ConnectionHandle, cause: Option<String>) {
        let peer_id = handle.peer_id();
        match self.inner.registry.detach(&peer_id, Some(handle.id())) {
            Ok(_) => {
                if let Err(err) = self.finish_close(peer_id, CloseReason::Remote { cause }) {
                    debug!(peer = %peer_id, %err, "Remote close left peer in an unexpected state");
                }
            },
            Err(conflict) => {
                trace!(peer = %peer_id, handle = %handle, %conflict, "Ignoring close of inactive connection");
            },
        }
    }

    /// Second half of a teardown: `Disconnecting → Discovered`
    fn finish_close(&self, peer_id: PeerId, reason: CloseReason) -> Result<(), CoordinatorError> {
        let label = reason.as_str();
        let change = Transition::new(ConnectionState::Disconnecting, ConnectionState::Discovered);
        self.inner
            .registry
            .transition_with(&peer_id, change, |_| {
                self.emit(peer_id, ConnectionEventKind::ConnectionClosed { reason });
            })
            .map_err(|conflict| {
                self.invariant(peer_id, format!("teardown lost ownership of the peer: {conflict}"))
            })?;

        info!(peer = %peer_id, reason = label, "Connection closed");
        Ok(())
    }

    fn spawn_dial(&self, peer_id: PeerId, attempt: u64, addresses: Vec<Multiaddr>) {
        let Some(mut watch) = self.inner.registry.subscribe(&peer_id) else {
            return;
        };
        let coordinator = self.clone();

        tokio::spawn(async move {
            let transport = Arc::clone(&coordinator.inner.transport);
            let dial_timeout = coordinator.inner.config.dial_timeout;
            let dial = tokio::time::timeout(dial_timeout, transport.dial(peer_id, addresses));
            let superseded = watch
                .wait_for(|w| w.attempt != attempt || w.state != ConnectionState::Dialing);

            let event = tokio::select! {
                result = dial => match result {
                    Ok(Ok(handle)) => TransportEvent::DialSucceeded { peer_id, attempt, handle },
                    Ok(Err(error)) => TransportEvent::DialFailed { peer_id, attempt, error },
                    Err(_) => {
                        transport.abandon_dial(&peer_id);
                        TransportEvent::DialFailed { peer_id, attempt, error: DialError::Timeout }
                    },
                },
                _ = superseded => {
                    trace!(peer = %peer_id, attempt, "Dial abandoned, attempt left Dialing");
                    return;
                },
            };

            coordinator.on_transport_event(event).await;
        });
    }

    fn check_redial_policy(&self, record: &PeerRecord) -> Result<(), ConnectError> {
        let now = Utc::now();
        let peer_id = record.id;
        match record.connection_state {
            ConnectionState::Failed => {
                match remaining(self.inner.config.retry_backoff, record.state_changed_at, now) {
                    Some(remaining) => Err(ConnectError::BackingOff { peer_id, remaining }),
                    None => Ok(()),
                }
            },
            ConnectionState::Discovered => {
                let cooldown = record.last_disconnected_at.and_then(|closed_at| {
                    remaining(self.inner.config.reconnect_cooldown, closed_at, now)
                });
                match cooldown {
                    Some(remaining) => Err(ConnectError::CoolingDown { peer_id, remaining }),
                    None => Ok(()),
                }
            },
            _ => Ok(()),
        }
    }

    fn emit(&self, peer_id: PeerId, kind: ConnectionEventKind) {
        trace!(peer = %peer_id, event = kind.name(), "Emitting lifecycle event");
        // no subscribers is fine; events are observational
        let _ = self.inner.events.send(ConnectionEvent::new(peer_id, kind));
    }

    fn invariant(&self, peer_id: PeerId, detail: impl Into<String>) -> CoordinatorError {
        let detail = detail.into();
        error!(peer = %peer_id, %detail, "Connection state invariant violated");
        CoordinatorError::Invariant { peer_id, detail }
    }
}

/// Completes a locally requested close when dropped unfinished
struct LocalTeardown<'a> {
    coordinator: &'a Coordinator,
    peer_id: PeerId,
    armed: bool,
}

impl<'a> LocalTeardown<'a> {
    fn new(coordinator: &'a Coordinator, peer_id: PeerId) -> Self {
        Self { coordinator, peer_id, armed: true }
    }

    fn finish(mut self) -> Result<(), CoordinatorError> {
        self.armed = false;
        self.coordinator.finish_close(self.peer_id, CloseReason::Local)
    }
}

impl Drop for LocalTeardown<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(peer = %self.peer_id, "Disconnect interrupted while closing, finishing teardown");
        if let Err(err) = self.coordinator.finish_close(self.peer_id, CloseReason::Local) {
            debug!(peer = %self.peer_id, %err, "Interrupted teardown could not finish");
        }
    }
}

/// Time left in a `window` that opened at `since`, if any
fn remaining(window: Duration, since: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
    if window.is_zero() {
        return None;
    }
    let elapsed = now.signed_duration_since(since).to_std().unwrap_or_default();
    window.checked_sub(elapsed).filter(|left| !left.is_zero())
}
