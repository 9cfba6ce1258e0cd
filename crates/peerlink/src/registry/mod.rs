//! Peer registry.
//!
//! The authoritative map from [`PeerId`] to [`PeerRecord`]. Entries live in a
//! sharded [`DashMap`], so mutations of one peer are atomic while unrelated
//! peers proceed in parallel. Connection state only changes through the
//! compare-and-swap family ([`PeerRegistry::transition`],
//! [`PeerRegistry::transition_with`], [`PeerRegistry::detach`]); discovery
//! data only changes through [`PeerRegistry::upsert`].
//!
//! Commit hooks run while the peer's entry is locked. They must not call back
//! into the registry.

mod types;

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use libp2p::{Multiaddr, PeerId};
use tokio::sync::watch;
use tracing::{debug, trace};

pub use types::{
    ConflictKind, ConnectionState, DiscoveryMethod, PeerRecord, StateConflict, StateWatch,
    Transition,
};

use crate::transport::ConnectionHandle;

struct Slot {
    record: PeerRecord,
    watch: watch::Sender<StateWatch>,
    /// Set by the first upsert; records made by `ensure` start unsighted
    sighted: bool,
}

impl Slot {
    fn new(record: PeerRecord) -> Self {
        let (watch, _) = watch::channel(StateWatch {
            state: record.connection_state,
            attempt: record.attempt,
        });
        Self { record, watch, sighted: false }
    }

    fn publish(&self) {
        self.watch.send_replace(StateWatch {
            state: self.record.connection_state,
            attempt: self.record.attempt,
        });
    }
}

/// Thread-safe store of every known peer
#[derive(Default)]
pub struct PeerRegistry {
    peers: DashMap<PeerId, Slot>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Create the record if absent, otherwise merge addresses and refresh
    /// `last_seen_at`. Never touches the connection state.
    pub fn upsert<I>(&self, peer_id: PeerId, addresses: I, method: DiscoveryMethod) -> PeerRecord
    where
        I: IntoIterator<Item = Multiaddr>,
    {
        self.upsert_with(peer_id, addresses, method, |_, _| {}).0
    }

    /// [`upsert`](Self::upsert) that also reports whether this is the first
    /// sighting of the peer, running `on_commit` under the entry lock.
    ///
    /// A record made by [`ensure`](Self::ensure) counts as unsighted, so the
    /// first upsert after it still reports `true` and takes its method.
    pub fn upsert_with<I, F>(
        &self,
        peer_id: PeerId,
        addresses: I,
        method: DiscoveryMethod,
        on_commit: F,
    ) -> (PeerRecord, bool)
    where
        I: IntoIterator<Item = Multiaddr>,
        F: FnOnce(&PeerRecord, bool),
    {
        let now = Utc::now();
        let mut slot = self
            .peers
            .entry(peer_id)
            .or_insert_with(|| Slot::new(PeerRecord::new(peer_id, method, now)));

        let first_sighting = !slot.sighted;
        if first_sighting {
            slot.sighted = true;
            slot.record.discovery_method = method;
        }

        let before = slot.record.addresses.len();
        slot.record.addresses.extend(addresses);
        slot.record.last_seen_at = now;

        trace!(
            peer = %peer_id,
            first_sighting,
            added = slot.record.addresses.len() - before,
            "Registry upsert"
        );

        on_commit(&slot.record, first_sighting);
        (slot.record.clone(), first_sighting)
    }

    /// Make sure a record exists without counting it as a sighting
    pub(crate) fn ensure(&self, peer_id: PeerId, method: DiscoveryMethod) -> PeerRecord {
        self.peers
            .entry(peer_id)
            .or_insert_with(|| Slot::new(PeerRecord::new(peer_id, method, Utc::now())))
            .record
            .clone()
    }

    /// Snapshot of one peer
    pub fn get(&self, peer_id: &PeerId) -> Option<PeerRecord> {
        self.peers.get(peer_id).map(|slot| slot.record.clone())
    }

    /// Current state, `Unknown` when the peer has no record
    pub fn state_of(&self, peer_id: &PeerId) -> ConnectionState {
        self.peers
            .get(peer_id)
            .map(|slot| slot.record.connection_state)
            .unwrap_or(ConnectionState::Unknown)
    }

    /// Compare-and-swap the connection state.
    ///
    /// Entering `Connected` needs a handle and is refused here; use
    /// [`transition_with`](Self::transition_with) with
    /// [`Transition::with_handle`].
    pub fn transition(
        &self,
        peer_id: &PeerId,
        expected: ConnectionState,
        next: ConnectionState,
    ) -> Result<PeerRecord, StateConflict> {
        self.transition_with(peer_id, Transition::new(expected, next), |_| {})
    }

    /// General compare-and-swap; `on_commit` sees the committed record while
    /// the entry is still locked.
    pub fn transition_with<F>(
        &self,
        peer_id: &PeerId,
        change: Transition,
        on_commit: F,
    ) -> Result<PeerRecord, StateConflict>
    where
        F: FnOnce(&PeerRecord),
    {
        let conflict = |actual, kind| StateConflict {
            peer_id: *peer_id,
            expected: change.expected,
            actual,
            kind,
        };

        let Some(mut guard) = self.peers.get_mut(peer_id) else {
            return Err(conflict(ConnectionState::Unknown, ConflictKind::StateMismatch));
        };
        let slot = &mut *guard;
        let record = &mut slot.record;

        if record.connection_state != change.expected {
            return Err(conflict(record.connection_state, ConflictKind::StateMismatch));
        }
        if let Some(attempt) = change.attempt {
            if record.attempt != attempt {
                return Err(conflict(record.connection_state, ConflictKind::StaleAttempt));
            }
        }
        if change.next == ConnectionState::Connected && change.handle.is_none() {
            return Err(conflict(record.connection_state, ConflictKind::HandleRequired));
        }

        let now = Utc::now();
        let leaving_connection = matches!(
            change.expected,
            ConnectionState::Connected | ConnectionState::Disconnecting
        ) && !change.next.is_active();

        match change.next {
            ConnectionState::Dialing => {
                record.attempt += 1;
                record.last_failure = None;
            },
            ConnectionState::Failed => record.last_failure = change.failure,
            _ => {},
        }
        record.active_connection = match change.next {
            ConnectionState::Connected => change.handle,
            _ => None,
        };
        if leaving_connection {
            record.last_disconnected_at = Some(now);
        }
        record.connection_state = change.next;
        record.state_changed_at = now;

        debug_assert_eq!(
            record.active_connection.is_some(),
            record.connection_state == ConnectionState::Connected
        );
        debug!(
            peer = %peer_id,
            from = %change.expected,
            to = %change.next,
            attempt = record.attempt,
            "State transition committed"
        );

        // watchers wake only after the commit hook has run
        on_commit(&slot.record);
        slot.publish();
        Ok(slot.record.clone())
    }

    /// Compare-and-swap `Connected → Disconnecting`, taking the active handle
    /// out of the record. With `handle_id` set, only that connection matches.
    pub fn detach(
        &self,
        peer_id: &PeerId,
        handle_id: Option<u64>,
    ) -> Result<(PeerRecord, ConnectionHandle), StateConflict> {
        let conflict = |actual, kind| StateConflict {
            peer_id: *peer_id,
            expected: ConnectionState::Connected,
            actual,
            kind,
        };

        let Some(mut guard) = self.peers.get_mut(peer_id) else {
            return Err(conflict(ConnectionState::Unknown, ConflictKind::StateMismatch));
        };
        let slot = &mut *guard;
        let record = &mut slot.record;

        if record.connection_state != ConnectionState::Connected {
            return Err(conflict(record.connection_state, ConflictKind::StateMismatch));
        }
        let matches = match (&record.active_connection, handle_id) {
            (Some(active), Some(id)) => active.id() == id,
            (Some(_), None) => true,
            (None, _) => false,
        };
        let handle = match record.active_connection.take() {
            Some(handle) if matches => handle,
            other => {
                record.active_connection = other;
                return Err(conflict(record.connection_state, ConflictKind::HandleMismatch));
            },
        };

        record.connection_state = ConnectionState::Disconnecting;
        record.state_changed_at = Utc::now();
        debug!(peer = %peer_id, handle = %handle, "Connection detached");

        slot.publish();
        Ok((slot.record.clone(), handle))
    }

    /// Explicit peer-loss signal: drop these addresses from the record
    pub fn forget_addresses(&self, peer_id: &PeerId, addresses: &[Multiaddr]) -> Option<PeerRecord> {
        let mut slot = self.peers.get_mut(peer_id)?;
        for address in addresses {
            slot.record.addresses.remove(address);
        }
        Some(slot.record.clone())
    }

    /// Operator removal. Refused while the peer holds or is acquiring a
    /// connection; `Ok(None)` when there was nothing to remove.
    pub fn remove(&self, peer_id: &PeerId) -> Result<Option<PeerRecord>, StateConflict> {
        let state = self.state_of(peer_id);
        if state.is_active() {
            return Err(StateConflict {
                peer_id: *peer_id,
                expected: ConnectionState::Discovered,
                actual: state,
                kind: ConflictKind::StateMismatch,
            });
        }

        match self.peers.remove_if(peer_id, |_, slot| !slot.record.connection_state.is_active()) {
            Some((_, slot)) => {
                debug!(peer = %peer_id, "Peer removed from registry");
                Ok(Some(slot.record))
            },
            None if self.peers.contains_key(peer_id) => Err(StateConflict {
                peer_id: *peer_id,
                expected: ConnectionState::Discovered,
                actual: self.state_of(peer_id),
                kind: ConflictKind::StateMismatch,
            }),
            None => Ok(None),
        }
    }

    /// Snapshot of every peer, oldest first
    pub fn list(&self) -> Vec<PeerRecord> {
        self.collect(|_| true)
    }

    /// Snapshot of every peer currently in `state`
    pub fn list_by_state(&self, state: ConnectionState) -> Vec<PeerRecord> {
        self.collect(|record| record.connection_state == state)
    }

    /// Peers not seen for longer than `threshold`
    pub fn list_stale(&self, threshold: Duration, now: DateTime<Utc>) -> Vec<PeerRecord> {
        self.collect(|record| record.is_stale(threshold, now))
    }

    /// Follow a peer's `(state, attempt)` pair
    pub fn subscribe(&self, peer_id: &PeerId) -> Option<watch::Receiver<StateWatch>> {
        self.peers.get(peer_id).map(|slot| slot.watch.subscribe())
    }

    fn collect(&self, filter: impl Fn(&PeerRecord) -> bool) -> Vec<PeerRecord> {
        let mut records: Vec<PeerRecord> = self
            .peers
            .iter()
            .filter(|entry| filter(&entry.value().record))
            .map(|entry| entry.value().record.clone())
            .collect();
        records.sort_by(|a, b| a.first_seen_at.cmp(&b.first_seen_at));
        records
    }
}
