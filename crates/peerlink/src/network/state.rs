//! Connection bookkeeping for the swarm driver.
//!
//! The swarm identifies connections by [`ConnectionId`]; the rest of the
//! crate only sees [`ConnectionHandle`]s. This table maps between the two and
//! tracks dials that were started, answered, or abandoned.

use std::collections::{HashMap, HashSet};

use libp2p::{swarm::ConnectionId, Multiaddr, PeerId};
use tokio::sync::oneshot;

use crate::transport::{ConnectionHandle, DialError};

/// Reply channel of a dial waiting for the swarm
pub type DialReply = oneshot::Sender<Result<ConnectionHandle, DialError>>;

/// A dial the swarm is working on
pub struct PendingDial {
    pub peer_id: PeerId,
    pub reply: DialReply,
}

/// Internal connection state of the swarm driver
#[derive(Default)]
pub struct ConnectionTable {
    pending: HashMap<ConnectionId, PendingDial>,
    abandoned: HashSet<ConnectionId>,
    open: HashMap<ConnectionId, ConnectionHandle>,
    by_handle: HashMap<u64, ConnectionId>,
    closing: HashSet<ConnectionId>,
    handle_counter: u64,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a dial the swarm accepted
    pub fn add_pending(&mut self, connection_id: ConnectionId, peer_id: PeerId, reply: DialReply) {
        self.pending.insert(connection_id, PendingDial { peer_id, reply });
    }

    /// Remove a pending dial that the swarm resolved
    pub fn take_pending(&mut self, connection_id: &ConnectionId) -> Option<PendingDial> {
        self.pending.remove(connection_id)
    }

    /// Answer every pending dial to `peer_id` with `Cancelled`; connections
    /// they still produce must be closed. Returns how many were abandoned.
    pub fn abandon_peer(&mut self, peer_id: &PeerId) -> usize {
        let ids: Vec<ConnectionId> = self
            .pending
            .iter()
            .filter(|(_, dial)| dial.peer_id == *peer_id)
            .map(|(id, _)| *id)
            .collect();

        for id in &ids {
            if let Some(dial) = self.pending.remove(id) {
                let _ = dial.reply.send(Err(DialError::Cancelled));
            }
            self.abandoned.insert(*id);
        }
        ids.len()
    }

    /// Whether `connection_id` belonged to an abandoned dial; forgets it
    pub fn take_abandoned(&mut self, connection_id: &ConnectionId) -> bool {
        self.abandoned.remove(connection_id)
    }

    /// Issue a handle for a connection the swarm established
    pub fn register(
        &mut self,
        connection_id: ConnectionId,
        peer_id: PeerId,
        remote_addr: Option<Multiaddr>,
    ) -> ConnectionHandle {
        self.handle_counter += 1;
        let handle = ConnectionHandle::new(self.handle_counter, peer_id, remote_addr);
        self.open.insert(connection_id, handle.clone());
        self.by_handle.insert(handle.id(), connection_id);
        handle
    }

    /// Flag a connection as closed by us, so its teardown is not reported
    pub fn mark_closing(&mut self, handle_id: u64) -> Option<ConnectionId> {
        let connection_id = *self.by_handle.get(&handle_id)?;
        self.closing.insert(connection_id);
        Some(connection_id)
    }

    /// Forget a closed connection; the flag says whether we closed it
    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<(ConnectionHandle, bool)> {
        let handle = self.open.remove(connection_id)?;
        self.by_handle.remove(&handle.id());
        let local = self.closing.remove(connection_id);
        Some((handle, local))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abandon_answers_pending_dials() {
        let mut table = ConnectionTable::new();
        let peer = PeerId::random();
        let other = PeerId::random();
        let (tx, mut rx) = oneshot::channel();
        let (other_tx, _other_rx) = oneshot::channel();
        table.add_pending(ConnectionId::new_unchecked(1), peer, tx);
        table.add_pending(ConnectionId::new_unchecked(2), other, other_tx);

        assert_eq!(table.abandon_peer(&peer), 1);
        assert_eq!(rx.try_recv().unwrap(), Err(DialError::Cancelled));
        assert_eq!(table.pending_count(), 1);
        assert!(table.take_abandoned(&ConnectionId::new_unchecked(1)));
        assert!(!table.take_abandoned(&ConnectionId::new_unchecked(1)));
    }

    #[test]
    fn test_local_close_is_flagged() {
        let mut table = ConnectionTable::new();
        let peer = PeerId::random();
        let first = table.register(ConnectionId::new_unchecked(1), peer, None);
        let second = table.register(ConnectionId::new_unchecked(2), peer, None);
        assert_ne!(first.id(), second.id());

        assert_eq!(table.mark_closing(first.id()), Some(ConnectionId::new_unchecked(1)));
        assert_eq!(table.remove(&ConnectionId::new_unchecked(1)), Some((first, true)));
        assert_eq!(table.remove(&ConnectionId::new_unchecked(2)), Some((second, false)));
        assert_eq!(table.open_count(), 0);
        assert_eq!(table.mark_closing(99), None);
    }
}
