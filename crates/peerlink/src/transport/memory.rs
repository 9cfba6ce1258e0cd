//! In-process transport provider.
//!
//! Dials never touch the network; each peer follows a scripted
//! [`DialBehaviour`]. Discovery and remote connection events are injected by
//! the embedding code. Used by the integration tests and the demo binary.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::stream::BoxStream;
use libp2p::{Multiaddr, PeerId};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use super::{
    broadcast_stream, ConnectionHandle, DialError, DiscoveryEvent, RemoteEvent, TransportProvider,
};

const EVENT_BUFFER: usize = 256;

/// Scripted result of dialing a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialBehaviour {
    /// Connect immediately
    Succeed,
    /// Connect after a delay
    SucceedAfter(Duration),
    /// Fail immediately with this error
    Fail(DialError),
    /// Fail after a delay
    FailAfter(Duration, DialError),
    /// Never answer; only a timeout or cancellation ends the dial
    Hang,
}

#[derive(Default)]
struct State {
    behaviours: HashMap<PeerId, DialBehaviour>,
    dials: Vec<PeerId>,
    closed: Vec<ConnectionHandle>,
    abandoned: HashSet<PeerId>,
    open: HashMap<u64, ConnectionHandle>,
    close_delay: Option<Duration>,
}

struct Shared {
    default_behaviour: DialBehaviour,
    state: Mutex<State>,
    next_handle: AtomicU64,
    discovery: broadcast::Sender<DiscoveryEvent>,
    remote: broadcast::Sender<RemoteEvent>,
}

/// Scriptable [`TransportProvider`] living entirely in memory
#[derive(Clone)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(DialBehaviour::Succeed)
    }
}

impl MemoryTransport {
    /// Every peer without an explicit script follows `default_behaviour`
    pub fn new(default_behaviour: DialBehaviour) -> Self {
        let (discovery, _) = broadcast::channel(EVENT_BUFFER);
        let (remote, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            shared: Arc::new(Shared {
                default_behaviour,
                state: Mutex::new(State::default()),
                next_handle: AtomicU64::new(1),
                discovery,
                remote,
            }),
        }
    }

    /// Script the dial outcome for one peer
    pub fn set_behaviour(&self, peer_id: PeerId, behaviour: DialBehaviour) {
        self.shared.state.lock().behaviours.insert(peer_id, behaviour);
    }

    /// Make every later `close` take `delay` before it completes
    pub fn set_close_delay(&self, delay: Duration) {
        self.shared.state.lock().close_delay = Some(delay);
    }

    /// Number of dials the transport was asked to perform for `peer_id`
    pub fn dial_count(&self, peer_id: &PeerId) -> usize {
        self.shared.state.lock().dials.iter().filter(|p| *p == peer_id).count()
    }

    /// Every connection closed through [`TransportProvider::close`]
    pub fn closed(&self) -> Vec<ConnectionHandle> {
        self.shared.state.lock().closed.clone()
    }

    /// Whether a dial to `peer_id` was abandoned since it last started
    pub fn was_abandoned(&self, peer_id: &PeerId) -> bool {
        self.shared.state.lock().abandoned.contains(peer_id)
    }

    /// Connections currently open on this transport
    pub fn open_connections(&self) -> Vec<ConnectionHandle> {
        let mut open: Vec<_> = self.shared.state.lock().open.values().cloned().collect();
        open.sort_by_key(ConnectionHandle::id);
        open
    }

    /// Allocate a handle as if the connection had been set up by the network
    pub fn new_handle(&self, peer_id: PeerId, remote_addr: Option<Multiaddr>) -> ConnectionHandle {
        let id = self.shared.next_handle.fetch_add(1, Ordering::Relaxed);
        let handle = ConnectionHandle::new(id, peer_id, remote_addr);
        self.shared.state.lock().open.insert(id, handle.clone());
        handle
    }

    /// Feed a discovery event to every `discover()` stream; returns how many
    /// streams received it
    pub fn inject_discovery(&self, event: DiscoveryEvent) -> usize {
        self.shared.discovery.send(event).unwrap_or(0)
    }

    /// Simulate the remote side opening a connection to us
    pub fn inject_inbound(&self, peer_id: PeerId, remote_addr: Option<Multiaddr>) -> ConnectionHandle {
        let handle = self.new_handle(peer_id, remote_addr);
        self.inject_remote(RemoteEvent::ConnectionOpened { handle: handle.clone(), inbound: true });
        handle
    }

    /// Simulate the network dropping a connection
    pub fn inject_close(&self, handle: &ConnectionHandle, cause: Option<String>) {
        self.shared.state.lock().open.remove(&handle.id());
        self.inject_remote(RemoteEvent::ConnectionClosed { handle: handle.clone(), cause });
    }

    /// Feed a raw remote event to every `remote_events()` stream
    pub fn inject_remote(&self, event: RemoteEvent) -> usize {
        self.shared.remote.send(event).unwrap_or(0)
    }

    fn behaviour_for(&self, peer_id: &PeerId) -> DialBehaviour {
        let mut state = self.shared.state.lock();
        state.dials.push(*peer_id);
        state.abandoned.remove(peer_id);
        state
            .behaviours
            .get(peer_id)
            .cloned()
            .unwrap_or_else(|| self.shared.default_behaviour.clone())
    }
}

#[async_trait]
impl TransportProvider for MemoryTransport {
    fn discover(&self) -> BoxStream<'static, DiscoveryEvent> {
        broadcast_stream(self.shared.discovery.subscribe())
    }

    async fn dial(
        &self,
        peer_id: PeerId,
        addresses: Vec<Multiaddr>,
    ) -> Result<ConnectionHandle, DialError> {
        let behaviour = self.behaviour_for(&peer_id);
        debug!(peer = %peer_id, ?behaviour, "Memory dial");

        match behaviour {
            DialBehaviour::Succeed => {},
            DialBehaviour::SucceedAfter(delay) => tokio::time::sleep(delay).await,
            DialBehaviour::Fail(error) => return Err(error),
            DialBehaviour::FailAfter(delay, error) => {
                tokio::time::sleep(delay).await;
                return Err(error);
            },
            DialBehaviour::Hang => futures::future::pending::<()>().await,
        }

        if self.was_abandoned(&peer_id) {
            return Err(DialError::Cancelled);
        }
        Ok(self.new_handle(peer_id, addresses.into_iter().next()))
    }

    async fn close(&self, handle: ConnectionHandle) {
        let delay = self.shared.state.lock().close_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.shared.state.lock();
        state.open.remove(&handle.id());
        debug!(handle = %handle, "Memory close");
        state.closed.push(handle);
    }

    fn abandon_dial(&self, peer_id: &PeerId) {
        self.shared.state.lock().abandoned.insert(*peer_id);
    }

    fn remote_events(&self) -> BoxStream<'static, RemoteEvent> {
        broadcast_stream(self.shared.remote.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    fn addr() -> Multiaddr {
        "/ip4/10.0.0.1/tcp/4001".parse().unwrap()
    }

    #[tokio::test]
    async fn test_scripted_outcomes() {
        let transport = MemoryTransport::default();
        let ok = PeerId::random();
        let refused = PeerId::random();
        transport.set_behaviour(refused, DialBehaviour::Fail(DialError::Refused("nope".into())));

        let handle = transport.dial(ok, vec![addr()]).await.unwrap();
        assert_eq!(handle.peer_id(), ok);
        assert_eq!(handle.remote_addr(), Some(&addr()));

        let err = transport.dial(refused, vec![addr()]).await.unwrap_err();
        assert_eq!(err.reason_code(), "dial_refused");
        assert_eq!(transport.dial_count(&ok), 1);
        assert_eq!(transport.dial_count(&refused), 1);
    }

    #[tokio::test]
    async fn test_close_is_recorded() {
        let transport = MemoryTransport::default();
        let handle = transport.dial(PeerId::random(), vec![addr()]).await.unwrap();
        assert_eq!(transport.open_connections().len(), 1);

        transport.close(handle.clone()).await;
        assert_eq!(transport.closed(), vec![handle]);
        assert!(transport.open_connections().is_empty());
    }

    #[tokio::test]
    async fn test_injected_events_reach_streams() {
        let transport = MemoryTransport::default();
        let mut discovery = transport.discover();
        let mut remote = transport.remote_events();
        let peer = PeerId::random();

        transport.inject_discovery(DiscoveryEvent::Discovered {
            peer_id: peer,
            addresses: vec![addr()],
            method: crate::registry::DiscoveryMethod::LocalBroadcast,
        });
        let handle = transport.inject_inbound(peer, None);

        assert_eq!(discovery.next().await.map(|e| e.peer_id()), Some(peer));
        assert_eq!(
            remote.next().await,
            Some(RemoteEvent::ConnectionOpened { handle, inbound: true })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_dial_is_cancelled() {
        let transport = MemoryTransport::default();
        let peer = PeerId::random();
        transport.set_behaviour(peer, DialBehaviour::SucceedAfter(Duration::from_secs(5)));

        let dial = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.dial(peer, vec![addr()]).await })
        };
        while transport.dial_count(&peer) == 0 {
            tokio::task::yield_now().await;
        }
        transport.abandon_dial(&peer);

        assert_eq!(dial.await.unwrap(), Err(DialError::Cancelled));
        assert!(transport.open_connections().is_empty());
    }
}
