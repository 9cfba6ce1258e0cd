//! libp2p-backed transport provider.
//!
//! The [`Swarm`] is owned by a single driver task. Callers talk to it over a
//! command channel; dial replies travel back on oneshot channels correlated
//! by the swarm's [`ConnectionId`]. Discovery findings and connections nobody
//! asked for are broadcast to the streams handed out by the
//! [`TransportProvider`] methods.

use std::{collections::HashMap, io, sync::Arc};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use libp2p::{
    core::transport::TransportError,
    identify,
    identity::Keypair,
    kad, mdns, noise, relay,
    swarm::{
        dial_opts::{DialOpts, PeerCondition},
        DialError as SwarmDialError, SwarmEvent,
    },
    tcp, yamux, Multiaddr, PeerId, Swarm,
};
use parking_lot::{Mutex, RwLock};
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, trace, warn};

use super::{
    broadcast_stream, ConnectionHandle, DialError, DiscoveryEvent, RemoteEvent, TransportProvider,
};
use crate::{
    discovery::{add_bootstrap_peers, BootstrapPeer},
    network::{ConnectionTable, NetworkEvent, PeerLinkBehaviour},
    node::NodeConfig,
    registry::DiscoveryMethod,
    relay::{is_relayed, reservation_address, validate_relay_addresses},
};

const EVENT_BUFFER: usize = 512;

enum Command {
    Dial {
        peer_id: PeerId,
        addresses: Vec<Multiaddr>,
        reply: oneshot::Sender<Result<ConnectionHandle, DialError>>,
    },
    Close {
        handle: ConnectionHandle,
    },
    Abandon {
        peer_id: PeerId,
    },
    Shutdown,
}

/// [`TransportProvider`] over a real libp2p swarm
pub struct Libp2pTransport {
    local_peer_id: PeerId,
    commands: mpsc::UnboundedSender<Command>,
    discovery: broadcast::Sender<DiscoveryEvent>,
    remote: broadcast::Sender<RemoteEvent>,
    bootstrap: Vec<BootstrapPeer>,
    listen_addrs: Arc<RwLock<Vec<Multiaddr>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Libp2pTransport {
    /// Build the swarm, start listening and spawn the driver task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(keypair: Keypair, config: &NodeConfig) -> Result<Self> {
        let local_peer_id = PeerId::from(keypair.public());
        info!("Local peer id: {}", local_peer_id);

        let mut swarm = libp2p::SwarmBuilder::with_existing_identity(keypair)
            .with_tokio()
            .with_tcp(tcp::Config::default(), noise::Config::new, yamux::Config::default)?
            .with_quic()
            .with_dns()?
            .with_relay_client(noise::Config::new, yamux::Config::default)?
            .with_behaviour(|key, relay_client| PeerLinkBehaviour::new(key, relay_client, config))?
            .with_swarm_config(|c| c.with_idle_connection_timeout(config.idle_connection_timeout))
            .build();

        listen_in_range(&mut swarm, config.port_range)?;

        let (bootstrap, errors) =
            add_bootstrap_peers(swarm.behaviour_mut().kademlia.as_mut(), &config.bootstrap_peers);
        if !errors.is_empty() {
            warn!(skipped = errors.len(), "Some bootstrap peers were ignored");
        }

        if config.enable_relay {
            let relays = validate_relay_addresses(&config.relay_servers)
                .map_err(|errors| anyhow!("invalid relay servers: {}", errors.join("; ")))?;
            for relay in relays {
                let circuit = reservation_address(&relay);
                match swarm.listen_on(circuit.clone()) {
                    Ok(_) => info!(relay = %relay, "Requesting relay reservation"),
                    Err(e) => warn!(relay = %relay, "Relay reservation failed: {}", e),
                }
            }
        }

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (discovery, _) = broadcast::channel(EVENT_BUFFER);
        let (remote, _) = broadcast::channel(EVENT_BUFFER);
        let listen_addrs = Arc::new(RwLock::new(Vec::new()));

        let driver = Driver {
            swarm,
            commands: command_rx,
            discovery: discovery.clone(),
            remote: remote.clone(),
            table: ConnectionTable::new(),
            listen_addrs: Arc::clone(&listen_addrs),
        };
        let task = tokio::spawn(driver.run());

        Ok(Self {
            local_peer_id,
            commands,
            discovery,
            remote,
            bootstrap,
            listen_addrs,
            driver: Mutex::new(Some(task)),
        })
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    /// Addresses the swarm is currently listening on
    pub fn listen_addresses(&self) -> Vec<Multiaddr> {
        self.listen_addrs.read().clone()
    }

    /// Stop the driver task and wait for it to exit
    pub async fn stop(&self) {
        let _ = self.commands.send(Command::Shutdown);
        let task = self.driver.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Swarm driver ended abnormally: {}", e);
            }
        }
    }

    fn stopped() -> DialError {
        DialError::Other("transport stopped".into())
    }
}

#[async_trait]
impl TransportProvider for Libp2pTransport {
    fn discover(&self) -> BoxStream<'static, DiscoveryEvent> {
        let live = broadcast_stream(self.discovery.subscribe());
        let seeded: Vec<DiscoveryEvent> = self
            .bootstrap
            .iter()
            .map(|peer| DiscoveryEvent::Discovered {
                peer_id: peer.peer_id,
                addresses: vec![peer.address.clone()],
                method: DiscoveryMethod::Manual,
            })
            .collect();
        futures::stream::iter(seeded).chain(live).boxed()
    }

    async fn dial(
        &self,
        peer_id: PeerId,
        addresses: Vec<Multiaddr>,
    ) -> Result<ConnectionHandle, DialError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Dial { peer_id, addresses, reply })
            .map_err(|_| Self::stopped())?;
        rx.await.map_err(|_| Self::stopped())?
    }

    async fn close(&self, handle: ConnectionHandle) {
        if self.commands.send(Command::Close { handle }).is_err() {
            debug!("Close ignored, transport already stopped");
        }
    }

    fn abandon_dial(&self, peer_id: &PeerId) {
        let _ = self.commands.send(Command::Abandon { peer_id: *peer_id });
    }

    fn remote_events(&self) -> BoxStream<'static, RemoteEvent> {
        broadcast_stream(self.remote.subscribe())
    }

    async fn shutdown(&self) {
        self.stop().await;
    }
}

impl Drop for Libp2pTransport {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

struct Driver {
    swarm: Swarm<PeerLinkBehaviour>,
    commands: mpsc::UnboundedReceiver<Command>,
    discovery: broadcast::Sender<DiscoveryEvent>,
    remote: broadcast::Sender<RemoteEvent>,
    table: ConnectionTable,
    listen_addrs: Arc<RwLock<Vec<Multiaddr>>>,
}

impl Driver {
    async fn run(mut self) {
        debug!("Swarm driver started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                event = self.swarm.select_next_some() => self.handle_swarm_event(event),
            }
        }
        info!(
            open = self.table.open_count(),
            pending = self.table.pending_count(),
            "Swarm driver stopped"
        );
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Dial { peer_id, addresses, reply } => {
                let opts = DialOpts::peer_id(peer_id)
                    .addresses(addresses)
                    .condition(PeerCondition::Always)
                    .build();
                let connection_id = opts.connection_id();
                match self.swarm.dial(opts) {
                    Ok(()) => self.table.add_pending(connection_id, peer_id, reply),
                    Err(e) => {
                        debug!(peer = %peer_id, "Dial rejected by swarm: {}", e);
                        let _ = reply.send(Err(classify_dial_error(&e)));
                    },
                }
            },
            Command::Close { handle } => match self.table.mark_closing(handle.id()) {
                Some(connection_id) => {
                    self.swarm.close_connection(connection_id);
                },
                None => trace!(handle = %handle, "Close for unknown connection"),
            },
            Command::Abandon { peer_id } => {
                let abandoned = self.table.abandon_peer(&peer_id);
                if abandoned > 0 {
                    debug!(peer = %peer_id, abandoned, "Abandoned in-flight dials");
                }
            },
            Command::Shutdown => {},
        }
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<NetworkEvent>) {
        match event {
            SwarmEvent::Behaviour(event) => self.handle_network_event(event),
            SwarmEvent::NewListenAddr { address, .. } => {
                info!("Listening on {}", address);
                self.listen_addrs.write().push(address);
            },
            SwarmEvent::ExpiredListenAddr { address, .. } => {
                self.listen_addrs.write().retain(|a| a != &address);
            },
            SwarmEvent::ConnectionEstablished { peer_id, connection_id, endpoint, .. } => {
                let remote_addr = Some(endpoint.get_remote_address().clone());
                if let Some(dial) = self.table.take_pending(&connection_id) {
                    let handle = self.table.register(connection_id, peer_id, remote_addr);
                    if dial.reply.send(Ok(handle.clone())).is_err() {
                        // the caller gave up on this dial
                        debug!(handle = %handle, "Closing connection nobody waits for");
                        self.table.mark_closing(handle.id());
                        self.swarm.close_connection(connection_id);
                    }
                } else if self.table.take_abandoned(&connection_id) {
                    debug!(peer = %peer_id, "Closing connection from abandoned dial");
                    self.swarm.close_connection(connection_id);
                } else {
                    let handle = self.table.register(connection_id, peer_id, remote_addr);
                    let inbound = endpoint.is_listener();
                    debug!(handle = %handle, inbound, "Unsolicited connection");
                    let _ = self.remote.send(RemoteEvent::ConnectionOpened { handle, inbound });
                }
            },
            SwarmEvent::ConnectionClosed { connection_id, cause, .. } => {
                if let Some((handle, local)) = self.table.remove(&connection_id) {
                    if local {
                        trace!(handle = %handle, "Locally closed connection is gone");
                    } else {
                        let cause = cause.map(|c| c.to_string());
                        debug!(handle = %handle, ?cause, "Connection closed by remote");
                        let _ = self.remote.send(RemoteEvent::ConnectionClosed { handle, cause });
                    }
                }
            },
            SwarmEvent::OutgoingConnectionError { connection_id, peer_id, error } => {
                self.table.take_abandoned(&connection_id);
                if let Some(dial) = self.table.take_pending(&connection_id) {
                    debug!(peer = ?peer_id, "Outgoing connection failed: {}", error);
                    let _ = dial.reply.send(Err(classify_dial_error(&error)));
                }
            },
            SwarmEvent::IncomingConnectionError { send_back_addr, error, .. } => {
                debug!("Incoming connection from {} failed: {}", send_back_addr, error);
            },
            _ => {},
        }
    }

    fn handle_network_event(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::Mdns(mdns::Event::Discovered(found)) => {
                let mut by_peer: HashMap<PeerId, Vec<Multiaddr>> = HashMap::new();
                for (peer_id, addr) in found {
                    if let Some(kademlia) = self.swarm.behaviour_mut().kademlia.as_mut() {
                        kademlia.add_address(&peer_id, addr.clone());
                    }
                    by_peer.entry(peer_id).or_default().push(addr);
                }
                for (peer_id, addresses) in by_peer {
                    self.publish(DiscoveryEvent::Discovered {
                        peer_id,
                        addresses,
                        method: DiscoveryMethod::LocalBroadcast,
                    });
                }
            },
            NetworkEvent::Mdns(mdns::Event::Expired(lost)) => {
                let mut by_peer: HashMap<PeerId, Vec<Multiaddr>> = HashMap::new();
                for (peer_id, addr) in lost {
                    by_peer.entry(peer_id).or_default().push(addr);
                }
                for (peer_id, addresses) in by_peer {
                    self.publish(DiscoveryEvent::Expired { peer_id, addresses });
                }
            },
            NetworkEvent::Kademlia(kad::Event::RoutingUpdated { peer, addresses, .. }) => {
                self.publish(DiscoveryEvent::Discovered {
                    peer_id: peer,
                    addresses: addresses.into_vec(),
                    method: DiscoveryMethod::DistributedTable,
                });
            },
            NetworkEvent::Kademlia(event) => trace!("Kademlia event: {:?}", event),
            NetworkEvent::Identify(event) => {
                if let identify::Event::Received { peer_id, info, .. } = *event {
                    let (relayed, direct): (Vec<_>, Vec<_>) =
                        info.listen_addrs.into_iter().partition(is_relayed);
                    if let Some(kademlia) = self.swarm.behaviour_mut().kademlia.as_mut() {
                        for addr in &direct {
                            kademlia.add_address(&peer_id, addr.clone());
                        }
                    }
                    if !relayed.is_empty() {
                        self.publish(DiscoveryEvent::Discovered {
                            peer_id,
                            addresses: relayed,
                            method: DiscoveryMethod::Relay,
                        });
                    }
                }
            },
            NetworkEvent::Relay(relay::client::Event::ReservationReqAccepted {
                relay_peer_id,
                ..
            }) => {
                info!(relay = %relay_peer_id, "Relay reservation accepted");
            },
            NetworkEvent::Relay(event) => debug!("Relay event: {:?}", event),
        }
    }

    fn publish(&self, event: DiscoveryEvent) {
        trace!(peer = %event.peer_id(), "Discovery event");
        let _ = self.discovery.send(event);
    }
}

/// Listen on the first free port of `range` over TCP, and QUIC on the same
/// port number
fn listen_in_range(swarm: &mut Swarm<PeerLinkBehaviour>, range: (u16, u16)) -> Result<()> {
    let (start, end) = range;
    for port in start..=end {
        let tcp: Multiaddr = format!("/ip4/0.0.0.0/tcp/{port}").parse()?;
        match swarm.listen_on(tcp) {
            Ok(_) => {
                let quic: Multiaddr = format!("/ip4/0.0.0.0/udp/{port}/quic-v1").parse()?;
                if let Err(e) = swarm.listen_on(quic) {
                    warn!(port, "QUIC listener unavailable: {}", e);
                }
                return Ok(());
            },
            Err(e) => debug!(port, "Port unavailable: {}", e),
        }
    }
    Err(anyhow!("no free port in range {start}-{end}"))
}

/// Fold a swarm dial error into the provider-neutral classification
fn classify_dial_error(error: &SwarmDialError) -> DialError {
    match error {
        SwarmDialError::LocalPeerId { .. } => DialError::Refused("dialed the local peer".into()),
        SwarmDialError::NoAddresses => DialError::Unreachable("no known addresses".into()),
        SwarmDialError::Aborted => DialError::Cancelled,
        SwarmDialError::WrongPeerId { obtained, .. } => {
            DialError::HandshakeFailed(format!("remote identified as {obtained}"))
        },
        SwarmDialError::Denied { cause } => DialError::Refused(cause.to_string()),
        SwarmDialError::Transport(errors) => classify_transport_errors(errors),
        other => DialError::Other(other.to_string()),
    }
}

fn classify_transport_errors(errors: &[(Multiaddr, TransportError<io::Error>)]) -> DialError {
    let summary =
        errors.iter().map(|(addr, e)| format!("{addr}: {e}")).collect::<Vec<_>>().join("; ");
    let io_errors: Vec<&io::Error> = errors
        .iter()
        .filter_map(|(_, e)| match e {
            TransportError::Other(io) => Some(io),
            TransportError::MultiaddrNotSupported(_) => None,
        })
        .collect();

    if io_errors.iter().any(|e| e.kind() == io::ErrorKind::ConnectionRefused) {
        DialError::Refused(summary)
    } else if !io_errors.is_empty() && io_errors.iter().all(|e| e.kind() == io::ErrorKind::TimedOut)
    {
        DialError::Timeout
    } else if io_errors.iter().any(|e| {
        let text = e.to_string().to_lowercase();
        text.contains("handshake") || text.contains("noise") || text.contains("upgrade")
    }) {
        DialError::HandshakeFailed(summary)
    } else {
        DialError::Unreachable(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> Multiaddr {
        "/ip4/10.0.0.1/tcp/4001".parse().unwrap()
    }

    #[test]
    fn test_classify_simple_errors() {
        assert_eq!(classify_dial_error(&SwarmDialError::Aborted), DialError::Cancelled);
        assert_eq!(
            classify_dial_error(&SwarmDialError::NoAddresses).reason_code(),
            "unreachable"
        );
    }

    #[test]
    fn test_classify_transport_errors() {
        let refused = vec![(
            addr(),
            TransportError::Other(io::Error::from(io::ErrorKind::ConnectionRefused)),
        )];
        assert_eq!(classify_transport_errors(&refused).reason_code(), "dial_refused");

        let timed_out =
            vec![(addr(), TransportError::Other(io::Error::from(io::ErrorKind::TimedOut)))];
        assert_eq!(classify_transport_errors(&timed_out), DialError::Timeout);

        let noise = vec![(
            addr(),
            TransportError::Other(io::Error::other("noise handshake failed")),
        )];
        assert_eq!(classify_transport_errors(&noise).reason_code(), "handshake_failed");

        let unsupported = vec![(addr(), TransportError::MultiaddrNotSupported(addr()))];
        assert_eq!(classify_transport_errors(&unsupported).reason_code(), "unreachable");
    }

    #[tokio::test]
    async fn test_spawn_and_shutdown() {
        let config = NodeConfig::builder()
            .port_range((0, 0))
            .disable_mdns()
            .disable_kademlia()
            .build();
        let transport = Libp2pTransport::spawn(Keypair::generate_ed25519(), &config).unwrap();

        // nothing to dial and no DHT to ask
        let err = transport.dial(PeerId::random(), Vec::new()).await.unwrap_err();
        assert_eq!(err.reason_code(), "unreachable");

        transport.shutdown().await;
        let err = transport.dial(PeerId::random(), vec![addr()]).await.unwrap_err();
        assert_eq!(err, DialError::Other("transport stopped".into()));
    }
}
