//! Connection lifecycle scenarios against the in-memory transport.

mod common;

use std::time::Duration;

use common::{addr, eventually, Harness};
use libp2p::PeerId;
use tokio_test::{assert_err, assert_ok};
use peerlink::{
    coordinator::{
        CloseReason, ConnectError, ConnectionEventKind, DisconnectOutcome, TransportEvent,
    },
    registry::DiscoveryMethod,
    transport::{DialBehaviour, DiscoveryEvent},
    ConnectionState, CoordinatorConfig, DialError,
};

fn assert_no_orphaned_handles(h: &Harness) {
    for record in h.coordinator.registry().list() {
        assert_eq!(
            record.active_connection.is_some(),
            record.connection_state == ConnectionState::Connected,
            "peer {} in {} has handle {:?}",
            record.id,
            record.connection_state,
            record.active_connection
        );
    }
}

#[tokio::test]
async fn test_connect_establishes_exactly_once() {
    let mut h = Harness::new(DialBehaviour::Succeed);
    let peer = h.discovered_peer();

    let outcome = assert_ok!(h.coordinator.request_connect(peer));
    assert_eq!(outcome.attempt(), 1);
    assert_eq!(outcome.wait().await, ConnectionState::Connected);

    let record = h.coordinator.registry().get(&peer).unwrap();
    assert_eq!(record.connection_state, ConnectionState::Connected);
    assert_eq!(record.active_connection.as_ref().unwrap().remote_addr(), Some(&addr(4001)));

    let names: Vec<_> = h.drain_events().iter().map(|e| e.kind().name()).collect();
    assert_eq!(names, ["peer_discovered", "dial_started", "connection_established"]);
    assert_eq!(h.transport.dial_count(&peer), 1);
    assert_no_orphaned_handles(&h);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_connects_issue_one_dial() {
    let mut h = Harness::new(DialBehaviour::SucceedAfter(Duration::from_millis(200)));
    let peer = h.discovered_peer();

    let requests: Vec<_> = (0..16)
        .map(|_| {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.request_connect(peer) })
        })
        .collect();

    let mut started = Vec::new();
    let mut deduplicated = 0;
    for request in requests {
        match request.await.unwrap() {
            Ok(outcome) => started.push(outcome),
            Err(ConnectError::AlreadyConnecting { attempt, .. }) => {
                assert_eq!(attempt, 1);
                deduplicated += 1;
            },
            Err(ConnectError::AlreadyConnected { .. }) => deduplicated += 1,
            Err(other) => panic!("unexpected connect error: {other}"),
        }
    }
    assert_eq!(started.len(), 1);
    assert_eq!(deduplicated, 15);

    // latecomers follow the same attempt
    let follower = h.coordinator.subscribe(&peer);
    assert_eq!(started.pop().unwrap().wait().await, ConnectionState::Connected);
    if let Some(follower) = follower {
        assert_eq!(follower.attempt(), 1);
        assert_eq!(follower.wait().await, ConnectionState::Connected);
    }

    assert_eq!(h.transport.dial_count(&peer), 1);
    let events = h.drain_events();
    let count = |name: &str| events.iter().filter(|e| e.kind().name() == name).count();
    assert_eq!(count("dial_started"), 1);
    assert_eq!(count("connection_established"), 1);
    assert_no_orphaned_handles(&h);
}

#[tokio::test]
async fn test_connect_without_addresses_is_unknown_peer() {
    let mut h = Harness::new(DialBehaviour::Succeed);
    let stranger = PeerId::random();

    let err = assert_err!(h.coordinator.request_connect(stranger));
    assert_eq!(err, ConnectError::UnknownPeer { peer_id: stranger });
    assert_eq!(err.code(), "unknown_peer");
    assert_eq!(h.transport.dial_count(&stranger), 0);
    assert!(h.drain_events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_dial_timeout_then_retry() {
    let config = CoordinatorConfig::default().with_dial_timeout(Duration::from_secs(5));
    let mut h = Harness::with_config(DialBehaviour::Hang, config);
    let peer = h.discovered_peer();

    let outcome = h.coordinator.request_connect(peer).unwrap();
    assert_eq!(outcome.wait().await, ConnectionState::Failed);

    let record = h.coordinator.registry().get(&peer).unwrap();
    assert_eq!(record.last_failure, Some(DialError::Timeout));
    assert!(record.active_connection.is_none());
    assert!(h.transport.was_abandoned(&peer));
    match h.expect_event(peer, "connection_failed").await {
        ConnectionEventKind::ConnectionFailed { attempt, error } => {
            assert_eq!(attempt, 1);
            assert_eq!(error.reason_code(), "dial_timeout");
        },
        other => panic!("unexpected event {other:?}"),
    }

    // a failed peer stays listed and may be retried
    h.transport.set_behaviour(peer, DialBehaviour::Succeed);
    let retry = h.coordinator.request_connect(peer).unwrap();
    assert_eq!(retry.attempt(), 2);
    assert_eq!(retry.wait().await, ConnectionState::Connected);
    assert_eq!(h.transport.dial_count(&peer), 2);
}

#[tokio::test]
async fn test_refused_dial_is_recorded_not_retried() {
    let mut h = Harness::new(DialBehaviour::Fail(DialError::Refused("connection refused".into())));
    let peer = h.discovered_peer();

    let outcome = h.coordinator.request_connect(peer).unwrap();
    assert_eq!(outcome.wait().await, ConnectionState::Failed);
    match h.expect_event(peer, "connection_failed").await {
        ConnectionEventKind::ConnectionFailed { error, .. } => {
            assert_eq!(error.reason_code(), "dial_refused");
        },
        other => panic!("unexpected event {other:?}"),
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.transport.dial_count(&peer), 1);
    assert_eq!(h.state(&peer), ConnectionState::Failed);
}

#[tokio::test]
async fn test_remote_close_then_reconnect() {
    let mut h = Harness::new(DialBehaviour::Succeed);
    let peer = h.discovered_peer();
    h.coordinator.request_connect(peer).unwrap().wait().await;
    let handle = h.coordinator.registry().get(&peer).unwrap().active_connection.unwrap();

    h.coordinator
        .on_transport_event(TransportEvent::ConnectionClosed {
            handle,
            cause: Some("connection reset".into()),
        })
        .await;

    assert_eq!(h.state(&peer), ConnectionState::Discovered);
    assert_eq!(
        h.expect_event(peer, "connection_closed").await,
        ConnectionEventKind::ConnectionClosed {
            reason: CloseReason::Remote { cause: Some("connection reset".into()) }
        }
    );
    assert_no_orphaned_handles(&h);

    let again = h.coordinator.request_connect(peer).unwrap();
    assert_eq!(again.attempt(), 2);
    assert_eq!(again.wait().await, ConnectionState::Connected);
}

#[tokio::test]
async fn test_close_of_stale_handle_is_ignored() {
    let mut h = Harness::new(DialBehaviour::Succeed);
    let peer = h.discovered_peer();
    h.coordinator.request_connect(peer).unwrap().wait().await;
    h.drain_events();

    let stale = h.transport.new_handle(peer, None);
    h.coordinator
        .on_transport_event(TransportEvent::ConnectionClosed { handle: stale, cause: None })
        .await;

    assert_eq!(h.state(&peer), ConnectionState::Connected);
    assert!(h.drain_events().is_empty());
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let mut h = Harness::new(DialBehaviour::Succeed);
    let peer = h.discovered_peer();

    assert_eq!(
        h.coordinator.request_disconnect(peer).await.unwrap(),
        DisconnectOutcome::NotConnected
    );
    assert_eq!(
        h.coordinator.request_disconnect(PeerId::random()).await.unwrap(),
        DisconnectOutcome::NotConnected
    );

    h.coordinator.request_connect(peer).unwrap().wait().await;
    let handle = h.coordinator.registry().get(&peer).unwrap().active_connection.unwrap();

    assert_eq!(h.coordinator.request_disconnect(peer).await.unwrap(), DisconnectOutcome::Closed);
    assert_eq!(h.state(&peer), ConnectionState::Discovered);
    assert_eq!(h.transport.closed(), vec![handle]);
    assert_eq!(
        h.expect_event(peer, "connection_closed").await,
        ConnectionEventKind::ConnectionClosed { reason: CloseReason::Local }
    );

    assert_eq!(
        h.coordinator.request_disconnect(peer).await.unwrap(),
        DisconnectOutcome::NotConnected
    );
    assert_eq!(h.transport.closed().len(), 1);
}

#[tokio::test]
async fn test_interrupted_disconnect_still_settles() {
    let mut h = Harness::new(DialBehaviour::Succeed);
    let peer = h.discovered_peer();
    h.coordinator.request_connect(peer).unwrap().wait().await;
    h.transport.set_close_delay(Duration::from_secs(60));

    // dropped while the transport is still closing
    let interrupted =
        tokio::time::timeout(Duration::from_millis(50), h.coordinator.request_disconnect(peer)).await;
    assert!(interrupted.is_err());

    let record = h.coordinator.registry().get(&peer).unwrap();
    assert_eq!(record.connection_state, ConnectionState::Discovered);
    assert!(record.active_connection.is_none());
    assert_eq!(
        h.expect_event(peer, "connection_closed").await,
        ConnectionEventKind::ConnectionClosed { reason: CloseReason::Local }
    );
    assert_ok!(h.coordinator.request_connect(peer));
}

#[tokio::test]
async fn test_disconnect_cancels_dial_in_flight() {
    let mut h = Harness::new(DialBehaviour::Hang);
    let peer = h.discovered_peer();
    let outcome = h.coordinator.request_connect(peer).unwrap();

    assert_eq!(
        h.coordinator.request_disconnect(peer).await.unwrap(),
        DisconnectOutcome::DialCancelled
    );
    assert_eq!(outcome.wait().await, ConnectionState::Failed);

    let record = h.coordinator.registry().get(&peer).unwrap();
    assert_eq!(record.last_failure, Some(DialError::Cancelled));
    assert!(h.transport.was_abandoned(&peer));
    match h.expect_event(peer, "connection_failed").await {
        ConnectionEventKind::ConnectionFailed { error, .. } => {
            assert_eq!(error.reason_code(), "cancelled");
        },
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_inbound_wins_simultaneous_open() {
    let mut h = Harness::new(DialBehaviour::Hang);
    let peer = h.discovered_peer();
    let outcome = h.coordinator.request_connect(peer).unwrap();

    let inbound = h.transport.new_handle(peer, None);
    h.coordinator
        .on_transport_event(TransportEvent::ConnectionOpened { handle: inbound.clone(), inbound: true })
        .await;

    assert_eq!(outcome.wait().await, ConnectionState::Connected);
    let record = h.coordinator.registry().get(&peer).unwrap();
    assert_eq!(record.active_connection, Some(inbound));
    assert!(h.transport.was_abandoned(&peer));
    match h.expect_event(peer, "connection_established").await {
        ConnectionEventKind::ConnectionEstablished { attempt, inbound, .. } => {
            assert_eq!(attempt, 1);
            assert!(inbound);
        },
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_duplicate_connection_is_closed() {
    let h = Harness::new(DialBehaviour::Succeed);
    let peer = h.discovered_peer();
    h.coordinator.request_connect(peer).unwrap().wait().await;
    let original = h.coordinator.registry().get(&peer).unwrap().active_connection.unwrap();

    let duplicate = h.transport.new_handle(peer, None);
    h.coordinator
        .on_transport_event(TransportEvent::ConnectionOpened {
            handle: duplicate.clone(),
            inbound: true,
        })
        .await;

    let record = h.coordinator.registry().get(&peer).unwrap();
    assert_eq!(record.active_connection, Some(original));
    assert_eq!(h.transport.closed(), vec![duplicate]);
}

#[tokio::test]
async fn test_unsolicited_inbound_registers_peer() {
    let mut h = Harness::new(DialBehaviour::Succeed);
    let peer = PeerId::random();
    let handle = h.transport.new_handle(peer, Some(addr(5000)));

    h.coordinator
        .on_transport_event(TransportEvent::ConnectionOpened { handle, inbound: true })
        .await;

    let record = h.coordinator.registry().get(&peer).unwrap();
    assert_eq!(record.connection_state, ConnectionState::Connected);
    assert_eq!(record.discovery_method, DiscoveryMethod::Inbound);
    // the send-back address of an inbound connection is not dialable
    assert!(record.addresses.is_empty());

    let names: Vec<_> = h.drain_events().iter().map(|e| e.kind().name()).collect();
    assert_eq!(names, ["peer_discovered", "connection_established"]);
}

#[tokio::test]
async fn test_late_dial_result_is_closed() {
    let h = Harness::new(DialBehaviour::Succeed);
    let peer = h.discovered_peer();
    let handle = h.transport.new_handle(peer, None);

    h.coordinator
        .on_transport_event(TransportEvent::DialSucceeded { peer_id: peer, attempt: 7, handle: handle.clone() })
        .await;

    assert_eq!(h.state(&peer), ConnectionState::Discovered);
    assert_eq!(h.transport.closed(), vec![handle]);
}

#[tokio::test]
async fn test_retry_backoff_rejects_early_retry() {
    let config = CoordinatorConfig::default().with_retry_backoff(Duration::from_secs(60));
    let h = Harness::with_config(DialBehaviour::Fail(DialError::Unreachable("no route".into())), config);
    let peer = h.discovered_peer();
    h.coordinator.request_connect(peer).unwrap().wait().await;

    match h.coordinator.request_connect(peer) {
        Err(ConnectError::BackingOff { remaining, .. }) => {
            assert!(remaining > Duration::from_secs(50));
        },
        other => panic!("expected backoff, got {other:?}"),
    }
    assert_eq!(h.transport.dial_count(&peer), 1);
}

#[tokio::test]
async fn test_reconnect_cooldown_after_disconnect() {
    let config = CoordinatorConfig::default().with_reconnect_cooldown(Duration::from_secs(60));
    let h = Harness::with_config(DialBehaviour::Succeed, config);
    let peer = h.discovered_peer();
    h.coordinator.request_connect(peer).unwrap().wait().await;
    h.coordinator.request_disconnect(peer).await.unwrap();

    let err = assert_err!(h.coordinator.request_connect(peer));
    assert_eq!(err.code(), "cooling_down");
    assert_eq!(h.state(&peer), ConnectionState::Discovered);
}

#[tokio::test]
async fn test_rediscovery_merges_without_announcing() {
    let mut h = Harness::new(DialBehaviour::Succeed);
    let peer = h.discovered_peer();
    h.coordinator.on_peer_discovered(peer, vec![addr(4002)], DiscoveryMethod::LocalBroadcast);
    h.coordinator.on_peer_discovered(peer, vec![addr(4001)], DiscoveryMethod::DistributedTable);

    let record = h.coordinator.registry().get(&peer).unwrap();
    assert_eq!(record.addresses.len(), 2);
    assert_eq!(record.discovery_method, DiscoveryMethod::LocalBroadcast);

    let discovered = h
        .drain_events()
        .iter()
        .filter(|e| e.kind().name() == "peer_discovered")
        .count();
    assert_eq!(discovered, 1);
}

#[tokio::test]
async fn test_expired_addresses_keep_the_peer() {
    let h = Harness::new(DialBehaviour::Succeed);
    let peer = h.discovered_peer();

    h.coordinator.on_discovery_event(DiscoveryEvent::Expired { peer_id: peer, addresses: vec![addr(4001)] });

    let record = h.coordinator.registry().get(&peer).unwrap();
    assert!(record.addresses.is_empty());
    assert_eq!(record.connection_state, ConnectionState::Discovered);
    assert!(matches!(
        h.coordinator.request_connect(peer),
        Err(ConnectError::UnknownPeer { .. })
    ));
}

#[tokio::test]
async fn test_manual_address_makes_peer_dialable() {
    let mut h = Harness::new(DialBehaviour::Succeed);
    let peer = PeerId::random();

    let outcome = h
        .coordinator
        .request_connect_with(peer, vec![addr(6000)], DiscoveryMethod::Manual)
        .unwrap();
    assert_eq!(outcome.wait().await, ConnectionState::Connected);

    match h.expect_event(peer, "peer_discovered").await {
        ConnectionEventKind::PeerDiscovered { method, addresses } => {
            assert_eq!(method, DiscoveryMethod::Manual);
            assert_eq!(addresses, vec![addr(6000)]);
        },
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_peer_requested_before_discovery_is_announced_once() {
    let mut h = Harness::new(DialBehaviour::Succeed);
    let peer = PeerId::random();

    let err = assert_err!(h.coordinator.request_connect(peer));
    assert_eq!(err.code(), "unknown_peer");
    assert!(h.drain_events().is_empty());

    h.coordinator.on_peer_discovered(peer, vec![addr(4001)], DiscoveryMethod::LocalBroadcast);
    h.coordinator.on_peer_discovered(peer, vec![addr(4002)], DiscoveryMethod::LocalBroadcast);

    let events = h.drain_events();
    assert_eq!(events.len(), 1);
    match events[0].kind() {
        ConnectionEventKind::PeerDiscovered { method, addresses } => {
            assert_eq!(*method, DiscoveryMethod::LocalBroadcast);
            assert_eq!(addresses, &vec![addr(4001)]);
        },
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(
        h.coordinator.registry().get(&peer).unwrap().discovery_method,
        DiscoveryMethod::LocalBroadcast
    );
    assert_ok!(h.coordinator.request_connect(peer));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_event_order_follows_transitions() {
    let mut h = Harness::new(DialBehaviour::SucceedAfter(Duration::from_millis(10)));
    let peers: Vec<PeerId> = (0..8).map(|_| h.discovered_peer()).collect();

    for peer in &peers {
        h.coordinator.request_connect(*peer).unwrap();
    }
    let registry = h.coordinator.registry().clone();
    eventually(|| registry.list_by_state(ConnectionState::Connected).len() == peers.len()).await;
    for peer in &peers {
        h.coordinator.request_disconnect(*peer).await.unwrap();
    }

    let events = h.drain_events();
    for peer in &peers {
        let names: Vec<_> =
            events.iter().filter(|e| e.peer_id() == *peer).map(|e| e.kind().name()).collect();
        assert_eq!(
            names,
            ["peer_discovered", "dial_started", "connection_established", "connection_closed"]
        );
    }
    assert_no_orphaned_handles(&h);
}
