//! Integration tests for pairing, token authentication, and unpairing
//! between two real nodes.
//!
//! # Purpose
//!
//! Each test starts two `PeerService`s on loopback, lets them discover each
//! other, and drives the connect / disconnect / unpair operations through
//! the public API.  They verify:
//!
//! - An accepted pairing stores the same token on both sides, and the
//!   serving side can later authenticate with it.
//! - A refused pairing leaves both credential stores untouched.
//! - A wrong token is rejected by `/auth-token` without touching the
//!   server's store, and the requester recovers by pairing again.
//! - Unpairing deletes the token so the next connect has to pair.
//! - Two nodes pairing with each other at once end up with one token.
//! - Turning auto-connect back on reconnects paired peers without waiting
//!   for them to be rediscovered.
//!
//! # The reconnect flow
//!
//! ```text
//! Alice                                   Bob
//! ─────                                   ───
//! stored token for Bob?
//!   yes → POST /auth-token ─────────────► token matches Alice's record?
//!          success → CONNECTED (auth)       (store is only read)
//!          refused ↓
//!   no  → POST /pair ───────────────────► policy.decide()
//!          token ◄─────────────────────── accept: mint + store token
//!          store token → CONNECTED (pair)
//! ```

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::{
    next_event_matching, node_config, open_store, peer_named, poll_until, start_node,
    wait_for_peer, TestNode, CONVERGE_TIMEOUT,
};
use peerlink_core::protocol::messages::AuthTokenRequest;
use peerlink_core::{ConnectionState, HistoryAction, PairingToken, TokenRecord};
use peerlink_node::application::pairing_policy::{
    AutoAcceptPolicy, PairingPolicy, RejectAllPolicy,
};
use peerlink_node::application::reconnect::{ConnectMethod, PairingTransport, ReconnectOutcome};
use peerlink_node::infrastructure::network::pairing_client::PairingClient;
use peerlink_node::infrastructure::storage::config::ConfigPatch;
use peerlink_node::{PeerEvent, ServiceError};
use tempfile::TempDir;

/// Two started nodes that have discovered each other.
struct Pair {
    alice: TestNode,
    bob: TestNode,
    alice_dir: TempDir,
    bob_dir: TempDir,
    ports: [u16; 2],
}

impl Pair {
    async fn start(ports: [u16; 2], bob_policy: Arc<dyn PairingPolicy>) -> Self {
        let alice_dir = tempfile::tempdir().unwrap();
        let bob_dir = tempfile::tempdir().unwrap();
        let alice = start_node(
            node_config("alice", ports[0], &ports),
            alice_dir.path(),
            Arc::new(AutoAcceptPolicy),
        )
        .await;
        let bob = start_node(
            node_config("bob", ports[1], &ports),
            bob_dir.path(),
            bob_policy,
        )
        .await;
        wait_for_peer(&alice.service, "bob").await;
        wait_for_peer(&bob.service, "alice").await;
        Self {
            alice,
            bob,
            alice_dir,
            bob_dir,
            ports,
        }
    }

    /// Where Alice's pairing server listens, as Bob records it.
    fn alice_endpoint(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], self.ports[0] + 1))
    }

    fn bob_endpoint(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], self.ports[1] + 1))
    }

    async fn alice_token_for_bob(&self) -> Option<TokenRecord> {
        open_store(self.alice_dir.path(), &node_config("alice", self.ports[0], &[]))
            .get(self.bob_endpoint())
            .await
            .unwrap()
    }

    async fn bob_token_for_alice(&self) -> Option<TokenRecord> {
        open_store(self.bob_dir.path(), &node_config("bob", self.ports[1], &[]))
            .get(self.alice_endpoint())
            .await
            .unwrap()
    }

    async fn stop(self) {
        self.alice.service.stop().await;
        self.bob.service.stop().await;
    }
}

fn expect_connected(outcome: ReconnectOutcome) -> ConnectMethod {
    match outcome {
        ReconnectOutcome::Connected { peer, method } => {
            assert_eq!(peer.connection_state, ConnectionState::Connected);
            method
        }
        other => panic!("expected Connected, got {other:?}"),
    }
}

// ── Pairing ───────────────────────────────────────────────────────────────────

/// The first connect pairs; both nodes then hold the same token, and the
/// serving side can authenticate back with it.
#[tokio::test]
async fn test_accepted_pairing_stores_matching_tokens_on_both_sides() {
    // Arrange
    let mut pair = Pair::start([47500, 47510], Arc::new(AutoAcceptPolicy)).await;
    let bob_id = pair.bob.service.local_id();
    let alice_id = pair.alice.service.local_id();

    // Act
    let outcome = pair.alice.service.connect_to_peer(bob_id).await.unwrap();

    // Assert
    assert_eq!(expect_connected(outcome), ConnectMethod::Pair);
    let connected = next_event_matching(&mut pair.alice.events, Duration::from_secs(1), |e| {
        matches!(e, PeerEvent::PeerConnected(p) if p.id == bob_id)
    })
    .await;
    assert!(connected.is_some(), "no PeerConnected event");

    let alice_record = pair.alice_token_for_bob().await.expect("alice stored a token");
    let bob_record = pair.bob_token_for_alice().await.expect("bob stored a token");
    assert_eq!(alice_record.token, bob_record.token);

    let alice_on_bob = common::peer_named(&pair.bob.service, "alice").await.unwrap();
    assert_eq!(alice_on_bob.connection_state, ConnectionState::Paired);

    // Bob never called /pair, but already holds a token Alice accepts.
    let back = pair.bob.service.connect_to_peer(alice_id).await.unwrap();
    assert_eq!(expect_connected(back), ConnectMethod::Auth);

    pair.stop().await;
}

/// Both nodes pair with each other at the same moment.  The crossed
/// requests are answered with 409, one side pairs after backing off, the
/// other authenticates with the token that pairing left behind.
#[tokio::test]
async fn test_simultaneous_pairing_converges_on_one_token() {
    // Arrange
    let pair = Pair::start([47620, 47630], Arc::new(AutoAcceptPolicy)).await;
    let bob_id = pair.bob.service.local_id();
    let alice_id = pair.alice.service.local_id();

    // Act
    let (from_alice, from_bob) = tokio::join!(
        pair.alice.service.connect_to_peer(bob_id),
        pair.bob.service.connect_to_peer(alice_id),
    );

    // Assert
    let methods = [
        expect_connected(from_alice.unwrap()),
        expect_connected(from_bob.unwrap()),
    ];
    assert!(methods.contains(&ConnectMethod::Pair), "{methods:?}");
    let alice_record = pair.alice_token_for_bob().await.expect("alice stored a token");
    let bob_record = pair.bob_token_for_alice().await.expect("bob stored a token");
    assert_eq!(alice_record.token, bob_record.token);

    pair.stop().await;
}

/// A refused pairing fails the connect and writes nothing on either side.
#[tokio::test]
async fn test_rejected_pairing_mutates_neither_store() {
    // Arrange
    let pair = Pair::start([47520, 47530], Arc::new(RejectAllPolicy)).await;
    let bob_id = pair.bob.service.local_id();

    // Act
    let outcome = pair.alice.service.connect_to_peer(bob_id).await.unwrap();

    // Assert
    let ReconnectOutcome::Failed { peer, .. } = outcome else {
        panic!("expected Failed, got {outcome:?}");
    };
    assert_eq!(peer.connection_state, ConnectionState::Unpaired);
    assert!(pair.alice_token_for_bob().await.is_none());
    assert!(pair.bob_token_for_alice().await.is_none());

    let refused = pair
        .bob
        .service
        .get_connection_history()
        .await
        .into_iter()
        .any(|e| e.action == HistoryAction::Pair && !e.success && e.peer_name == "alice");
    assert!(refused, "bob did not record the refused pairing");

    let last = pair.alice.service.get_connection_history().await.pop().unwrap();
    assert_eq!(
        (last.peer_name.as_str(), last.action, last.success),
        ("bob", HistoryAction::Pair, false)
    );

    pair.stop().await;
}

/// Turning off incoming pairing refuses `/pair` even under an accepting
/// policy.
#[tokio::test]
async fn test_pairing_refused_while_incoming_disabled() {
    // Arrange
    let pair = Pair::start([47540, 47550], Arc::new(AutoAcceptPolicy)).await;
    let bob_id = pair.bob.service.local_id();
    pair.bob
        .service
        .update_config(ConfigPatch {
            allow_incoming: Some(false),
            ..ConfigPatch::default()
        })
        .await
        .unwrap();

    // Act
    let outcome = pair.alice.service.connect_to_peer(bob_id).await.unwrap();

    // Assert
    assert!(matches!(outcome, ReconnectOutcome::Failed { .. }));
    assert!(pair.bob_token_for_alice().await.is_none());

    pair.stop().await;
}

// ── Authentication ────────────────────────────────────────────────────────────

/// A wrong token is refused without changing the server's records; the
/// requester then falls back to pairing and both sides converge on the new
/// token.
#[tokio::test]
async fn test_wrong_token_is_refused_and_repairing_recovers() {
    // Arrange
    let pair = Pair::start([47560, 47570], Arc::new(AutoAcceptPolicy)).await;
    let bob_id = pair.bob.service.local_id();
    let alice_id = pair.alice.service.local_id();
    expect_connected(pair.alice.service.connect_to_peer(bob_id).await.unwrap());
    let bob_store = open_store(pair.bob_dir.path(), &node_config("bob", 47570, &[]));
    let before = bob_store.all().await.unwrap();

    // Act: a forged /auth-token straight at Bob.
    let client = PairingClient::new(Duration::from_secs(2)).unwrap();
    let response = client
        .authenticate(
            pair.bob_endpoint(),
            AuthTokenRequest {
                requester_id: alice_id,
                token: PairingToken::generate(),
                requester_address: Some(pair.alice_endpoint().to_string()),
            },
        )
        .await;

    // Assert
    let response = tokio_test::assert_ok!(response);
    assert!(!response.success);
    assert_eq!(response.reason.as_deref(), Some("token mismatch"));
    assert_eq!(bob_store.all().await.unwrap(), before);

    // Act: Alice's own copy goes stale, then she reconnects.
    let alice_store = open_store(pair.alice_dir.path(), &node_config("alice", 47560, &[]));
    alice_store
        .put(TokenRecord::new(
            pair.bob_endpoint(),
            PairingToken::generate(),
            None,
        ))
        .await
        .unwrap();
    pair.alice.service.disconnect_from_peer(bob_id).await.unwrap();
    let outcome = pair.alice.service.connect_to_peer(bob_id).await.unwrap();

    // Assert
    assert_eq!(expect_connected(outcome), ConnectMethod::Pair);
    let history = pair.alice.service.get_connection_history().await;
    let tail: Vec<_> = history
        .iter()
        .rev()
        .take(2)
        .map(|e| (e.action, e.success))
        .collect();
    assert_eq!(tail, vec![(HistoryAction::Pair, true), (HistoryAction::Auth, false)]);

    let alice_record = pair.alice_token_for_bob().await.unwrap();
    let bob_record = pair.bob_token_for_alice().await.unwrap();
    assert_eq!(alice_record.token, bob_record.token);
    assert_ne!(bob_record.token, before[0].token);

    pair.stop().await;
}

/// Disconnecting keeps the token, so the next connect authenticates.
#[tokio::test]
async fn test_disconnect_keeps_token_for_auth() {
    // Arrange
    let pair = Pair::start([47580, 47590], Arc::new(AutoAcceptPolicy)).await;
    let bob_id = pair.bob.service.local_id();

    // Disconnecting a peer that is not connected is an invalid transition.
    let premature = pair.alice.service.disconnect_from_peer(bob_id).await;
    assert!(matches!(premature, Err(ServiceError::InvalidTransition(_))));

    expect_connected(pair.alice.service.connect_to_peer(bob_id).await.unwrap());

    // Act
    let peer = pair.alice.service.disconnect_from_peer(bob_id).await.unwrap();
    let outcome = pair.alice.service.connect_to_peer(bob_id).await.unwrap();

    // Assert
    assert_eq!(peer.connection_state, ConnectionState::Paired);
    assert_eq!(expect_connected(outcome), ConnectMethod::Auth);

    pair.stop().await;
}

// ── Unpairing ─────────────────────────────────────────────────────────────────

/// Unpairing removes the token and forces the peer back to `UNPAIRED`; the
/// next connect has to pair again.
#[tokio::test]
async fn test_unpair_forces_fresh_pairing() {
    // Arrange
    let mut pair = Pair::start([47600, 47610], Arc::new(AutoAcceptPolicy)).await;
    let bob_id = pair.bob.service.local_id();
    expect_connected(pair.alice.service.connect_to_peer(bob_id).await.unwrap());

    // Act
    let removed = pair.alice.service.unpair_device(bob_id).await.unwrap();

    // Assert
    assert!(removed);
    assert!(pair.alice_token_for_bob().await.is_none());
    let bob = common::peer_named(&pair.alice.service, "bob").await.unwrap();
    assert_eq!(bob.connection_state, ConnectionState::Unpaired);
    let disconnected = next_event_matching(&mut pair.alice.events, Duration::from_secs(1), |e| {
        matches!(e, PeerEvent::PeerDisconnected(p) if p.id == bob_id)
    })
    .await;
    assert!(disconnected.is_some(), "no PeerDisconnected after unpair");

    assert!(!pair.alice.service.unpair_device(bob_id).await.unwrap());

    let outcome = pair.alice.service.connect_to_peer(bob_id).await.unwrap();
    assert_eq!(expect_connected(outcome), ConnectMethod::Pair);

    pair.stop().await;
}

// ── Auto-connect ──────────────────────────────────────────────────────────────

/// A node restarted with auto-connect off leaves its paired peer alone;
/// switching auto-connect on reconnects it through the stored token.
#[tokio::test]
async fn test_enabling_auto_connect_reconnects_paired_peer() {
    // Arrange
    let pair = Pair::start([47640, 47650], Arc::new(AutoAcceptPolicy)).await;
    let bob_id = pair.bob.service.local_id();
    expect_connected(pair.alice.service.connect_to_peer(bob_id).await.unwrap());
    pair.alice.service.stop().await;
    let Pair {
        alice,
        bob,
        alice_dir,
        bob_dir: _bob_dir,
        ports,
    } = pair;
    drop(alice);

    let mut config = node_config("alice", ports[0], &ports);
    config.pairing.auto_connect = false;
    let alice = start_node(config, alice_dir.path(), Arc::new(AutoAcceptPolicy)).await;
    wait_for_peer(&alice.service, "bob").await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    let idle = peer_named(&alice.service, "bob").await.unwrap();
    assert_ne!(idle.connection_state, ConnectionState::Connected);

    // Act
    alice
        .service
        .update_config(ConfigPatch {
            auto_connect: Some(true),
            ..ConfigPatch::default()
        })
        .await
        .unwrap();

    // Assert
    let connected = poll_until(CONVERGE_TIMEOUT, || {
        let service = Arc::clone(&alice.service);
        async move {
            let bob = peer_named(&service, "bob").await?;
            (bob.connection_state == ConnectionState::Connected).then_some(())
        }
    })
    .await;
    assert!(connected.is_some(), "bob was not reconnected");
    let history = alice.service.get_connection_history().await;
    assert!(history
        .iter()
        .any(|e| e.peer_name == "bob" && e.action == HistoryAction::Auth && e.success));

    alice.service.stop().await;
    bob.service.stop().await;
}
