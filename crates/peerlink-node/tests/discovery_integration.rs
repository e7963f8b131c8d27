//! Integration tests for UDP discovery between real nodes.
//!
//! # Purpose
//!
//! These tests start several complete `PeerService`s on loopback and check
//! what a user would see through `get_peers()` and the event queue.  They
//! verify:
//!
//! - Three nodes announcing to each other converge: each one lists the other
//!   two, and never itself.
//! - A node that stops announcing is evicted after the stale window and a
//!   `PeerLost` event is emitted.
//! - A rename through `update_config` reaches peers on the next broadcast.
//! - Turning discovery off at runtime releases the UDP port.
//!
//! # Port layout
//!
//! ```text
//! node            discovery (UDP)   pairing (TCP)
//! ────            ───────────────   ─────────────
//! n-th node       P                 P + 1
//! ```
//!
//! Each test owns a distinct block of ports so the tests can run in
//! parallel.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use common::{
    next_event_matching, node_config, peer_named, poll_until, start_node, wait_for_peer,
    CONVERGE_TIMEOUT,
};
use peerlink_core::ConnectionState;
use peerlink_node::application::pairing_policy::AutoAcceptPolicy;
use peerlink_node::infrastructure::storage::config::ConfigPatch;
use peerlink_node::PeerEvent;

// ── Convergence ───────────────────────────────────────────────────────────────

/// Three nodes that all announce to each other's ports end up with a
/// registry of exactly the other two.
#[tokio::test]
async fn test_three_nodes_converge() {
    // Arrange
    let ports = [47400, 47410, 47420];
    let names = ["alice", "bob", "carol"];
    let dirs: Vec<_> = names.iter().map(|_| tempfile::tempdir().unwrap()).collect();
    let mut nodes = Vec::new();
    for ((name, port), dir) in names.iter().zip(ports).zip(&dirs) {
        nodes.push(
            start_node(
                node_config(name, port, &ports),
                dir.path(),
                Arc::new(AutoAcceptPolicy),
            )
            .await,
        );
    }

    // Act
    let converged = poll_until(CONVERGE_TIMEOUT, || {
        let services: Vec<_> = nodes.iter().map(|n| Arc::clone(&n.service)).collect();
        async move {
            for service in &services {
                if service.get_peers().await.len() != 2 {
                    return None;
                }
            }
            Some(())
        }
    })
    .await;

    // Assert
    assert!(converged.is_some(), "nodes did not converge");
    for (node, own_name) in nodes.iter().zip(names) {
        let seen: BTreeSet<_> = node
            .service
            .get_peers()
            .await
            .into_iter()
            .map(|p| p.name)
            .collect();
        let expected: BTreeSet<_> = names
            .iter()
            .filter(|n| **n != own_name)
            .map(|n| n.to_string())
            .collect();
        assert_eq!(seen, expected, "registry of {own_name}");
    }

    for node in &nodes {
        node.service.stop().await;
    }
}

/// A freshly discovered peer has the pairing port it announced and starts
/// out `UNPAIRED`.
#[tokio::test]
async fn test_discovered_peer_carries_announced_pairing_port() {
    // Arrange
    let ports = [47430, 47440];
    let (dir_a, dir_b) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
    let alice = start_node(
        node_config("alice", ports[0], &ports),
        dir_a.path(),
        Arc::new(AutoAcceptPolicy),
    )
    .await;
    let bob = start_node(
        node_config("bob", ports[1], &ports),
        dir_b.path(),
        Arc::new(AutoAcceptPolicy),
    )
    .await;

    // Act
    let seen = wait_for_peer(&alice.service, "bob").await;

    // Assert
    assert_eq!(seen.id, bob.service.local_id());
    assert_eq!(seen.pairing_port, ports[1] + 1);
    assert_eq!(seen.discovery_port, ports[1]);
    assert_eq!(seen.connection_state, ConnectionState::Unpaired);
    assert!(seen.fingerprint.is_some());

    alice.service.stop().await;
    bob.service.stop().await;
}

// ── Eviction ──────────────────────────────────────────────────────────────────

/// When a node stops, its peers evict it once the stale window passes and
/// report it with `PeerLost`.
#[tokio::test]
async fn test_stopped_node_is_reported_lost() {
    // Arrange
    let ports = [47450, 47460];
    let (dir_a, dir_b) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
    let mut alice_config = node_config("alice", ports[0], &ports);
    alice_config.discovery.stale_after_ms = 500;
    let mut alice = start_node(alice_config, dir_a.path(), Arc::new(AutoAcceptPolicy)).await;
    let bob = start_node(
        node_config("bob", ports[1], &ports),
        dir_b.path(),
        Arc::new(AutoAcceptPolicy),
    )
    .await;
    let bob_id = bob.service.local_id();
    wait_for_peer(&alice.service, "bob").await;

    // Act
    bob.service.stop().await;
    let lost = next_event_matching(&mut alice.events, CONVERGE_TIMEOUT, |e| {
        matches!(e, PeerEvent::PeerLost(p) if p.id == bob_id)
    })
    .await;

    // Assert
    assert!(lost.is_some(), "no PeerLost for bob");
    assert!(peer_named(&alice.service, "bob").await.is_none());

    alice.service.stop().await;
}

// ── Runtime config changes ────────────────────────────────────────────────────

/// Renaming a node shows up in its peers' registries without a restart.
#[tokio::test]
async fn test_rename_reaches_peers() {
    // Arrange
    let ports = [47470, 47480];
    let (dir_a, dir_b) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
    let alice = start_node(
        node_config("alice", ports[0], &ports),
        dir_a.path(),
        Arc::new(AutoAcceptPolicy),
    )
    .await;
    let bob = start_node(
        node_config("bob", ports[1], &ports),
        dir_b.path(),
        Arc::new(AutoAcceptPolicy),
    )
    .await;
    let original = wait_for_peer(&bob.service, "alice").await;

    // Act
    alice
        .service
        .update_config(ConfigPatch {
            device_name: Some("alice-laptop".to_string()),
            ..ConfigPatch::default()
        })
        .await
        .unwrap();
    let renamed = wait_for_peer(&bob.service, "alice-laptop").await;

    // Assert
    assert_eq!(renamed.id, original.id);
    assert_eq!(bob.service.get_peers().await.len(), 1);

    alice.service.stop().await;
    bob.service.stop().await;
}

/// Disabling discovery closes the UDP socket; enabling it again rebinds the
/// same port.
#[tokio::test]
async fn test_toggling_discovery_releases_and_rebinds_port() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let node = start_node(
        node_config("solo", 47490, &[47490]),
        dir.path(),
        Arc::new(AutoAcceptPolicy),
    )
    .await;
    let bound = node.service.discovery_addr().await.expect("discovery running");

    // Act
    node.service
        .update_config(ConfigPatch {
            discovery_enabled: Some(false),
            ..ConfigPatch::default()
        })
        .await
        .unwrap();
    let while_off = node.service.discovery_addr().await;
    let rebound = tokio_test::assert_ok!(tokio::net::UdpSocket::bind(bound).await);
    drop(rebound);
    node.service
        .update_config(ConfigPatch {
            discovery_enabled: Some(true),
            ..ConfigPatch::default()
        })
        .await
        .unwrap();

    // Assert
    assert_eq!(while_off, None);
    assert_eq!(node.service.discovery_addr().await, Some(bound));

    node.service.stop().await;
}
