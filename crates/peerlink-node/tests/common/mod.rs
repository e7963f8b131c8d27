//! Helpers shared by the node integration tests.
//!
//! Every test node binds loopback only, announces to an explicit list of
//! ports instead of a LAN broadcast address, and uses a tiny Argon2 cost so
//! opening the credential store does not dominate the run time.
//!
//! Each test picks its own port block.  Tests in one binary run in parallel
//! threads, so two tests must never share a port.

#![allow(dead_code)]

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use peerlink_core::Peer;
use peerlink_node::application::pairing_policy::PairingPolicy;
use peerlink_node::infrastructure::identity;
use peerlink_node::infrastructure::storage::config::AppConfig;
use peerlink_node::infrastructure::storage::credential_store::CredentialStore;
use peerlink_node::{PeerEvent, PeerService, ServiceOptions};
use tokio::sync::mpsc;

/// Upper bound for anything that depends on a discovery round trip.
pub const CONVERGE_TIMEOUT: Duration = Duration::from_secs(5);

/// A started node plus the receiving end of its event queue.
pub struct TestNode {
    pub service: Arc<PeerService>,
    pub events: mpsc::Receiver<PeerEvent>,
}

/// Config for a loopback node that listens for discovery on `port`, serves
/// pairing on `port + 1`, and announces to every port in `announce_to`.
pub fn node_config(name: &str, port: u16, announce_to: &[u16]) -> AppConfig {
    let mut config = AppConfig::default();
    config.device.name = name.to_string();
    config.discovery.bind_address = "127.0.0.1".to_string();
    config.discovery.broadcast_address = "127.0.0.1".to_string();
    config.discovery.port = port;
    config.discovery.port_attempts = 1;
    config.discovery.broadcast_ports = announce_to.to_vec();
    config.discovery.interval_ms = 100;
    config.discovery.stale_after_ms = 2_000;
    config.pairing.request_timeout_ms = 2_000;
    config.pairing.reconnect_interval_ms = 60_000;
    config.security.kdf_memory_kib = 1024;
    config.security.kdf_iterations = 1;
    config.security.kdf_parallelism = 1;
    config
}

/// Creates and starts a node.  Panics if anything fails to bind.
pub async fn start_node(
    config: AppConfig,
    data_dir: &Path,
    policy: Arc<dyn PairingPolicy>,
) -> TestNode {
    let (service, events) = PeerService::new(ServiceOptions {
        config,
        config_path: None,
        data_dir: data_dir.to_path_buf(),
        policy,
    })
    .expect("node initialises");
    service.start().await.expect("node starts");
    TestNode { service, events }
}

/// Polls `check` every 50 ms until it yields `Some`, or `timeout` passes.
pub async fn poll_until<T, F, Fut>(timeout: Duration, mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(value) = check().await {
            return Some(value);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// The registry entry named `name`, if `service` has heard it.
pub async fn peer_named(service: &PeerService, name: &str) -> Option<Peer> {
    service.get_peers().await.into_iter().find(|p| p.name == name)
}

/// Waits until `service` has discovered a peer named `name`.
pub async fn wait_for_peer(service: &PeerService, name: &str) -> Peer {
    poll_until(CONVERGE_TIMEOUT, || peer_named(service, name))
        .await
        .unwrap_or_else(|| panic!("{name} was not discovered within {CONVERGE_TIMEOUT:?}"))
}

/// Receives events until one satisfies `pred`, or `timeout` passes.
pub async fn next_event_matching(
    events: &mut mpsc::Receiver<PeerEvent>,
    timeout: Duration,
    mut pred: impl FnMut(&PeerEvent) -> bool,
) -> Option<PeerEvent> {
    tokio::time::timeout(timeout, async {
        while let Some(event) = events.recv().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

/// A second handle on a node's credential file, keyed by the same device
/// secret.  Reads see whatever the node has written so far.
pub fn open_store(data_dir: &Path, config: &AppConfig) -> CredentialStore {
    let identity = identity::load_or_create(data_dir).expect("identity readable");
    CredentialStore::open_in(data_dir, identity.secret(), &config.kdf_params())
}
