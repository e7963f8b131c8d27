//! ManagePeersUseCase: the discovery registry and per-peer state.
//!
//! The `PeerRegistry` is this instance's in-memory view of every other
//! instance it can currently hear on the LAN.  Each entry is a
//! [`Peer`](peerlink_core::Peer) keyed by its device id.
//!
//! # Entry lifecycle
//!
//! ```text
//! announce (new id) ──► inserted as UNPAIRED
//! announce (known id) ──► address / ports / token / name refreshed,
//!                         connection state kept
//! no announce for `stale_after` ──► evicted
//! ```
//!
//! All state changes go through [`PeerRegistry::set_state`], which validates
//! the edge against [`ConnectionState::can_transition_to`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use peerlink_core::{ConnectionState, DiscoveryEnvelope, Peer, PeerId, StateError};
use thiserror::Error;

/// Error type for registry operations.
#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("peer not found: {0}")]
    NotFound(PeerId),

    #[error(transparent)]
    InvalidTransition(#[from] StateError),
}

/// Whether an announce created a new entry or refreshed an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    New,
    Updated,
}

/// In-memory registry of all peers heard on the network.
///
/// Stored behind a `tokio::sync::Mutex` and shared between the discovery
/// tasks, the pairing server, and the reconnect use case.  The lock is never
/// held across network I/O.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<PeerId, Peer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an announce received from `source`.
    ///
    /// Returns whether the peer is new, plus a snapshot of the entry after the
    /// update.
    pub fn observe(
        &mut self,
        envelope: &DiscoveryEnvelope,
        source: SocketAddr,
        now: Instant,
    ) -> (Observation, Peer) {
        match self.peers.get_mut(&envelope.id) {
            Some(peer) => {
                peer.name = envelope.name.clone();
                peer.address = source.ip();
                peer.discovery_port = source.port();
                peer.pairing_port = envelope.pairing_port;
                peer.announce_token = envelope.announce_token.clone();
                peer.fingerprint = envelope.fingerprint.clone();
                peer.last_seen = now;
                (Observation::Updated, peer.clone())
            }
            None => {
                let peer = Peer {
                    id: envelope.id,
                    name: envelope.name.clone(),
                    address: source.ip(),
                    discovery_port: source.port(),
                    pairing_port: envelope.pairing_port,
                    announce_token: envelope.announce_token.clone(),
                    fingerprint: envelope.fingerprint.clone(),
                    last_seen: now,
                    connection_state: ConnectionState::Unpaired,
                };
                self.peers.insert(peer.id, peer.clone());
                (Observation::New, peer)
            }
        }
    }

    /// Returns a snapshot of all peers, sorted by name then id.
    pub fn all(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.peers.values().cloned().collect();
        peers.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        peers
    }

    pub fn get(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    /// Finds the peer whose pairing endpoint is `endpoint`.
    pub fn find_by_endpoint(&self, endpoint: SocketAddr) -> Option<&Peer> {
        self.peers.values().find(|p| p.pairing_endpoint() == endpoint)
    }

    /// Moves a peer to `next`, returning its previous state.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if the peer is unknown (for example, it was
    /// evicted while an attempt was in flight), or
    /// [`RegistryError::InvalidTransition`] if the edge is not allowed.
    pub fn set_state(
        &mut self,
        id: PeerId,
        next: ConnectionState,
    ) -> Result<ConnectionState, RegistryError> {
        let peer = self.peers.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        let previous = peer.connection_state;
        peer.connection_state = previous.transition(next)?;
        Ok(previous)
    }

    /// Removes a peer from the registry.
    pub fn remove(&mut self, id: PeerId) -> Option<Peer> {
        self.peers.remove(&id)
    }

    /// Removes and returns every peer not seen within `window` of `now`.
    pub fn evict_stale(&mut self, now: Instant, window: Duration) -> Vec<Peer> {
        let stale: Vec<PeerId> = self
            .peers
            .values()
            .filter(|p| p.is_stale(now, window))
            .map(|p| p.id)
            .collect();
        stale
            .into_iter()
            .filter_map(|id| self.peers.remove(&id))
            .collect()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
