//! The [`Peer`] entity: another PeerLink instance seen on the network.

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::domain::credential::AnnounceToken;
use crate::domain::state::ConnectionState;

/// Stable identifier of a PeerLink instance (its persisted device id).
pub type PeerId = Uuid;

/// A peer as tracked by the discovery registry.
///
/// The registry creates a `Peer` on the first announce carrying a new `id`
/// and refreshes it on every later announce.  `last_seen` is a monotonic
/// instant so that eviction is immune to wall-clock jumps.
#[derive(Debug, Clone, PartialEq)]
pub struct Peer {
    pub id: PeerId,
    pub name: String,
    /// IP address the last announce was received from.
    pub address: IpAddr,
    /// UDP source port of the last announce.
    pub discovery_port: u16,
    /// TCP port the peer serves `/pair` and `/auth-token` on.
    pub pairing_port: u16,
    pub announce_token: AnnounceToken,
    /// Machine fingerprint advertised by the peer, if any.  Identity hint only.
    pub fingerprint: Option<String>,
    pub last_seen: Instant,
    pub connection_state: ConnectionState,
}

impl Peer {
    /// Address of the peer's pairing/auth HTTP server.
    ///
    /// This is also the key under which the peer's pairing token is stored.
    pub fn pairing_endpoint(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.pairing_port)
    }

    /// Address of the peer's discovery socket.
    pub fn discovery_endpoint(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.discovery_port)
    }

    /// Returns `true` when the peer has not announced itself within `window`.
    pub fn is_stale(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > window
    }
}
