//! What this instance says about itself on the wire.

use std::net::SocketAddr;

use chrono::Utc;
use peerlink_core::{AnnounceToken, DiscoveryEnvelope, PeerId};

/// This instance's identity as presented to peers.
///
/// Shared behind a `tokio::sync::RwLock` so that a rename made through the
/// config takes effect on the next broadcast tick and the next pairing call.
#[derive(Debug, Clone)]
pub struct LocalProfile {
    pub id: PeerId,
    pub name: String,
    /// Address the pairing server is bound to.  Peers only trust the port.
    pub pairing_address: SocketAddr,
    pub announce_token: AnnounceToken,
    pub fingerprint: Option<String>,
}

impl LocalProfile {
    /// Builds the discovery envelope, stamped with the current time.
    pub fn envelope(&self) -> DiscoveryEnvelope {
        DiscoveryEnvelope {
            id: self.id,
            name: self.name.clone(),
            pairing_port: self.pairing_address.port(),
            announce_token: self.announce_token.clone(),
            timestamp: Utc::now().timestamp_millis(),
            fingerprint: self.fingerprint.clone(),
        }
    }
}
