//! Command bridge: exposes `PeerService` operations to a host UI over IPC.
//!
//! Every command function takes the shared [`PeerService`] and returns a
//! [`CommandResult`], so the host can forward the value as JSON without
//! knowing any Rust error types.  This module is the only consumer-facing
//! surface; the application layer never imports it.
//!
//! # Data Transfer Objects (DTOs)
//!
//! Internal types such as `Peer` carry an `Instant` and a `Uuid`, which do
//! not map cleanly to JSON.  The DTOs below hold only strings, numbers, and
//! booleans, with camelCase field names for a JavaScript frontend.
//!
//! # `CommandResult<T>` wrapper
//!
//! All commands return `CommandResult<T>` rather than `Result<T, E>`, so that
//! every response has the same shape:
//! `{ success: bool, data: T | null, error: string | null }`.

use std::sync::Arc;
use std::time::Instant;

use peerlink_core::{ConnectionHistoryEntry, Peer, PeerId};
use serde::{Deserialize, Serialize};

use crate::application::reconnect::ReconnectOutcome;
use crate::infrastructure::service::PeerService;
use crate::infrastructure::storage::config::ConfigPatch;

// ── Data Transfer Objects ─────────────────────────────────────────────────────

/// One discovered peer as shown in the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerDto {
    pub id: String,
    pub name: String,
    pub address: String,
    pub pairing_port: u16,
    pub connection_state: String,
    pub fingerprint: Option<String>,
    /// Milliseconds since the last announce.
    pub last_seen_ms_ago: u64,
}

impl PeerDto {
    pub fn from_peer(peer: &Peer, now: Instant) -> Self {
        Self {
            id: peer.id.to_string(),
            name: peer.name.clone(),
            address: peer.address.to_string(),
            pairing_port: peer.pairing_port,
            connection_state: peer.connection_state.to_string(),
            fingerprint: peer.fingerprint.clone(),
            last_seen_ms_ago: u64::try_from(
                now.saturating_duration_since(peer.last_seen).as_millis(),
            )
            .unwrap_or(u64::MAX),
        }
    }
}

/// One connection history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntryDto {
    pub peer_name: String,
    pub action: String,
    pub success: bool,
    /// RFC 3339 UTC timestamp.
    pub timestamp: String,
}

impl From<&ConnectionHistoryEntry> for HistoryEntryDto {
    fn from(e: &ConnectionHistoryEntry) -> Self {
        Self {
            peer_name: e.peer_name.clone(),
            action: serde_json::to_value(e.action)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default(),
            success: e.success,
            timestamp: e.timestamp.to_rfc3339(),
        }
    }
}

/// Result of a connect command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResultDto {
    pub connected: bool,
    /// `"auth"`, `"pair"`, or `null` if not connected by this call.
    pub method: Option<String>,
    pub reason: Option<String>,
    pub peer: PeerDto,
}

impl ConnectResultDto {
    fn from_outcome(outcome: &ReconnectOutcome, now: Instant) -> Self {
        match outcome {
            ReconnectOutcome::AlreadyConnected(peer) => Self {
                connected: true,
                method: None,
                reason: None,
                peer: PeerDto::from_peer(peer, now),
            },
            ReconnectOutcome::Connected { peer, method } => Self {
                connected: true,
                method: Some(format!("{method:?}").to_lowercase()),
                reason: None,
                peer: PeerDto::from_peer(peer, now),
            },
            ReconnectOutcome::Failed { peer, reason } => Self {
                connected: false,
                method: None,
                reason: Some(reason.clone()),
                peer: PeerDto::from_peer(peer, now),
            },
        }
    }
}

/// Unified response wrapper used by every command.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandResult<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> CommandResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

impl<T: Serialize, E: std::fmt::Display> From<Result<T, E>> for CommandResult<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::err(e.to_string()),
        }
    }
}

fn parse_peer_id(id: &str) -> Result<PeerId, String> {
    id.parse::<PeerId>()
        .map_err(|e| format!("invalid peer id {id:?}: {e}"))
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// Returns every peer currently heard on the network.
///
/// # Example (frontend)
/// ```ts
/// const peers = await invoke<PeerDto[]>('get_peers');
/// ```
pub async fn get_peers(service: Arc<PeerService>) -> CommandResult<Vec<PeerDto>> {
    let now = Instant::now();
    let peers = service.get_peers().await;
    CommandResult::ok(peers.iter().map(|p| PeerDto::from_peer(p, now)).collect())
}

/// Authenticates with (or pairs with) the peer.
pub async fn connect_to_peer(
    service: Arc<PeerService>,
    id: String,
) -> CommandResult<ConnectResultDto> {
    let id = match parse_peer_id(&id) {
        Ok(id) => id,
        Err(e) => return CommandResult::err(e),
    };
    service
        .connect_to_peer(id)
        .await
        .map(|outcome| ConnectResultDto::from_outcome(&outcome, Instant::now()))
        .into()
}

pub async fn disconnect_from_peer(service: Arc<PeerService>, id: String) -> CommandResult<PeerDto> {
    let id = match parse_peer_id(&id) {
        Ok(id) => id,
        Err(e) => return CommandResult::err(e),
    };
    service
        .disconnect_from_peer(id)
        .await
        .map(|peer| PeerDto::from_peer(&peer, Instant::now()))
        .into()
}

/// Forgets the stored token.  `data` is `true` if one existed.
pub async fn unpair_device(service: Arc<PeerService>, id: String) -> CommandResult<bool> {
    let id = match parse_peer_id(&id) {
        Ok(id) => id,
        Err(e) => return CommandResult::err(e),
    };
    service.unpair_device(id).await.into()
}

/// Endpoints with a stored token, as `ip:port` strings.  Includes peers that
/// are not currently discovered.
pub async fn get_paired_endpoints(service: Arc<PeerService>) -> CommandResult<Vec<String>> {
    service
        .paired_endpoints()
        .await
        .map(|endpoints| endpoints.iter().map(ToString::to_string).collect())
        .into()
}

/// Forgets the stored token for `address` (`ip:port`), discovered or not.
pub async fn forget_paired_endpoint(
    service: Arc<PeerService>,
    address: String,
) -> CommandResult<bool> {
    let endpoint = match address.parse::<std::net::SocketAddr>() {
        Ok(endpoint) => endpoint,
        Err(e) => return CommandResult::err(format!("invalid address {address:?}: {e}")),
    };
    service.forget_credential(endpoint).await.into()
}

pub async fn get_connection_history(
    service: Arc<PeerService>,
) -> CommandResult<Vec<HistoryEntryDto>> {
    let entries = service.get_connection_history().await;
    CommandResult::ok(entries.iter().map(HistoryEntryDto::from).collect())
}

/// Applies a partial settings change from the UI.
pub async fn update_config(service: Arc<PeerService>, patch: ConfigPatch) -> CommandResult<()> {
    service.update_config(patch).await.map(|_| ()).into()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
