//! ReconnectUseCase: re-establish trust with a known peer, or pair with a new one.
//!
//! # Algorithm
//!
//! ```text
//! token on file? ──yes──► PAIRED ─► AUTHENTICATING ─► /auth-token
//!      │                                   │ ok: CONNECTED (done)
//!      │                                   │ fail/timeout: AUTH_FAILED
//!      no                                  ▼
//!      └──────────────────────────► PAIRING_REQUESTED ─► /pair
//!                                          │ ok: store token, CONNECTED
//!                                          │ fail: UNPAIRED (no prior token)
//!                                          │       AUTH_FAILED (prior token)
//! ```
//!
//! A peer that is already `CONNECTED` short-circuits; a peer with an attempt
//! in flight is refused with [`ReconnectError::AttemptInProgress`].
//!
//! The registry lock is taken only for the state checks and transitions,
//! never across an HTTP call.  Timeouts are enforced by the transport and
//! count as a failed attempt.
//!
//! # Crossed pairing requests
//!
//! When both nodes pair with each other at the same moment, each responder
//! sees its own outbound `/pair` in flight and answers `409 Conflict`
//! ([`PairingClientError::Conflict`]).  The whole attempt is then re-run after
//! a back-off that depends on which device id is lower: the lower id retries
//! first and pairs, the higher id retries later, finds the token the lower
//! one left in its store, and authenticates with it.  This is the only retry
//! inside one call to [`ReconnectUseCase::connect`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use peerlink_core::protocol::messages::{
    AuthTokenRequest, AuthTokenResponse, PairRequest, PairResponse,
};
use peerlink_core::{
    ConnectionHistory, ConnectionState, HistoryAction, Peer, PeerId, TokenRecord,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::application::credentials::CredentialRepository;
use crate::application::local_profile::LocalProfile;
use crate::application::manage_peers::{PeerRegistry, RegistryError};

/// Errors produced by a pairing/auth HTTP call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PairingClientError {
    #[error("request timed out")]
    Timeout,

    #[error("could not reach peer: {0}")]
    Connect(String),

    /// Non-success status with a body that is not a protocol response.
    #[error("unexpected HTTP status {0}")]
    Http(u16),

    #[error("invalid response body: {0}")]
    Decode(String),

    /// The peer is pairing with us at the same time.
    #[error("peer has its own pairing request in flight")]
    Conflict,
}

/// Re-runs allowed after a [`PairingClientError::Conflict`].
const MAX_CONFLICT_RETRIES: u32 = 2;

/// Back-off before re-running a crossed attempt.  The node with the lower id
/// waits less, so it pairs while the other side is idle.
pub fn conflict_backoff(local_id: PeerId, peer_id: PeerId) -> Duration {
    if local_id < peer_id {
        Duration::from_millis(100)
    } else {
        Duration::from_millis(400)
    }
}

/// Result of one pass through the algorithm.
enum Attempt {
    Done(ReconnectOutcome),
    /// Pairing failed because the peer was pairing with us.
    Crossed(ReconnectOutcome),
}

/// Outbound side of the pairing protocol.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PairingTransport: Send + Sync {
    /// `POST /pair` to `endpoint`.  A refusal is `Ok` with `success: false`.
    async fn pair(
        &self,
        endpoint: SocketAddr,
        request: PairRequest,
    ) -> Result<PairResponse, PairingClientError>;

    /// `POST /auth-token` to `endpoint`.  A rejection is `Ok` with
    /// `success: false`.
    async fn authenticate(
        &self,
        endpoint: SocketAddr,
        request: AuthTokenRequest,
    ) -> Result<AuthTokenResponse, PairingClientError>;
}

/// Error type for [`ReconnectUseCase::connect`].
#[derive(Debug, Error, PartialEq)]
pub enum ReconnectError {
    #[error("peer not found: {0}")]
    PeerNotFound(PeerId),

    #[error("a pairing or auth attempt for {0} is already in progress")]
    AttemptInProgress(PeerId),

    #[error(transparent)]
    InvalidTransition(#[from] peerlink_core::StateError),
}

impl From<RegistryError> for ReconnectError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(id) => ReconnectError::PeerNotFound(id),
            RegistryError::InvalidTransition(e) => ReconnectError::InvalidTransition(e),
        }
    }
}

/// How a successful attempt got to `CONNECTED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMethod {
    /// The stored token was accepted by `/auth-token`.
    Auth,
    /// A fresh token was obtained from `/pair`.
    Pair,
}

/// Result of one reconnect attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectOutcome {
    AlreadyConnected(Peer),
    Connected { peer: Peer, method: ConnectMethod },
    /// Both auth (if attempted) and pairing failed.  The peer's state
    /// reflects the failure.
    Failed { peer: Peer, reason: String },
}

/// Runs the reconnect algorithm against one peer.
pub struct ReconnectUseCase {
    registry: Arc<Mutex<PeerRegistry>>,
    history: Arc<Mutex<ConnectionHistory>>,
    credentials: Arc<dyn CredentialRepository>,
    transport: Arc<dyn PairingTransport>,
}

impl ReconnectUseCase {
    pub fn new(
        registry: Arc<Mutex<PeerRegistry>>,
        history: Arc<Mutex<ConnectionHistory>>,
        credentials: Arc<dyn CredentialRepository>,
        transport: Arc<dyn PairingTransport>,
    ) -> Self {
        Self {
            registry,
            history,
            credentials,
            transport,
        }
    }

    /// Authenticates with (or pairs with) the peer `peer_id`.
    ///
    /// # Errors
    ///
    /// - [`ReconnectError::PeerNotFound`] if the peer is not (or no longer) in
    ///   the registry.
    /// - [`ReconnectError::AttemptInProgress`] if another attempt is running.
    ///
    /// Network failures are not errors: they yield
    /// [`ReconnectOutcome::Failed`].
    pub async fn connect(
        &self,
        peer_id: PeerId,
        local: &LocalProfile,
    ) -> Result<ReconnectOutcome, ReconnectError> {
        let mut retries = 0;
        loop {
            match self.attempt(peer_id, local).await? {
                Attempt::Done(outcome) => return Ok(outcome),
                Attempt::Crossed(outcome) if retries >= MAX_CONFLICT_RETRIES => {
                    return Ok(outcome)
                }
                Attempt::Crossed(_) => {
                    retries += 1;
                    let wait = conflict_backoff(local.id, peer_id);
                    debug!(
                        "pairing with {peer_id} crossed an incoming request, retrying in {wait:?}"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    async fn attempt(
        &self,
        peer_id: PeerId,
        local: &LocalProfile,
    ) -> Result<Attempt, ReconnectError> {
        let endpoint = {
            let registry = self.registry.lock().await;
            let peer = registry
                .get(peer_id)
                .ok_or(ReconnectError::PeerNotFound(peer_id))?;
            if peer.connection_state == ConnectionState::Connected {
                return Ok(Attempt::Done(ReconnectOutcome::AlreadyConnected(peer.clone())));
            }
            peer.pairing_endpoint()
        };

        let stored = match self.credentials.get(endpoint).await {
            Ok(record) => record,
            Err(e) => {
                warn!("credential lookup for {endpoint} failed, treating as unpaired: {e}");
                None
            }
        };
        let had_token = stored.is_some();

        if let Some(record) = stored {
            let peer = self.begin_auth(peer_id).await?;
            if let Some(peer) = peer {
                return Ok(Attempt::Done(ReconnectOutcome::AlreadyConnected(peer)));
            }
            match self.try_auth(peer_id, endpoint, &record, local).await? {
                Some(peer) => {
                    return Ok(Attempt::Done(ReconnectOutcome::Connected {
                        peer,
                        method: ConnectMethod::Auth,
                    }))
                }
                None => debug!("auth with {endpoint} failed, falling back to pairing"),
            }
        }

        self.pair(peer_id, endpoint, had_token, local).await
    }

    /// Claims the peer for an auth attempt: `→ PAIRED` if needed, then
    /// `→ AUTHENTICATING`.  Returns `Some(peer)` if it turned out to be
    /// connected already.
    async fn begin_auth(&self, peer_id: PeerId) -> Result<Option<Peer>, ReconnectError> {
        let mut registry = self.registry.lock().await;
        let peer = registry
            .get(peer_id)
            .ok_or(ReconnectError::PeerNotFound(peer_id))?;
        let state = peer.connection_state;
        match state {
            ConnectionState::Connected => return Ok(Some(peer.clone())),
            s if s.is_attempt_in_progress() => {
                return Err(ReconnectError::AttemptInProgress(peer_id))
            }
            ConnectionState::Unpaired | ConnectionState::AuthFailed => {
                registry.set_state(peer_id, ConnectionState::Paired)?;
            }
            _ => {}
        }
        registry.set_state(peer_id, ConnectionState::Authenticating)?;
        Ok(None)
    }

    /// Calls `/auth-token`.  Returns the connected peer on success, or `None`
    /// after moving the peer to `AUTH_FAILED`.
    async fn try_auth(
        &self,
        peer_id: PeerId,
        endpoint: SocketAddr,
        record: &TokenRecord,
        local: &LocalProfile,
    ) -> Result<Option<Peer>, ReconnectError> {
        let request = AuthTokenRequest {
            requester_id: local.id,
            token: record.token.clone(),
            requester_address: Some(local.pairing_address.to_string()),
        };

        let accepted = match self.transport.authenticate(endpoint, request).await {
            Ok(resp) if resp.success => true,
            Ok(resp) => {
                info!(
                    "peer {endpoint} rejected stored token: {}",
                    resp.reason.as_deref().unwrap_or("no reason given")
                );
                false
            }
            Err(e) => {
                warn!("auth request to {endpoint} failed: {e}");
                false
            }
        };

        let next = if accepted {
            ConnectionState::Connected
        } else {
            ConnectionState::AuthFailed
        };
        let peer = self.finish(peer_id, next, HistoryAction::Auth, accepted).await?;
        if accepted {
            info!("authenticated with {} ({endpoint})", peer.name);
            Ok(Some(peer))
        } else {
            Ok(None)
        }
    }

    async fn pair(
        &self,
        peer_id: PeerId,
        endpoint: SocketAddr,
        had_token: bool,
        local: &LocalProfile,
    ) -> Result<Attempt, ReconnectError> {
        let fingerprint = {
            let mut registry = self.registry.lock().await;
            let peer = registry
                .get(peer_id)
                .ok_or(ReconnectError::PeerNotFound(peer_id))?;
            let state = peer.connection_state;
            match state {
                ConnectionState::Connected => {
                    return Ok(Attempt::Done(ReconnectOutcome::AlreadyConnected(peer.clone())))
                }
                s if s.is_attempt_in_progress() => {
                    return Err(ReconnectError::AttemptInProgress(peer_id))
                }
                _ => {}
            }
            let fingerprint = peer.fingerprint.clone();
            registry.set_state(peer_id, ConnectionState::PairingRequested)?;
            fingerprint
        };

        let request = PairRequest {
            requester_id: local.id,
            requester_name: local.name.clone(),
            requester_address: local.pairing_address.to_string(),
            announce_token: local.announce_token.clone(),
            requester_fingerprint: local.fingerprint.clone(),
        };

        let mut crossed = false;
        let failure = match self.transport.pair(endpoint, request).await {
            Ok(PairResponse {
                success: true,
                token: Some(token),
                ..
            }) => {
                let record = TokenRecord::new(endpoint, token, fingerprint);
                if let Err(e) = self.credentials.put(record).await {
                    // The session is valid; the next reconnect will re-pair.
                    warn!("failed to store pairing token for {endpoint}: {e}");
                }
                None
            }
            Ok(PairResponse { success: true, .. }) => {
                Some("pair response did not include a token".to_string())
            }
            Ok(resp) => Some(resp.message),
            Err(e) => {
                crossed = e == PairingClientError::Conflict;
                Some(e.to_string())
            }
        };

        match failure {
            None => {
                let peer = self
                    .finish(peer_id, ConnectionState::Connected, HistoryAction::Pair, true)
                    .await?;
                info!("paired with {} ({endpoint})", peer.name);
                Ok(Attempt::Done(ReconnectOutcome::Connected {
                    peer,
                    method: ConnectMethod::Pair,
                }))
            }
            Some(reason) => {
                warn!("pairing with {endpoint} failed: {reason}");
                let next = if had_token {
                    ConnectionState::AuthFailed
                } else {
                    ConnectionState::Unpaired
                };
                let peer = self.finish(peer_id, next, HistoryAction::Pair, false).await?;
                let outcome = ReconnectOutcome::Failed { peer, reason };
                Ok(if crossed {
                    Attempt::Crossed(outcome)
                } else {
                    Attempt::Done(outcome)
                })
            }
        }
    }

    /// Applies the final transition of a step and records it in the history.
    async fn finish(
        &self,
        peer_id: PeerId,
        next: ConnectionState,
        action: HistoryAction,
        success: bool,
    ) -> Result<Peer, ReconnectError> {
        let peer = {
            let mut registry = self.registry.lock().await;
            registry.set_state(peer_id, next)?;
            registry
                .get(peer_id)
                .cloned()
                .ok_or(ReconnectError::PeerNotFound(peer_id))?
        };
        self.history.lock().await.record(&peer.name, action, success);
        Ok(peer)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
