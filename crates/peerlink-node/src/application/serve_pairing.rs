//! ServePairingUseCase: the serving side of `/pair` and `/auth-token`.
//!
//! The HTTP adapter in `infrastructure::network::pairing_server` parses the
//! request, then hands the typed body and the observed remote IP to a
//! [`PairingResponder`].  The responder returns a [`Reply`] whose
//! [`ReplyStatus`] the adapter maps onto an HTTP status code.
//!
//! # Requester endpoint
//!
//! Credentials are keyed by the requester's *pairing endpoint*.  Its IP is
//! always the observed TCP peer address (never the one the requester claims);
//! its port comes from `requesterAddress`.  For `/auth-token` without a
//! `requesterAddress`, the endpoint discovered for `requesterId` is used.
//!
//! # Token rotation
//!
//! Every accepted `/pair` mints a new token and overwrites the record for that
//! endpoint, so the previous token stops working immediately.
//!
//! # Crossed requests
//!
//! A `/pair` from a peer we are pairing with ourselves (`PAIRING_REQUESTED`)
//! is answered with [`ReplyStatus::Conflict`] and leaves the store alone.  The
//! registry lock is held from that check until the new token is stored, so an
//! outbound attempt cannot start in between.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use peerlink_core::protocol::messages::{
    AuthTokenRequest, AuthTokenResponse, PairRequest, PairResponse,
};
use peerlink_core::{
    ConnectionHistory, ConnectionState, HistoryAction, PairingToken, PeerId, TokenRecord,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::application::credentials::CredentialRepository;
use crate::application::manage_peers::PeerRegistry;
use crate::application::pairing_policy::{PairingCandidate, PairingDecision, PairingPolicy};

/// Transport-neutral response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Ok,
    BadRequest,
    Unauthorized,
    Forbidden,
    /// This node has its own `/pair` to the requester in flight.
    Conflict,
    Internal,
}

/// A response body plus the status it should be sent with.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply<T> {
    pub status: ReplyStatus,
    pub body: T,
}

impl<T> Reply<T> {
    fn new(status: ReplyStatus, body: T) -> Self {
        Self { status, body }
    }
}

/// Handles incoming pairing and auth requests.
pub struct PairingResponder {
    policy: Arc<dyn PairingPolicy>,
    credentials: Arc<dyn CredentialRepository>,
    registry: Arc<Mutex<PeerRegistry>>,
    history: Arc<Mutex<ConnectionHistory>>,
    allow_incoming: Arc<AtomicBool>,
}

impl PairingResponder {
    pub fn new(
        policy: Arc<dyn PairingPolicy>,
        credentials: Arc<dyn CredentialRepository>,
        registry: Arc<Mutex<PeerRegistry>>,
        history: Arc<Mutex<ConnectionHistory>>,
        allow_incoming: Arc<AtomicBool>,
    ) -> Self {
        Self {
            policy,
            credentials,
            registry,
            history,
            allow_incoming,
        }
    }

    /// Handles `POST /pair` from `remote_ip`.
    pub async fn handle_pair(&self, request: PairRequest, remote_ip: IpAddr) -> Reply<PairResponse> {
        let name = request.requester_name.clone();

        if let Err(e) = request.validate() {
            debug!("rejecting malformed /pair from {remote_ip}: {e}");
            self.record(&name, HistoryAction::Pair, false).await;
            return Reply::new(ReplyStatus::BadRequest, PairResponse::refused(e.to_string()));
        }

        if !self.allow_incoming.load(Ordering::Relaxed) {
            info!("refusing /pair from {name} ({remote_ip}): incoming pairing is disabled");
            self.record(&name, HistoryAction::Pair, false).await;
            return Reply::new(
                ReplyStatus::Forbidden,
                PairResponse::refused("incoming pairing is disabled"),
            );
        }

        // validate() guarantees the port is present.
        let Some(port) = request.requester_port() else {
            return Reply::new(
                ReplyStatus::BadRequest,
                PairResponse::refused("requesterAddress has no port"),
            );
        };
        let endpoint = SocketAddr::new(remote_ip, port);

        let candidate = PairingCandidate {
            requester_id: request.requester_id,
            requester_name: name.clone(),
            requester_endpoint: endpoint,
            requester_fingerprint: request.requester_fingerprint.clone(),
        };

        let outbound = pairing_outbound(&*self.registry.lock().await, request.requester_id);
        if outbound {
            return self.conflict(&name, endpoint).await;
        }

        if let PairingDecision::Reject { reason } = self.policy.decide(&candidate).await {
            info!("pairing with {name} ({endpoint}) rejected: {reason}");
            self.record(&name, HistoryAction::Pair, false).await;
            return Reply::new(ReplyStatus::Forbidden, PairResponse::refused(reason));
        }

        // The decision may have taken a while; check again and keep the lock
        // until the registry reflects the new token.
        let mut registry = self.registry.lock().await;
        if pairing_outbound(&registry, request.requester_id) {
            drop(registry);
            return self.conflict(&name, endpoint).await;
        }

        let token = PairingToken::generate();
        let record = TokenRecord::new(endpoint, token.clone(), request.requester_fingerprint);
        if let Err(e) = self.credentials.put(record).await {
            drop(registry);
            warn!("failed to persist pairing token for {endpoint}: {e}");
            self.record(&name, HistoryAction::Pair, false).await;
            return Reply::new(
                ReplyStatus::Internal,
                PairResponse::refused("failed to persist credential"),
            );
        }
        mark_paired(&mut registry, request.requester_id);
        drop(registry);

        self.record(&name, HistoryAction::Pair, true).await;
        info!("paired with {name} ({endpoint})");
        Reply::new(ReplyStatus::Ok, PairResponse::accepted("Pairing accepted", token))
    }

    async fn conflict(&self, name: &str, endpoint: SocketAddr) -> Reply<PairResponse> {
        info!("refusing /pair from {name} ({endpoint}): our own pairing request is in flight");
        self.record(name, HistoryAction::Pair, false).await;
        Reply::new(
            ReplyStatus::Conflict,
            PairResponse::refused("pairing already in progress"),
        )
    }

    /// Handles `POST /auth-token` from `remote_ip`.  Never mutates the store.
    pub async fn handle_auth(
        &self,
        request: AuthTokenRequest,
        remote_ip: IpAddr,
    ) -> Reply<AuthTokenResponse> {
        let name = self.display_name(&request).await;

        if let Err(e) = request.validate() {
            debug!("rejecting malformed /auth-token from {remote_ip}: {e}");
            self.record(&name, HistoryAction::Auth, false).await;
            return Reply::new(ReplyStatus::BadRequest, AuthTokenResponse::invalid(e.to_string()));
        }

        let endpoint = match request.requester_port() {
            Some(port) => Some(SocketAddr::new(remote_ip, port)),
            None => self
                .registry
                .lock()
                .await
                .get(request.requester_id)
                .map(|p| p.pairing_endpoint()),
        };
        let Some(endpoint) = endpoint else {
            self.record(&name, HistoryAction::Auth, false).await;
            return Reply::new(
                ReplyStatus::Unauthorized,
                AuthTokenResponse::invalid("unknown requester"),
            );
        };

        let reply = match self.credentials.get(endpoint).await {
            Ok(Some(record)) if record.token.matches(request.token.as_str()) => {
                Reply::new(ReplyStatus::Ok, AuthTokenResponse::valid(record.token))
            }
            Ok(Some(_)) => Reply::new(
                ReplyStatus::Unauthorized,
                AuthTokenResponse::invalid("token mismatch"),
            ),
            Ok(None) => Reply::new(
                ReplyStatus::Unauthorized,
                AuthTokenResponse::invalid("not paired"),
            ),
            Err(e) => {
                warn!("credential lookup for {endpoint} failed: {e}");
                Reply::new(
                    ReplyStatus::Internal,
                    AuthTokenResponse::invalid("credential store unavailable"),
                )
            }
        };

        let success = reply.status == ReplyStatus::Ok;
        if success {
            info!("authenticated {name} ({endpoint})");
        } else {
            info!(
                "auth from {name} ({endpoint}) refused: {}",
                reply.body.reason.as_deref().unwrap_or("")
            );
        }
        self.record(&name, HistoryAction::Auth, success).await;
        reply
    }

    async fn display_name(&self, request: &AuthTokenRequest) -> String {
        self.registry
            .lock()
            .await
            .get(request.requester_id)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| request.requester_id.to_string())
    }

    async fn record(&self, name: &str, action: HistoryAction, success: bool) {
        self.history.lock().await.record(name, action, success);
    }
}

fn pairing_outbound(registry: &PeerRegistry, requester_id: PeerId) -> bool {
    registry
        .get(requester_id)
        .is_some_and(|p| p.connection_state == ConnectionState::PairingRequested)
}

/// A token is now on file for this requester; reflect it in the registry.
fn mark_paired(registry: &mut PeerRegistry, requester_id: PeerId) {
    let Some(peer) = registry.get(requester_id) else {
        return;
    };
    if matches!(
        peer.connection_state,
        ConnectionState::Unpaired | ConnectionState::AuthFailed
    ) {
        let _ = registry.set_state(requester_id, ConnectionState::Paired);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
