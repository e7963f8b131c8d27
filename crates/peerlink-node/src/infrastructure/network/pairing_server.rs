//! HTTP server for `POST /pair` and `POST /auth-token`.
//!
//! The handlers are thin: they extract the JSON body and the remote address,
//! hand both to the [`PairingResponder`], and map its [`ReplyStatus`] to an
//! HTTP status code.  A body that does not deserialize never reaches the
//! responder and gets a structured 400.
//!
//! ```text
//! POST /pair        {requesterId, requesterName, requesterAddress, announceToken}
//!   200 {success:true,  message, token}
//!   403 {success:false, message}          (policy refused / incoming disabled)
//!   409 {success:false, message}          (our own /pair to the requester is in flight)
//!   400 {success:false, message}          (malformed)
//!
//! POST /auth-token  {requesterId, token, requesterAddress?}
//!   200 {success:true,  token}
//!   401 {success:false, reason}
//! ```

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use peerlink_core::protocol::messages::{
    AuthTokenRequest, AuthTokenResponse, PairRequest, PairResponse,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::application::serve_pairing::{PairingResponder, ReplyStatus};

#[derive(Debug, Error)]
pub enum PairingServerError {
    #[error("failed to bind pairing server on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("no free pairing port in {first}..{first}+{attempts}")]
    PortsExhausted { first: u16, attempts: u16 },
}

/// Builds the pairing router over `responder`.
pub fn router(responder: Arc<PairingResponder>) -> Router {
    Router::new()
        .route("/pair", post(pair))
        .route("/auth-token", post(auth_token))
        .with_state(responder)
}

async fn pair(
    State(responder): State<Arc<PairingResponder>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    body: Result<Json<PairRequest>, JsonRejection>,
) -> (StatusCode, Json<PairResponse>) {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            debug!("malformed /pair body from {remote}: {rejection}");
            return (
                StatusCode::BAD_REQUEST,
                Json(PairResponse::refused(format!(
                    "malformed request: {}",
                    rejection.body_text()
                ))),
            );
        }
    };
    let reply = responder.handle_pair(request, remote.ip().to_canonical()).await;
    (status_code(reply.status), Json(reply.body))
}

async fn auth_token(
    State(responder): State<Arc<PairingResponder>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    body: Result<Json<AuthTokenRequest>, JsonRejection>,
) -> (StatusCode, Json<AuthTokenResponse>) {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            debug!("malformed /auth-token body from {remote}: {rejection}");
            return (
                StatusCode::BAD_REQUEST,
                Json(AuthTokenResponse::invalid(format!(
                    "malformed request: {}",
                    rejection.body_text()
                ))),
            );
        }
    };
    let reply = responder.handle_auth(request, remote.ip().to_canonical()).await;
    (status_code(reply.status), Json(reply.body))
}

fn status_code(status: ReplyStatus) -> StatusCode {
    match status {
        ReplyStatus::Ok => StatusCode::OK,
        ReplyStatus::BadRequest => StatusCode::BAD_REQUEST,
        ReplyStatus::Unauthorized => StatusCode::UNAUTHORIZED,
        ReplyStatus::Forbidden => StatusCode::FORBIDDEN,
        ReplyStatus::Conflict => StatusCode::CONFLICT,
        ReplyStatus::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Binds a TCP listener on `ip`, moving to the next port while the current
/// one is in use.
///
/// # Errors
///
/// - [`PairingServerError::BindFailed`] for errors other than "address in use".
/// - [`PairingServerError::PortsExhausted`] when every port is taken.
pub async fn bind_pairing_listener(
    ip: IpAddr,
    first: u16,
    attempts: u16,
) -> Result<TcpListener, PairingServerError> {
    let attempts = attempts.max(1);
    for offset in 0..attempts {
        let Some(port) = first.checked_add(offset) else {
            break;
        };
        let addr = SocketAddr::new(ip, port);
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                debug!("pairing port {port} in use");
            }
            Err(source) => return Err(PairingServerError::BindFailed { addr, source }),
        }
    }
    Err(PairingServerError::PortsExhausted { first, attempts })
}

/// A running pairing server.
#[derive(Debug)]
pub struct PairingServer {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PairingServer {
    /// Serves the pairing router on `listener` until [`shutdown`](Self::shutdown).
    ///
    /// # Errors
    ///
    /// [`PairingServerError::BindFailed`] if the listener has no local address.
    pub fn start(
        listener: TcpListener,
        responder: Arc<PairingResponder>,
    ) -> Result<Self, PairingServerError> {
        let local_addr = listener
            .local_addr()
            .map_err(|source| PairingServerError::BindFailed {
                addr: SocketAddr::from(([0, 0, 0, 0], 0)),
                source,
            })?;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let app = router(responder).into_make_service_with_connect_info::<SocketAddr>();

        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    // Either a `true` or a dropped sender ends the server.
                    let _ = shutdown_rx.wait_for(|stop| *stop).await;
                })
                .await;
            match result {
                Ok(()) => info!("pairing server on {local_addr} stopped"),
                Err(e) => error!("pairing server error: {e}"),
            }
        });

        info!("pairing server listening on http://{local_addr}");
        Ok(Self {
            local_addr,
            shutdown_tx,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections and waits up to `grace` for in-flight
    /// requests before aborting.
    pub async fn shutdown(mut self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);
        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            warn!("pairing server did not stop within {grace:?}; aborting");
            self.task.abort();
        }
    }
}

impl Drop for PairingServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
