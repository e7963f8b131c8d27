//! `reqwest` implementation of the [`PairingTransport`] port.
//!
//! Every call has the configured request timeout and is attempted once.  The
//! server answers refusals with a JSON body and a 4xx status; those bodies
//! are returned as `Ok` so the use case can read `success: false` and the
//! reason.  Only a response that is not the expected JSON becomes an error,
//! plus `409 Conflict`, which means the peer is pairing with us right now.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use peerlink_core::protocol::messages::{
    AuthTokenRequest, AuthTokenResponse, PairRequest, PairResponse,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::application::reconnect::{PairingClientError, PairingTransport};

#[derive(Debug, Clone)]
pub struct PairingClient {
    http: reqwest::Client,
}

impl PairingClient {
    /// # Errors
    ///
    /// [`PairingClientError::Connect`] if the HTTP client cannot be built
    /// (for example, the TLS backend fails to initialise).
    pub fn new(timeout: Duration) -> Result<Self, PairingClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| PairingClientError::Connect(e.to_string()))?;
        Ok(Self { http })
    }

    async fn post_json<Req, Resp>(
        &self,
        endpoint: SocketAddr,
        path: &str,
        body: &Req,
    ) -> Result<Resp, PairingClientError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("http://{endpoint}{path}");
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::CONFLICT {
            return Err(PairingClientError::Conflict);
        }
        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        match serde_json::from_slice::<Resp>(&bytes) {
            Ok(parsed) => Ok(parsed),
            Err(_) if !status.is_success() => Err(PairingClientError::Http(status.as_u16())),
            Err(e) => {
                debug!("undecodable {status} response from {url}: {e}");
                Err(PairingClientError::Decode(e.to_string()))
            }
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> PairingClientError {
    if e.is_timeout() {
        PairingClientError::Timeout
    } else if e.is_decode() || e.is_body() {
        PairingClientError::Decode(e.to_string())
    } else {
        PairingClientError::Connect(e.to_string())
    }
}

#[async_trait]
impl PairingTransport for PairingClient {
    async fn pair(
        &self,
        endpoint: SocketAddr,
        request: PairRequest,
    ) -> Result<PairResponse, PairingClientError> {
        self.post_json(endpoint, "/pair", &request).await
    }

    async fn authenticate(
        &self,
        endpoint: SocketAddr,
        request: AuthTokenRequest,
    ) -> Result<AuthTokenResponse, PairingClientError> {
        self.post_json(endpoint, "/auth-token", &request).await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
