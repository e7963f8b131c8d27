//! PeerLink wire message types.
//!
//! Two transports carry these messages:
//!
//! - **UDP discovery**: a JSON [`WireMessage`] per datagram, tagged by `type`.
//! - **HTTP pairing**: JSON request/response bodies for `POST /pair` and
//!   `POST /auth-token`.
//!
//! Field names on the wire are camelCase and are part of the interoperability
//! contract between instances.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::credential::{AnnounceToken, PairingToken};
use crate::protocol::codec::ProtocolError;

/// Longest accepted device name, in characters.
pub const MAX_NAME_LEN: usize = 128;

/// Longest accepted token string (announce or pairing), in bytes.
pub const MAX_TOKEN_LEN: usize = 256;

/// Longest accepted fingerprint string, in bytes.
pub const MAX_FINGERPRINT_LEN: usize = 64;

// ── UDP discovery ─────────────────────────────────────────────────────────────

/// Every message that may appear in a discovery datagram.
///
/// Unknown `type` tags are rejected by the codec rather than ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireMessage {
    Discovery(DiscoveryEnvelope),
}

/// Announce broadcast by every running instance on each discovery tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryEnvelope {
    /// Persistent device id of the sender.
    pub id: Uuid,
    /// Human-readable device name.
    pub name: String,
    /// TCP port of the sender's pairing server.
    pub pairing_port: u16,
    /// The sender's per-process announce token.
    pub announce_token: AnnounceToken,
    /// Sender wall-clock time in milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Machine fingerprint of the sender (identity hint only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl DiscoveryEnvelope {
    /// Checks field contents beyond what deserialization enforces.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidField`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.id.is_nil() {
            return Err(ProtocolError::invalid("id", "must not be nil"));
        }
        validate_name("name", &self.name)?;
        if self.pairing_port == 0 {
            return Err(ProtocolError::invalid("pairingPort", "must not be 0"));
        }
        validate_token("announceToken", self.announce_token.as_str())?;
        if let Some(fp) = &self.fingerprint {
            validate_fingerprint("fingerprint", fp)?;
        }
        Ok(())
    }
}

// ── HTTP pairing ──────────────────────────────────────────────────────────────

/// Body of `POST /pair`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairRequest {
    pub requester_id: Uuid,
    pub requester_name: String,
    /// `host:port` of the requester's own pairing server.
    ///
    /// Only the port is trusted; the host part is taken from the observed
    /// TCP peer address.
    pub requester_address: String,
    pub announce_token: AnnounceToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester_fingerprint: Option<String>,
}

impl PairRequest {
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidField`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.requester_id.is_nil() {
            return Err(ProtocolError::invalid("requesterId", "must not be nil"));
        }
        validate_name("requesterName", &self.requester_name)?;
        if address_port(&self.requester_address).is_none() {
            return Err(ProtocolError::invalid(
                "requesterAddress",
                "expected host:port with a non-zero port",
            ));
        }
        validate_token("announceToken", self.announce_token.as_str())?;
        if let Some(fp) = &self.requester_fingerprint {
            validate_fingerprint("requesterFingerprint", fp)?;
        }
        Ok(())
    }

    /// Port of the requester's pairing server.
    pub fn requester_port(&self) -> Option<u16> {
        address_port(&self.requester_address)
    }
}

/// Response to `POST /pair`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairResponse {
    pub success: bool,
    pub message: String,
    /// The freshly minted pairing token; present only on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<PairingToken>,
}

impl PairResponse {
    pub fn accepted(message: impl Into<String>, token: PairingToken) -> Self {
        Self {
            success: true,
            message: message.into(),
            token: Some(token),
        }
    }

    pub fn refused(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            token: None,
        }
    }
}

/// Body of `POST /auth-token`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokenRequest {
    pub requester_id: Uuid,
    pub token: PairingToken,
    /// `host:port` of the requester's pairing server.  When absent the server
    /// falls back to the endpoint it discovered for `requester_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester_address: Option<String>,
}

impl AuthTokenRequest {
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidField`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        validate_token("token", self.token.as_str())?;
        if let Some(addr) = &self.requester_address {
            if address_port(addr).is_none() {
                return Err(ProtocolError::invalid(
                    "requesterAddress",
                    "expected host:port with a non-zero port",
                ));
            }
        }
        Ok(())
    }

    pub fn requester_port(&self) -> Option<u16> {
        self.requester_address.as_deref().and_then(address_port)
    }
}

/// Response to `POST /auth-token`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokenResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<PairingToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuthTokenResponse {
    pub fn valid(token: PairingToken) -> Self {
        Self {
            success: true,
            token: Some(token),
            reason: None,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            token: None,
            reason: Some(reason.into()),
        }
    }
}

// ── Field validation ──────────────────────────────────────────────────────────

/// Extracts the port from `host:port` or `[v6]:port`.
fn address_port(address: &str) -> Option<u16> {
    let (_, port) = address.rsplit_once(':')?;
    port.parse::<u16>().ok().filter(|p| *p != 0)
}

fn validate_name(field: &'static str, name: &str) -> Result<(), ProtocolError> {
    if name.trim().is_empty() {
        return Err(ProtocolError::invalid(field, "must not be empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ProtocolError::invalid(field, "too long"));
    }
    Ok(())
}

fn validate_token(field: &'static str, token: &str) -> Result<(), ProtocolError> {
    if token.is_empty() {
        return Err(ProtocolError::invalid(field, "must not be empty"));
    }
    if token.len() > MAX_TOKEN_LEN {
        return Err(ProtocolError::invalid(field, "too long"));
    }
    Ok(())
}

fn validate_fingerprint(field: &'static str, fp: &str) -> Result<(), ProtocolError> {
    if fp.len() > MAX_FINGERPRINT_LEN || !fp.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ProtocolError::invalid(field, "expected a short hex digest"));
    }
    Ok(())
}
