//! Credentials: the ephemeral announce token, the durable pairing token, and
//! the [`TokenRecord`] persisted in the credential store.
//!
//! The two token kinds are separate types on purpose: nothing that accepts a
//! [`PairingToken`] can be handed an [`AnnounceToken`] by mistake.  Both types
//! redact their value in `Debug` output so tokens never reach the logs.

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

/// Number of random bytes in a freshly generated token.
pub const TOKEN_BYTES: usize = 32;

fn random_hex_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn redacted(f: &mut std::fmt::Formatter<'_>, name: &str, value: &str) -> std::fmt::Result {
    f.debug_tuple(name)
        .field(&format!("[{} chars]", value.len()))
        .finish()
}

// ── Announce token ────────────────────────────────────────────────────────────

/// Ephemeral credential carried in discovery envelopes.
///
/// Generated once per process and rotated implicitly on restart.  It is
/// broadcast in the clear and is never accepted by `/auth-token`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnounceToken(String);

impl AnnounceToken {
    /// Generates a new high-entropy announce token.
    pub fn generate() -> Self {
        Self(random_hex_token())
    }

    /// Wraps a token received from the wire.
    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AnnounceToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        redacted(f, "AnnounceToken", &self.0)
    }
}

// ── Pairing token ─────────────────────────────────────────────────────────────

/// Durable credential minted by `/pair` and required by `/auth-token`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PairingToken(String);

impl PairingToken {
    /// Mints a new pairing token.
    pub fn generate() -> Self {
        Self(random_hex_token())
    }

    /// Wraps a token received from the wire or loaded from disk.
    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compares `candidate` with this token in constant time.
    ///
    /// Tokens of different length compare unequal without inspecting the
    /// content.
    pub fn matches(&self, candidate: &str) -> bool {
        self.0.as_bytes().ct_eq(candidate.as_bytes()).into()
    }
}

impl std::fmt::Debug for PairingToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        redacted(f, "PairingToken", &self.0)
    }
}

// ── Token record ──────────────────────────────────────────────────────────────

/// One entry of the credential store, keyed by `peer_address`.
///
/// `peer_address` is the peer's pairing endpoint (`ip:pairing_port`).  On the
/// client side it is the server's endpoint; on the server side it is the
/// requester's endpoint.  Both sides end up holding the same token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub peer_address: SocketAddr,
    pub token: PairingToken,
    pub stored_at: DateTime<Utc>,
    /// Fingerprint the peer advertised when the token was issued, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint_at_pairing: Option<String>,
}

impl TokenRecord {
    /// Creates a record stamped with the current time.
    pub fn new(
        peer_address: SocketAddr,
        token: PairingToken,
        fingerprint_at_pairing: Option<String>,
    ) -> Self {
        Self {
            peer_address,
            token,
            stored_at: Utc::now(),
            fingerprint_at_pairing,
        }
    }

    /// The key this record is stored under.
    pub fn key(&self) -> String {
        self.peer_address.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_tokens_are_64_hex_chars() {
        // Arrange / Act
        let pairing = PairingToken::generate();
        let announce = AnnounceToken::generate();

        // Assert
        for value in [pairing.as_str(), announce.as_str()] {
            assert_eq!(value.len(), TOKEN_BYTES * 2);
            assert!(value.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn test_generated_tokens_are_unique() {
        let a = PairingToken::generate();
        let b = PairingToken::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_matches_accepts_equal_token() {
        let token = PairingToken::from_string("abc123");
        assert!(token.matches("abc123"));
    }

    #[test]
    fn test_matches_rejects_different_token() {
        let token = PairingToken::from_string("abc123");
        assert!(!token.matches("abc124"));
    }

    #[test]
    fn test_matches_rejects_prefix_and_empty() {
        let token = PairingToken::from_string("abc123");
        assert!(!token.matches("abc"));
        assert!(!token.matches(""));
    }

    #[test]
    fn test_debug_output_redacts_token_value() {
        let token = PairingToken::from_string("supersecretvalue");
        let debug = format!("{token:?}");
        assert!(!debug.contains("supersecretvalue"));
        assert!(debug.contains("16 chars"));

        let announce = AnnounceToken::from_string("announcevalue");
        assert!(!format!("{announce:?}").contains("announcevalue"));
    }

    #[test]
    fn test_token_record_uses_camel_case_on_disk() {
        // Arrange
        let record = TokenRecord::new(
            "10.0.0.7:47265".parse().unwrap(),
            PairingToken::from_string("tok"),
            Some("0123456789abcdef".to_string()),
        );

        // Act
        let json = serde_json::to_value(&record).unwrap();

        // Assert
        assert_eq!(json["peerAddress"], "10.0.0.7:47265");
        assert_eq!(json["token"], "tok");
        assert_eq!(json["fingerprintAtPairing"], "0123456789abcdef");
        assert!(json.get("storedAt").is_some());
    }

    #[test]
    fn test_token_record_without_fingerprint_omits_field() {
        let record = TokenRecord::new(
            "10.0.0.7:47265".parse().unwrap(),
            PairingToken::from_string("tok"),
            None,
        );
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("fingerprintAtPairing").is_none());
        assert_eq!(record.key(), "10.0.0.7:47265");
    }
}
