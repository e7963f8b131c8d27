//! JSON codec for discovery datagrams.
//!
//! Decoding happens in two stages: the datagram is first parsed into a
//! generic JSON value so that a missing or unrecognized `type` tag can be
//! reported precisely, then into the typed [`WireMessage`], whose fields are
//! validated before the message is handed to the caller.

use thiserror::Error;

use crate::protocol::messages::{DiscoveryEnvelope, WireMessage};

/// Largest datagram the codec will encode or decode.
pub const MAX_DATAGRAM_SIZE: usize = 4096;

/// Type tags this codec understands.
const KNOWN_TYPES: &[&str] = &["discovery"];

/// Errors that can occur while encoding or decoding a wire message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The datagram exceeds [`MAX_DATAGRAM_SIZE`].
    #[error("datagram too large: {size} bytes (max {max})")]
    Oversized { size: usize, max: usize },

    /// The bytes are not a JSON object of the expected shape.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The JSON object has no string `type` field.
    #[error("message has no type tag")]
    MissingType,

    /// The `type` tag names a message this codec does not know.
    #[error("unknown message type: {0:?}")]
    UnknownType(String),

    /// A field parsed but holds an unacceptable value.
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl ProtocolError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ProtocolError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a discovery envelope as a tagged JSON datagram.
///
/// # Errors
///
/// Returns [`ProtocolError::Oversized`] if the encoded form does not fit in a
/// single datagram (for instance, an absurdly long device name).
///
/// # Examples
///
/// ```rust
/// use peerlink_core::protocol::codec::{decode_datagram, encode_envelope};
/// use peerlink_core::protocol::messages::{DiscoveryEnvelope, WireMessage};
/// use peerlink_core::AnnounceToken;
///
/// let env = DiscoveryEnvelope {
///     id: uuid::Uuid::new_v4(),
///     name: "alice".into(),
///     pairing_port: 47265,
///     announce_token: AnnounceToken::generate(),
///     timestamp: 0,
///     fingerprint: None,
/// };
/// let bytes = encode_envelope(&env).unwrap();
/// assert_eq!(decode_datagram(&bytes).unwrap(), WireMessage::Discovery(env));
/// ```
pub fn encode_envelope(envelope: &DiscoveryEnvelope) -> Result<Vec<u8>, ProtocolError> {
    let msg = WireMessage::Discovery(envelope.clone());
    let bytes = serde_json::to_vec(&msg).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(ProtocolError::Oversized {
            size: bytes.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }
    Ok(bytes)
}

/// Decodes and validates one datagram.
///
/// # Errors
///
/// Returns [`ProtocolError`] for oversized, non-JSON, untagged, unknown, or
/// invalid messages.  Callers on the UDP path drop such datagrams.
pub fn decode_datagram(bytes: &[u8]) -> Result<WireMessage, ProtocolError> {
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(ProtocolError::Oversized {
            size: bytes.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }

    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let tag = value
        .as_object()
        .ok_or_else(|| ProtocolError::Malformed("expected a JSON object".to_string()))?
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(ProtocolError::MissingType)?;

    if !KNOWN_TYPES.contains(&tag) {
        return Err(ProtocolError::UnknownType(tag.to_string()));
    }

    let msg: WireMessage =
        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    match &msg {
        WireMessage::Discovery(env) => env.validate()?,
    }
    Ok(msg)
}
