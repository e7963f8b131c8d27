//! Per-peer connection state machine.
//!
//! ```text
//! Unpaired ──► PairingRequested ──► Paired ──► Authenticating ──► Connected
//!                                     ▲              │
//!                                     └─ AuthFailed ◄┘
//! ```
//!
//! Supporting edges used by the reconnect algorithm:
//!
//! | From               | To                 | When                                  |
//! |--------------------|--------------------|---------------------------------------|
//! | `Unpaired`         | `Paired`           | a pairing token is already on file    |
//! | `PairingRequested` | `Connected`        | `/pair` succeeded                     |
//! | `PairingRequested` | `AuthFailed`       | `/pair` failed after a rejected token |
//! | `Paired`           | `PairingRequested` | re-pairing                            |
//! | `AuthFailed`       | `PairingRequested` | fallback to re-pairing                |
//! | `Connected`        | `Paired`           | disconnect                            |
//! | any                | `Unpaired`         | unpair / `/pair` rejected             |
//!
//! There is no terminal state: peers cycle between `Paired`, `Connected`, and
//! `AuthFailed` as connectivity changes.  [`ConnectionState::transition`]
//! rejects every edge not listed in [`ConnectionState::can_transition_to`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of one peer, from this instance's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// No trust established (initial state on discovery).
    Unpaired,
    /// A `/pair` call to the peer is in flight.
    PairingRequested,
    /// A pairing token is on file but the peer is not currently connected.
    Paired,
    /// An `/auth-token` call to the peer is in flight.
    Authenticating,
    /// The last pair or auth call succeeded.
    Connected,
    /// The last auth attempt was rejected or timed out.
    AuthFailed,
}

/// Error returned for an edge the state machine does not allow.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("invalid connection state transition {from:?} -> {to:?}")]
pub struct StateError {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

impl ConnectionState {
    /// Returns `true` if moving from `self` to `next` is a legal edge.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        // Unpairing is always allowed.
        if next == Unpaired {
            return true;
        }

        matches!(
            (self, next),
            (Unpaired, PairingRequested)
                | (Unpaired, Paired)
                | (PairingRequested, Paired)
                | (PairingRequested, Connected)
                | (PairingRequested, AuthFailed)
                | (Paired, Authenticating)
                | (Paired, PairingRequested)
                | (Authenticating, Connected)
                | (Authenticating, AuthFailed)
                | (AuthFailed, Paired)
                | (AuthFailed, PairingRequested)
                | (Connected, Paired)
        )
    }

    /// Validates and performs a transition.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the edge is not allowed.
    pub fn transition(self, next: ConnectionState) -> Result<ConnectionState, StateError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(StateError {
                from: self,
                to: next,
            })
        }
    }

    /// Returns `true` while a pair or auth call is in flight.
    pub fn is_attempt_in_progress(self) -> bool {
        matches!(
            self,
            ConnectionState::PairingRequested | ConnectionState::Authenticating
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Unpaired => "UNPAIRED",
            ConnectionState::PairingRequested => "PAIRING_REQUESTED",
            ConnectionState::Paired => "PAIRED",
            ConnectionState::Authenticating => "AUTHENTICATING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::AuthFailed => "AUTH_FAILED",
        };
        f.write_str(s)
    }
}
