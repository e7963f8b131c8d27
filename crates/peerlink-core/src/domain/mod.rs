//! Domain entities for PeerLink.
//!
//! This module contains pure business logic with no infrastructure
//! dependencies: nothing here opens a socket or touches the file system.
//! Staleness checks take the current `Instant` from the caller.
//!
//! - [`peer`] – A discovered instance and how announces update it.
//! - [`state`] – The per-peer connection state machine.
//! - [`credential`] – Announce tokens, pairing tokens, and token records.
//! - [`history`] – The bounded connection audit log.

pub mod credential;
pub mod history;
pub mod peer;
pub mod state;
