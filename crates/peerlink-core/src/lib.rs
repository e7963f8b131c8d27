//! # peerlink-core
//!
//! Shared library for PeerLink containing the discovery/pairing wire protocol,
//! domain entities, the machine fingerprint, and the credential document cipher.
//!
//! This crate is used by the node library and binary.  It has zero
//! dependencies on sockets, files, or UI frameworks.
//!
//! # Architecture overview
//!
//! PeerLink lets independent instances of a desktop application find each
//! other on a local network, establish trust once ("pairing"), and later
//! reconnect without prompting the user ("auth").
//!
//! - **`protocol`** – The JSON messages exchanged between instances: the UDP
//!   discovery envelope and the `/pair` and `/auth-token` HTTP bodies, plus a
//!   codec that rejects anything that is not one of those shapes.
//!
//! - **`domain`** – Pure business types: the `Peer` record, the per-peer
//!   `ConnectionState` machine, token records, and the bounded connection
//!   history.
//!
//! - **`identity`** – The deterministic machine fingerprint.
//!
//! - **`crypto`** – The Argon2id + AES-256-GCM cipher used to keep the
//!   credential document encrypted at rest.

pub mod crypto;
pub mod domain;
pub mod identity;
pub mod protocol;

pub use crypto::{CryptoError, DocumentCipher, EncryptedBlob, KdfParams};
pub use domain::credential::{AnnounceToken, PairingToken, TokenRecord};
pub use domain::history::{ConnectionHistory, ConnectionHistoryEntry, HistoryAction};
pub use domain::peer::{Peer, PeerId};
pub use domain::state::{ConnectionState, StateError};
pub use identity::{fingerprint, Fingerprint, MachineAttributes};
pub use protocol::codec::{decode_datagram, encode_envelope, ProtocolError};
pub use protocol::messages::{DiscoveryEnvelope, WireMessage};
