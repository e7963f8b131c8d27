//! Application layer use cases for a PeerLink node.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure business rules in `peerlink_core`) and the infrastructure
//! (sockets, HTTP, files).
//!
//! Use cases in this layer:
//!
//! - **Orchestrate** domain objects to fulfil a goal (e.g., "reconnect to
//!   this peer, re-pairing if the stored token no longer works").
//! - **Depend on abstractions** (the [`credentials::CredentialRepository`],
//!   [`reconnect::PairingTransport`] and [`pairing_policy::PairingPolicy`]
//!   traits) rather than on the concrete store, HTTP client, or UI prompt.
//! - **Contain no socket or file-system code**, which is what makes them
//!   testable with `mockall` doubles.
//!
//! # Sub-modules
//!
//! - **`manage_peers`** – The discovery registry: one entry per peer id,
//!   refreshed on every announce and evicted when stale.
//!
//! - **`reconnect`** – The client side of the pairing protocol: try the
//!   stored token, fall back to pairing, drive the state machine.
//!
//! - **`serve_pairing`** – The server side: answer `/pair` through the
//!   pairing policy and `/auth-token` against the credential store.
//!
//! - **`pairing_policy`** – The accept/reject decision for incoming pairing.
//!
//! - **`credentials`** – The credential repository port.
//!
//! - **`local_profile`** – How this instance presents itself to peers.

pub mod credentials;
pub mod local_profile;
pub mod manage_peers;
pub mod pairing_policy;
pub mod reconnect;
pub mod serve_pairing;
