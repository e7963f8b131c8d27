//! Network infrastructure: UDP discovery plus the pairing HTTP server and
//! client.
//!
//! - `discovery` – broadcast/receive loops over one UDP socket.
//! - `pairing_server` – axum server for `/pair` and `/auth-token`.
//! - `pairing_client` – reqwest client implementing `PairingTransport`.

pub mod discovery;
pub mod pairing_client;
pub mod pairing_server;
