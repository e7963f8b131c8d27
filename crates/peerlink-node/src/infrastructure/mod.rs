//! Infrastructure layer for a PeerLink node.
//!
//! Contains OS-facing adapters: the device identity file, UDP and HTTP
//! networking, file-system storage, the `PeerService` that wires them to the
//! application layer, and the UI command bridge.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `peerlink_core`, but MUST NOT be imported by the `application` or domain
//! layers.

pub mod identity;
pub mod network;
pub mod service;
pub mod storage;
pub mod ui_bridge;
