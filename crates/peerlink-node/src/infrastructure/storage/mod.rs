//! Storage infrastructure: configuration and credential persistence.
//!
//! - `config` reads and writes the TOML configuration file from the
//!   platform-appropriate directory, falling back to defaults on first run.
//! - `credential_store` keeps pairing tokens in an encrypted JSON document in
//!   the data directory.

pub mod config;
pub mod credential_store;
