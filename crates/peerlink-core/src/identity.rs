//! Machine fingerprinting.
//!
//! The fingerprint is a short, deterministic digest of a few host attributes.
//! It lets an operator recognise a re-installed machine that came back with a
//! new device id.  It is an identity hint only and is never used to grant or
//! deny trust.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of hex characters kept from the SHA-256 digest.
pub const FINGERPRINT_LEN: usize = 16;

/// Host attributes the fingerprint is computed over.
///
/// Gathering them from the running system is the node crate's job; this type
/// only holds the values so the digest stays pure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineAttributes {
    pub hostname: String,
    /// Operating system family, e.g. `linux`.
    pub platform: String,
    /// CPU architecture, e.g. `x86_64`.
    pub architecture: String,
    pub cpu_cores: usize,
    /// Total physical memory in bytes, or 0 if unknown.
    pub total_memory_bytes: u64,
}

impl MachineAttributes {
    /// The canonical string the digest is taken over.
    fn canonical(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.hostname, self.platform, self.architecture, self.cpu_cores, self.total_memory_bytes
        )
    }
}

/// A truncated, lowercase hex machine fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Computes the fingerprint of `attributes`.
///
/// Equal attributes always yield equal fingerprints, across processes and
/// restarts.
pub fn fingerprint(attributes: &MachineAttributes) -> Fingerprint {
    let digest = Sha256::digest(attributes.canonical().as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(FINGERPRINT_LEN);
    Fingerprint(hex)
}
