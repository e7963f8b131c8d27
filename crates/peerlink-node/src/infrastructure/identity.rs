//! Persistent device identity and host attribute collection.
//!
//! Each node has a stable device id (advertised in every discovery envelope)
//! and a 32-byte local secret from which the credential store key is derived.
//! Both live in `identity.toml` in the data directory and are created on first
//! run.  The file is written with owner-only permissions on Unix, and every
//! in-memory copy of the secret is wiped when dropped.

use std::path::{Path, PathBuf};

use peerlink_core::MachineAttributes;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const IDENTITY_FILE: &str = "identity.toml";
const SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("I/O error accessing identity at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse identity file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize identity: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("identity secret must be {SECRET_LEN} hex-encoded bytes")]
    InvalidSecret,
}

/// The device id plus the local secret.
#[derive(Clone)]
pub struct DeviceIdentity {
    pub device_id: Uuid,
    secret: Zeroizing<[u8; SECRET_LEN]>,
}

impl DeviceIdentity {
    pub fn secret(&self) -> &[u8] {
        self.secret.as_slice()
    }
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("device_id", &self.device_id)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct IdentityFile {
    #[zeroize(skip)]
    device_id: Uuid,
    secret: String,
}

/// Loads the identity from `data_dir`, creating it if absent.
///
/// # Errors
///
/// [`IdentityError::Io`] if the directory or file cannot be read or written,
/// [`IdentityError::Parse`] / [`IdentityError::InvalidSecret`] if an existing
/// file is corrupt.  A corrupt file is never overwritten.
pub fn load_or_create(data_dir: &Path) -> Result<DeviceIdentity, IdentityError> {
    let path = data_dir.join(IDENTITY_FILE);
    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let content = Zeroizing::new(content);
            let file: IdentityFile = toml::from_str(&content)?;
            let bytes = Zeroizing::new(
                hex::decode(file.secret.trim()).map_err(|_| IdentityError::InvalidSecret)?,
            );
            if bytes.len() != SECRET_LEN {
                return Err(IdentityError::InvalidSecret);
            }
            let mut secret = Zeroizing::new([0u8; SECRET_LEN]);
            secret.copy_from_slice(&bytes);
            Ok(DeviceIdentity {
                device_id: file.device_id,
                secret,
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let mut secret = Zeroizing::new([0u8; SECRET_LEN]);
            rand::rng().fill_bytes(secret.as_mut_slice());
            let identity = DeviceIdentity {
                device_id: Uuid::new_v4(),
                secret,
            };
            write_identity(&path, &identity)?;
            info!(device_id = %identity.device_id, "created new device identity at {}", path.display());
            Ok(identity)
        }
        Err(source) => Err(IdentityError::Io { path, source }),
    }
}

fn write_identity(path: &Path, identity: &DeviceIdentity) -> Result<(), IdentityError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| IdentityError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = Zeroizing::new(toml::to_string(&IdentityFile {
        device_id: identity.device_id,
        secret: hex::encode(identity.secret()),
    })?);
    write_private(path, content.as_bytes()).map_err(|source| IdentityError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes `bytes` to `path`, readable by the owner only on Unix.
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Gathers the host attributes the machine fingerprint is computed over.
pub fn collect_machine_attributes() -> MachineAttributes {
    MachineAttributes {
        hostname: gethostname::gethostname().to_string_lossy().into_owned(),
        platform: std::env::consts::OS.to_string(),
        architecture: std::env::consts::ARCH.to_string(),
        cpu_cores: std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
        total_memory_bytes: total_memory_bytes(),
    }
}

#[cfg(target_os = "linux")]
fn total_memory_bytes() -> u64 {
    std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|s| parse_mem_total_kib(&s))
        .map(|kib| kib * 1024)
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn total_memory_bytes() -> u64 {
    0
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_mem_total_kib(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find_map(|line| line.strip_prefix("MemTotal:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|n| n.parse().ok())
}
