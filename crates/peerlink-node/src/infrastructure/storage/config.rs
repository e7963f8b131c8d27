//! TOML-based configuration persistence for a PeerLink node.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\PeerLink\config.toml`
//! - Linux:    `$XDG_CONFIG_HOME/peerlink/config.toml` (or `~/.config/peerlink`)
//! - macOS:    `~/Library/Application Support/PeerLink/config.toml`
//!
//! The same directory is the default data directory (identity file and
//! credential document) unless `--data-dir` overrides it.
//!
//! Example:
//!
//! ```toml
//! [device]
//! name = "alice-laptop"
//!
//! [discovery]
//! port = 47264
//! broadcast_address = "255.255.255.255"
//!
//! [pairing]
//! allow_incoming = true
//! auto_connect = true
//! reconnect_interval_ms = 10000
//! ```
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default = "...")]`, so a missing file, a
//! missing section, or a file written by an older version all load to a
//! working configuration.  Values that parse but cannot work (a zero
//! timeout or interval, an address that is not an IP) are refused by
//! [`AppConfig::validate`].

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use peerlink_core::KdfParams;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A field parsed but holds an unusable value.
    #[error("invalid config value for {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level node configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub pairing: PairingConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    /// Name shown to peers.  Defaults to the host name.
    #[serde(default = "default_device_name")]
    pub name: String,
}

/// UDP discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// IP address to bind the discovery socket to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// First UDP port to try.
    #[serde(default = "default_discovery_port")]
    pub port: u16,
    /// How many consecutive ports to try when the first is in use.
    #[serde(default = "default_port_attempts")]
    pub port_attempts: u16,
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: String,
    /// Explicit destination ports.  Empty means "the discovery port"; a list
    /// lets several instances on one host hear each other.
    #[serde(default)]
    pub broadcast_ports: Vec<u16>,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Peers not heard from for this long are evicted.
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
}

/// Pairing server and client settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PairingConfig {
    /// TCP port for `/pair` and `/auth-token`.  0 means discovery port + 1.
    #[serde(default)]
    pub port: u16,
    /// Whether `/pair` requests are considered at all.
    #[serde(default = "default_true")]
    pub allow_incoming: bool,
    /// Reconnect automatically to discovered peers with a stored token.
    #[serde(default = "default_true")]
    pub auto_connect: bool,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// How often peers with a stored token that are not connected are
    /// retried while `auto_connect` is on.
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryConfig {
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

/// Argon2id cost for the credential store key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityConfig {
    #[serde(default = "default_kdf_memory_kib")]
    pub kdf_memory_kib: u32,
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,
    #[serde(default = "default_kdf_parallelism")]
    pub kdf_parallelism: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` level or filter directive, used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Runtime-adjustable subset of the configuration.
///
/// `None` fields are left unchanged by [`AppConfig::apply`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    pub device_name: Option<String>,
    pub discovery_enabled: Option<bool>,
    pub allow_incoming: Option<bool>,
    pub auto_connect: Option<bool>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_device_name() -> String {
    gethostname::gethostname()
        .into_string()
        .ok()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "peerlink".to_string())
}
fn default_true() -> bool {
    true
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_discovery_port() -> u16 {
    47264
}
fn default_port_attempts() -> u16 {
    10
}
fn default_broadcast_address() -> String {
    "255.255.255.255".to_string()
}
fn default_interval_ms() -> u64 {
    2000
}
fn default_stale_after_ms() -> u64 {
    10_000
}
fn default_request_timeout_ms() -> u64 {
    3000
}
fn default_reconnect_interval_ms() -> u64 {
    10_000
}
fn default_history_capacity() -> usize {
    peerlink_core::domain::history::DEFAULT_HISTORY_CAPACITY
}
fn default_kdf_memory_kib() -> u32 {
    KdfParams::default().memory_kib
}
fn default_kdf_iterations() -> u32 {
    KdfParams::default().iterations
}
fn default_kdf_parallelism() -> u32 {
    KdfParams::default().parallelism
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            bind_address: default_bind_address(),
            port: default_discovery_port(),
            port_attempts: default_port_attempts(),
            broadcast_address: default_broadcast_address(),
            broadcast_ports: Vec::new(),
            interval_ms: default_interval_ms(),
            stale_after_ms: default_stale_after_ms(),
        }
    }
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            port: 0,
            allow_incoming: default_true(),
            auto_connect: default_true(),
            request_timeout_ms: default_request_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            kdf_memory_kib: default_kdf_memory_kib(),
            kdf_iterations: default_kdf_iterations(),
            kdf_parallelism: default_kdf_parallelism(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ── Derived values ────────────────────────────────────────────────────────────

impl AppConfig {
    /// The first TCP port the pairing server tries.
    ///
    /// An unset pairing port follows the discovery port; if that is 0 too,
    /// both are left to the OS.
    pub fn pairing_port(&self) -> u16 {
        match (self.pairing.port, self.discovery.port) {
            (0, 0) => 0,
            (0, discovery) => discovery.saturating_add(1),
            (explicit, _) => explicit,
        }
    }

    /// Parsed discovery bind address.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] if the string is not an IP address.
    pub fn bind_ip(&self) -> Result<IpAddr, ConfigError> {
        parse_ip("discovery.bind_address", &self.discovery.bind_address)
    }

    /// Parsed broadcast address.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] if the string is not an IP address.
    pub fn broadcast_ip(&self) -> Result<IpAddr, ConfigError> {
        parse_ip("discovery.broadcast_address", &self.discovery.broadcast_address)
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.discovery.interval_ms.max(1))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.discovery.stale_after_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.pairing.request_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.pairing.reconnect_interval_ms)
    }

    /// Checks the values serde cannot: addresses parse and no timing is zero.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_ip()?;
        self.broadcast_ip()?;
        let timings = [
            ("discovery.interval_ms", self.discovery.interval_ms),
            ("discovery.stale_after_ms", self.discovery.stale_after_ms),
            ("pairing.request_timeout_ms", self.pairing.request_timeout_ms),
            ("pairing.reconnect_interval_ms", self.pairing.reconnect_interval_ms),
        ];
        match timings.into_iter().find(|(_, ms)| *ms == 0) {
            Some((field, _)) => Err(ConfigError::InvalidValue {
                field,
                value: "0".to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn kdf_params(&self) -> KdfParams {
        KdfParams::new(
            self.security.kdf_memory_kib,
            self.security.kdf_iterations,
            self.security.kdf_parallelism,
        )
    }

    /// Applies `patch`, returning `true` if anything changed.
    pub fn apply(&mut self, patch: &ConfigPatch) -> bool {
        let before = self.clone();
        if let Some(name) = &patch.device_name {
            let trimmed = name.trim();
            if !trimmed.is_empty() {
                self.device.name = trimmed.to_string();
            }
        }
        if let Some(enabled) = patch.discovery_enabled {
            self.discovery.enabled = enabled;
        }
        if let Some(allow) = patch.allow_incoming {
            self.pairing.allow_incoming = allow;
        }
        if let Some(auto) = patch.auto_connect {
            self.pairing.auto_connect = auto;
        }
        *self != before
    }
}

fn parse_ip(field: &'static str, value: &str) -> Result<IpAddr, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        field,
        value: value.to_string(),
    })
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the file
/// does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed, and
/// [`ConfigError::InvalidValue`] if it fails [`AppConfig::validate`].
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let config: AppConfig = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config base directory including the `PeerLink`
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("PeerLink"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("peerlink"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("PeerLink")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
