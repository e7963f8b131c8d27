//! PeerLink node entry point.
//!
//! Loads the configuration, applies command-line overrides, starts a
//! [`PeerService`], and logs its events until Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config_from()     -- TOML file, defaults if absent
//!  └─ Cli overrides          -- --name, --discovery-port, ...
//!  └─ PeerService::new()     -- identity + credential store
//!  └─ PeerService::start()
//!       ├─ PairingServer     (axum, /pair + /auth-token)
//!       ├─ discovery         (UDP broadcast + receive)
//!       └─ event pump        (auto-connect)
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use peerlink_node::application::pairing_policy::{AutoAcceptPolicy, PairingPolicy, RejectAllPolicy};
use peerlink_node::infrastructure::storage::config::{config_file_path, load_config_from, AppConfig};
use peerlink_node::{PeerEvent, PeerService, ServiceOptions};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// What to do with incoming pairing requests when no UI is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PolicyArg {
    Accept,
    Reject,
}

/// PeerLink node: discovers peers on the LAN and pairs with them.
///
/// Every flag can also be set through the matching `PEERLINK_*` environment
/// variable.  Flags override the config file.
#[derive(Debug, Parser)]
#[command(name = "peerlink-node", version)]
struct Cli {
    /// Path to the TOML config file.  Defaults to the platform config dir.
    #[arg(long, env = "PEERLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for the identity file and credential store.
    #[arg(long, env = "PEERLINK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Name announced to peers.
    #[arg(long, env = "PEERLINK_NAME")]
    name: Option<String>,

    /// First UDP port to try for discovery.
    #[arg(long, env = "PEERLINK_DISCOVERY_PORT")]
    discovery_port: Option<u16>,

    /// Destination address for discovery broadcasts.
    #[arg(long, env = "PEERLINK_BROADCAST_ADDRESS")]
    broadcast_address: Option<String>,

    /// Explicit broadcast destination port; repeat for several local
    /// instances.
    #[arg(long = "broadcast-port", env = "PEERLINK_BROADCAST_PORTS", value_delimiter = ',')]
    broadcast_ports: Vec<u16>,

    /// Do not announce or listen for peers.
    #[arg(long, env = "PEERLINK_NO_DISCOVERY")]
    no_discovery: bool,

    /// How to answer incoming pairing requests.
    #[arg(long, value_enum, default_value_t = PolicyArg::Accept, env = "PEERLINK_POLICY")]
    policy: PolicyArg,
}

impl Cli {
    /// Applies the command-line overrides on top of the loaded config.
    fn apply_to(&self, config: &mut AppConfig) {
        if let Some(name) = &self.name {
            config.device.name = name.clone();
        }
        if let Some(port) = self.discovery_port {
            config.discovery.port = port;
        }
        if let Some(addr) = &self.broadcast_address {
            config.discovery.broadcast_address = addr.clone();
        }
        if !self.broadcast_ports.is_empty() {
            config.discovery.broadcast_ports = self.broadcast_ports.clone();
        }
        if self.no_discovery {
            config.discovery.enabled = false;
        }
    }

    fn pairing_policy(&self) -> Arc<dyn PairingPolicy> {
        match self.policy {
            PolicyArg::Accept => Arc::new(AutoAcceptPolicy),
            PolicyArg::Reject => Arc::new(RejectAllPolicy),
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => config_file_path().context("no --config given and no platform config directory")?,
    };
    let mut config = load_config_from(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    cli.apply_to(&mut config);

    // `RUST_LOG` wins; otherwise the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    let data_dir = match &cli.data_dir {
        Some(dir) => dir.clone(),
        None => config_path
            .parent()
            .map(PathBuf::from)
            .context("config path has no parent directory")?,
    };

    info!("PeerLink node starting as {:?}", config.device.name);

    let (service, mut events) = PeerService::new(ServiceOptions {
        config,
        config_path: Some(config_path),
        data_dir: data_dir.clone(),
        policy: cli.pairing_policy(),
    })
    .with_context(|| format!("failed to initialise node in {}", data_dir.display()))?;

    service.start().await.context("failed to start node")?;
    if let Some(addr) = service.pairing_addr().await {
        info!("pairing server on {addr}");
    }
    if let Some(addr) = service.discovery_addr().await {
        info!("discovery on {addr}");
    }

    // ── Event log ─────────────────────────────────────────────────────────────
    let logger = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                PeerEvent::PeerDiscovered(p) => info!("discovered {} at {}", p.name, p.address),
                PeerEvent::PeerConnected(p) => info!("connected to {}", p.name),
                PeerEvent::PeerDisconnected(p) => info!("disconnected from {}", p.name),
                PeerEvent::PeerLost(p) => info!("lost {}", p.name),
                PeerEvent::ConfigUpdated(_) => info!("configuration updated"),
            }
        }
    });

    info!("PeerLink node ready.  Press Ctrl-C to exit.");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for Ctrl-C: {e}");
    }

    info!("shutdown signal received");
    service.stop().await;
    logger.abort();
    info!("PeerLink node stopped");
    Ok(())
}
