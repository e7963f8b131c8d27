//! UDP broadcast-based peer discovery.
//!
//! Every node binds one UDP socket on the discovery port and runs two tasks
//! over it:
//!
//! 1. **Receive loop** – decodes each datagram as a discovery envelope, drops
//!    anything malformed or self-originated, and records the sender in the
//!    [`PeerRegistry`].  A peer heard for the first time gets a unicast reply
//!    carrying our own envelope, so both sides learn each other without
//!    waiting for the next broadcast.
//! 2. **Tick loop** – every `interval` broadcasts our envelope to each target
//!    and evicts peers that have been silent for longer than `stale_after`.
//!
//! # How UDP discovery works (for beginners)
//!
//! UDP is connectionless and unreliable, which is fine for discovery: a lost
//! announce is repaired by the next one two seconds later.  Sending to the
//! LAN broadcast address (`255.255.255.255`) delivers the datagram to every
//! host on the segment that listens on the port.  The socket must have
//! `SO_BROADCAST` set or the OS refuses the send.
//!
//! When several nodes run on one machine (tests), they cannot all bind the
//! same port.  Each one therefore tries consecutive ports, and the broadcast
//! targets can be listed explicitly with `broadcast_ports`.
//!
//! # Shutdown
//!
//! Both tasks are owned by the [`DiscoveryHandle`].  Stopping (or dropping)
//! the handle aborts them, which drops the last reference to the socket and
//! closes it.  `stop()` also waits for the aborts to land, so the port can be
//! bound again as soon as it returns.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use peerlink_core::protocol::MAX_DATAGRAM_SIZE;
use peerlink_core::{decode_datagram, encode_envelope, Peer, WireMessage};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::application::local_profile::LocalProfile;
use crate::application::manage_peers::{Observation, PeerRegistry};
use crate::infrastructure::storage::config::{AppConfig, ConfigError};

/// Pause after a failed `recv_from` so a persistent socket error cannot spin.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Error type for discovery service operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The UDP socket could not be bound for a reason other than the port
    /// being in use.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Every port in the search range was taken.
    #[error("no free discovery port in {first}..{first}+{attempts}")]
    PortsExhausted { first: u16, attempts: u16 },
}

/// An event produced by the discovery tasks.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// First announce from a peer id.
    Discovered(Peer),
    /// A later announce from a known peer.
    Updated(Peer),
    /// The peer was evicted as stale.
    Lost(Peer),
}

/// Socket and timing parameters for the discovery channel.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoverySettings {
    pub bind_ip: IpAddr,
    /// First port to try.
    pub port: u16,
    pub port_attempts: u16,
    pub broadcast_ip: IpAddr,
    /// Explicit destination ports; empty means `port`.
    pub broadcast_ports: Vec<u16>,
    pub interval: Duration,
    pub stale_after: Duration,
}

impl DiscoverySettings {
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] if an address does not parse.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            bind_ip: config.bind_ip()?,
            port: config.discovery.port,
            port_attempts: config.discovery.port_attempts,
            broadcast_ip: config.broadcast_ip()?,
            broadcast_ports: config.discovery.broadcast_ports.clone(),
            interval: config.broadcast_interval(),
            stale_after: config.stale_after(),
        })
    }

    /// Where each broadcast tick sends the envelope.
    pub fn targets(&self) -> Vec<SocketAddr> {
        if self.broadcast_ports.is_empty() {
            vec![SocketAddr::new(self.broadcast_ip, self.port)]
        } else {
            self.broadcast_ports
                .iter()
                .map(|&p| SocketAddr::new(self.broadcast_ip, p))
                .collect()
        }
    }
}

/// Binds a UDP socket on `ip`, starting at `first` and moving to the next port
/// while the current one is in use.  Broadcast is enabled on the result.
///
/// # Errors
///
/// - [`DiscoveryError::BindFailed`] for any error other than "address in use".
/// - [`DiscoveryError::PortsExhausted`] when all `attempts` ports are taken.
pub async fn bind_with_retry(
    ip: IpAddr,
    first: u16,
    attempts: u16,
) -> Result<UdpSocket, DiscoveryError> {
    let attempts = attempts.max(1);
    for offset in 0..attempts {
        let Some(port) = first.checked_add(offset) else {
            break;
        };
        let addr = SocketAddr::new(ip, port);
        match UdpSocket::bind(addr).await {
            Ok(socket) => {
                socket
                    .set_broadcast(true)
                    .map_err(|source| DiscoveryError::BindFailed { addr, source })?;
                if offset > 0 {
                    info!("discovery port {first} in use; bound UDP {addr} instead");
                }
                return Ok(socket);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                debug!("discovery port {port} in use");
            }
            Err(source) => return Err(DiscoveryError::BindFailed { addr, source }),
        }
    }
    Err(DiscoveryError::PortsExhausted { first, attempts })
}

/// Owns the running discovery tasks.
#[derive(Debug)]
pub struct DiscoveryHandle {
    local_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl DiscoveryHandle {
    /// The address the discovery socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops both tasks and waits until they have released the socket.
    pub async fn stop(mut self) {
        let tasks = std::mem::take(&mut self.tasks);
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }
    }
}

impl Drop for DiscoveryHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Binds the discovery socket and spawns the receive and tick loops.
///
/// `local` is read on every tick so renames are picked up without a restart.
/// Events are delivered on `events`; the loops exit when the receiver is
/// dropped.
///
/// # Errors
///
/// See [`bind_with_retry`].
pub async fn start_discovery(
    settings: DiscoverySettings,
    local: Arc<RwLock<LocalProfile>>,
    registry: Arc<Mutex<PeerRegistry>>,
    events: mpsc::Sender<DiscoveryEvent>,
) -> Result<DiscoveryHandle, DiscoveryError> {
    let socket = bind_with_retry(settings.bind_ip, settings.port, settings.port_attempts).await?;
    let local_addr = socket.local_addr().map_err(|source| DiscoveryError::BindFailed {
        addr: SocketAddr::new(settings.bind_ip, settings.port),
        source,
    })?;
    let socket = Arc::new(socket);

    let receiver = tokio::spawn(receive_loop(
        Arc::clone(&socket),
        Arc::clone(&local),
        Arc::clone(&registry),
        events.clone(),
    ));
    let ticker = tokio::spawn(tick_loop(socket, local, registry, events, settings));

    info!("discovery listening on UDP {local_addr}");
    Ok(DiscoveryHandle {
        local_addr,
        tasks: vec![receiver, ticker],
    })
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    local: Arc<RwLock<LocalProfile>>,
    registry: Arc<Mutex<PeerRegistry>>,
    events: mpsc::Sender<DiscoveryEvent>,
) {
    // One byte over the limit so oversized datagrams are detected, not
    // silently truncated into something that parses.
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE + 1];

    loop {
        let (len, source) = match socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("discovery recv error: {e}");
                tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                continue;
            }
        };

        let envelope = match decode_datagram(&buf[..len]) {
            Ok(WireMessage::Discovery(envelope)) => envelope,
            Err(e) => {
                debug!("dropping discovery datagram from {source}: {e}");
                continue;
            }
        };

        if envelope.id == local.read().await.id {
            continue;
        }

        let (observation, peer) = registry
            .lock()
            .await
            .observe(&envelope, source, Instant::now());

        let event = match observation {
            Observation::New => {
                info!(peer_id = %peer.id, name = %peer.name, "discovered peer at {source}");
                let reply = local.read().await.envelope();
                send_envelope(&socket, &reply, source).await;
                DiscoveryEvent::Discovered(peer)
            }
            Observation::Updated => {
                debug!(peer_id = %peer.id, "announce from {source}");
                DiscoveryEvent::Updated(peer)
            }
        };

        if events.send(event).await.is_err() {
            // Receiver dropped – the service is shutting down.
            break;
        }
    }
}

async fn tick_loop(
    socket: Arc<UdpSocket>,
    local: Arc<RwLock<LocalProfile>>,
    registry: Arc<Mutex<PeerRegistry>>,
    events: mpsc::Sender<DiscoveryEvent>,
    settings: DiscoverySettings,
) {
    let targets = settings.targets();
    let mut interval = tokio::time::interval(settings.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let envelope = local.read().await.envelope();
        for target in &targets {
            send_envelope(&socket, &envelope, *target).await;
        }

        let lost = registry
            .lock()
            .await
            .evict_stale(Instant::now(), settings.stale_after);
        for peer in lost {
            info!(peer_id = %peer.id, name = %peer.name, "peer went silent; evicted");
            if events.send(DiscoveryEvent::Lost(peer)).await.is_err() {
                return;
            }
        }
    }
}

async fn send_envelope(
    socket: &UdpSocket,
    envelope: &peerlink_core::DiscoveryEnvelope,
    dest: SocketAddr,
) {
    match encode_envelope(envelope) {
        Ok(bytes) => {
            if let Err(e) = socket.send_to(&bytes, dest).await {
                debug!("failed to send discovery envelope to {dest}: {e}");
            }
        }
        Err(e) => error!("failed to encode discovery envelope: {e}"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
