//! `PeerService`: the context object that wires every PeerLink component
//! together and exposes the node's operations.
//!
//! # Architecture
//!
//! ```text
//! PeerService::new()     -- identity, credential store, registry, history
//! PeerService::start()
//!  ├─ PairingServer      (axum task, /pair + /auth-token)
//!  ├─ discovery          (UDP receive loop + broadcast/eviction tick)
//!  ├─ event pump         (DiscoveryEvent → history, PeerEvent, auto-connect)
//!  └─ reconnect sweep    (retries paired peers that are not connected)
//! connect_to_peer()      -- ReconnectUseCase, spawned or awaited
//! PeerService::stop()    -- tears all of the above down
//! ```
//!
//! # Auto-connect
//!
//! While `pairing.auto_connect` is on, a peer with a stored token is
//! connected when it is discovered, and again on every reconnect sweep while
//! it is not `CONNECTED`.  Failed attempts push the peer's next sweep out
//! exponentially.  A peer the user disconnected is left alone until the user
//! connects it again.
//!
//! The host application reads [`PeerEvent`]s from the receiver returned by
//! [`PeerService::new`].  Events are sent with `try_send`; if the host falls
//! behind, events are dropped with a warning instead of stalling discovery or
//! the pairing server.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use peerlink_core::{
    fingerprint, ConnectionHistory, ConnectionHistoryEntry, ConnectionState, HistoryAction, Peer,
    PeerId, StateError,
};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::application::credentials::CredentialRepository;
use crate::application::local_profile::LocalProfile;
use crate::application::manage_peers::{PeerRegistry, RegistryError};
use crate::application::pairing_policy::PairingPolicy;
use crate::application::reconnect::{
    PairingClientError, ReconnectError, ReconnectOutcome, ReconnectUseCase,
};
use crate::application::serve_pairing::PairingResponder;
use crate::infrastructure::identity::{self, IdentityError};
use crate::infrastructure::network::discovery::{
    start_discovery, DiscoveryError, DiscoveryEvent, DiscoveryHandle, DiscoverySettings,
};
use crate::infrastructure::network::pairing_client::PairingClient;
use crate::infrastructure::network::pairing_server::{
    bind_pairing_listener, PairingServer, PairingServerError,
};
use crate::infrastructure::storage::config::{save_config_to, AppConfig, ConfigError, ConfigPatch};
use crate::infrastructure::storage::credential_store::{CredentialStore, StoreError, StoreMode};

/// Capacity of the host-facing event queue.
const EVENT_QUEUE: usize = 64;

/// How long `stop()` lets in-flight pairing requests finish.
const SERVER_GRACE: Duration = Duration::from_millis(500);

/// Upper bound on the reconnect back-off, as a power of two of the sweep
/// interval.
const MAX_BACKOFF_SHIFT: u32 = 5;

/// Error type for every `PeerService` operation.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    PairingServer(#[from] PairingServerError),

    #[error(transparent)]
    PairingClient(#[from] PairingClientError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    InvalidTransition(#[from] StateError),

    #[error("peer not found: {0}")]
    PeerNotFound(PeerId),

    #[error("service is not running")]
    NotRunning,

    #[error("service is already running")]
    AlreadyRunning,

    #[error("a pairing or auth attempt for {0} is already in progress")]
    AttemptInProgress(PeerId),
}

impl From<RegistryError> for ServiceError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(id) => ServiceError::PeerNotFound(id),
            RegistryError::InvalidTransition(e) => ServiceError::InvalidTransition(e),
        }
    }
}

impl From<ReconnectError> for ServiceError {
    fn from(e: ReconnectError) -> Self {
        match e {
            ReconnectError::PeerNotFound(id) => ServiceError::PeerNotFound(id),
            ReconnectError::AttemptInProgress(id) => ServiceError::AttemptInProgress(id),
            ReconnectError::InvalidTransition(e) => ServiceError::InvalidTransition(e),
        }
    }
}

/// Notifications for the host application.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    PeerDiscovered(Peer),
    PeerConnected(Peer),
    PeerDisconnected(Peer),
    /// The peer stopped announcing and was evicted.
    PeerLost(Peer),
    ConfigUpdated(AppConfig),
}

/// Everything [`PeerService::new`] needs from the host.
pub struct ServiceOptions {
    pub config: AppConfig,
    /// Where `update_config` persists changes.  `None` keeps them in memory.
    pub config_path: Option<PathBuf>,
    /// Holds `identity.toml` and `credentials.json`.
    pub data_dir: PathBuf,
    pub policy: Arc<dyn PairingPolicy>,
}

/// Tasks that exist only between `start()` and `stop()`.
struct Runtime {
    server: PairingServer,
    discovery: Option<DiscoveryHandle>,
    discovery_tx: mpsc::Sender<DiscoveryEvent>,
    pump: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

/// Reconnect back-off state for one peer.
#[derive(Debug, Clone, Copy)]
struct Backoff {
    failures: u32,
    next_at: Instant,
}

/// A PeerLink node.
pub struct PeerService {
    id: PeerId,
    config: Mutex<AppConfig>,
    config_path: Option<PathBuf>,
    local: Arc<RwLock<LocalProfile>>,
    registry: Arc<Mutex<PeerRegistry>>,
    history: Arc<Mutex<ConnectionHistory>>,
    store: Arc<CredentialStore>,
    policy: Arc<dyn PairingPolicy>,
    reconnect: ReconnectUseCase,
    allow_incoming: Arc<AtomicBool>,
    auto_connect: AtomicBool,
    reconnect_interval: Duration,
    /// Peers the user disconnected; skipped by auto-connect.
    held: Mutex<HashSet<PeerId>>,
    backoff: Mutex<HashMap<PeerId, Backoff>>,
    events: mpsc::Sender<PeerEvent>,
    runtime: Mutex<Option<Runtime>>,
    attempts: Mutex<JoinSet<()>>,
}

impl PeerService {
    /// Loads the device identity and opens the credential store.  Nothing is
    /// bound until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Identity`] if the identity file cannot be read or
    ///   created.
    /// - [`ServiceError::Config`] if `config` fails [`AppConfig::validate`].
    /// - [`ServiceError::PairingClient`] if the HTTP client cannot be built.
    pub fn new(
        options: ServiceOptions,
    ) -> Result<(Arc<Self>, mpsc::Receiver<PeerEvent>), ServiceError> {
        let ServiceOptions {
            config,
            config_path,
            data_dir,
            policy,
        } = options;

        config.validate()?;
        let bind_ip = config.bind_ip()?;

        let identity = identity::load_or_create(&data_dir)?;
        let store = Arc::new(CredentialStore::open_in(
            &data_dir,
            identity.secret(),
            &config.kdf_params(),
        ));
        if store.mode() == StoreMode::Degraded {
            warn!("credential store is running without encryption");
        }

        let local = LocalProfile {
            id: identity.device_id,
            name: config.device.name.clone(),
            pairing_address: SocketAddr::new(bind_ip, config.pairing_port()),
            announce_token: peerlink_core::AnnounceToken::generate(),
            fingerprint: Some(fingerprint(&identity::collect_machine_attributes()).into_string()),
        };

        let registry = Arc::new(Mutex::new(PeerRegistry::new()));
        let history = Arc::new(Mutex::new(ConnectionHistory::with_capacity(
            config.history.capacity,
        )));
        let transport = Arc::new(PairingClient::new(config.request_timeout())?);
        let reconnect = ReconnectUseCase::new(
            Arc::clone(&registry),
            Arc::clone(&history),
            Arc::clone(&store) as Arc<dyn CredentialRepository>,
            transport,
        );

        let (events, events_rx) = mpsc::channel(EVENT_QUEUE);

        info!(device_id = %identity.device_id, name = %local.name, "peerlink node initialised");

        let service = Arc::new(Self {
            id: identity.device_id,
            allow_incoming: Arc::new(AtomicBool::new(config.pairing.allow_incoming)),
            auto_connect: AtomicBool::new(config.pairing.auto_connect),
            reconnect_interval: config.reconnect_interval(),
            held: Mutex::new(HashSet::new()),
            backoff: Mutex::new(HashMap::new()),
            config: Mutex::new(config),
            config_path,
            local: Arc::new(RwLock::new(local)),
            registry,
            history,
            store,
            policy,
            reconnect,
            events,
            runtime: Mutex::new(None),
            attempts: Mutex::new(JoinSet::new()),
        });
        Ok((service, events_rx))
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Binds the pairing server and, if enabled, the discovery channel.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::AlreadyRunning`] if started twice.
    /// - [`ServiceError::PairingServer`] / [`ServiceError::Discovery`] if no
    ///   port could be bound.  Nothing is left running in that case.
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        // Same lock order as `update_config`: config, then runtime.
        let config_guard = self.config.lock().await;
        let mut runtime = self.runtime.lock().await;
        if runtime.is_some() {
            return Err(ServiceError::AlreadyRunning);
        }
        let config = config_guard.clone();
        drop(config_guard);

        let listener = bind_pairing_listener(
            config.bind_ip()?,
            config.pairing_port(),
            config.discovery.port_attempts,
        )
        .await?;
        let server = PairingServer::start(
            listener,
            Arc::new(PairingResponder::new(
                Arc::clone(&self.policy),
                Arc::clone(&self.store) as Arc<dyn CredentialRepository>,
                Arc::clone(&self.registry),
                Arc::clone(&self.history),
                Arc::clone(&self.allow_incoming),
            )),
        )?;
        self.local.write().await.pairing_address = server.local_addr();

        let (discovery_tx, discovery_rx) = mpsc::channel(EVENT_QUEUE);
        let discovery = if config.discovery.enabled {
            Some(self.start_discovery(&config, discovery_tx.clone()).await?)
        } else {
            info!("discovery disabled by configuration");
            None
        };
        let pump = tokio::spawn(pump_discovery_events(Arc::downgrade(self), discovery_rx));
        let sweeper = tokio::spawn(run_reconnect_sweeps(
            Arc::downgrade(self),
            self.reconnect_interval,
        ));

        *runtime = Some(Runtime {
            server,
            discovery,
            discovery_tx,
            pump,
            sweeper,
        });
        info!("peerlink node started");
        Ok(())
    }

    /// Stops every task the service started and forgets all discovered peers.
    /// Stored credentials and history are kept.  Calling `stop` on a stopped
    /// service does nothing.
    pub async fn stop(&self) {
        let Some(runtime) = self.runtime.lock().await.take() else {
            return;
        };
        if let Some(discovery) = runtime.discovery {
            discovery.stop().await;
        }
        runtime.pump.abort();
        runtime.sweeper.abort();
        runtime.server.shutdown(SERVER_GRACE).await;
        self.attempts.lock().await.abort_all();
        self.registry.lock().await.clear();
        self.held.lock().await.clear();
        self.backoff.lock().await.clear();
        info!("peerlink node stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.runtime.lock().await.is_some()
    }

    async fn start_discovery(
        &self,
        config: &AppConfig,
        events: mpsc::Sender<DiscoveryEvent>,
    ) -> Result<DiscoveryHandle, ServiceError> {
        let settings = DiscoverySettings::from_config(config)?;
        Ok(start_discovery(
            settings,
            Arc::clone(&self.local),
            Arc::clone(&self.registry),
            events,
        )
        .await?)
    }

    // ── Operations ────────────────────────────────────────────────────────────

    /// Snapshot of the registry, ordered by name.
    pub async fn get_peers(&self) -> Vec<Peer> {
        self.registry.lock().await.all()
    }

    /// Authenticates with `id` using the stored token, pairing if needed.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::NotRunning`] before `start()`.
    /// - [`ServiceError::PeerNotFound`] / [`ServiceError::AttemptInProgress`].
    ///
    /// A refused or unreachable peer is `Ok(ReconnectOutcome::Failed)`.
    /// Connecting a peer the user disconnected earlier hands it back to
    /// auto-connect.
    pub async fn connect_to_peer(&self, id: PeerId) -> Result<ReconnectOutcome, ServiceError> {
        if !self.is_running().await {
            return Err(ServiceError::NotRunning);
        }
        self.held.lock().await.remove(&id);
        self.run_connect(id).await
    }

    /// Ends the session with a connected peer.  The stored token is kept, but
    /// auto-connect leaves the peer alone until `connect_to_peer` is called.
    ///
    /// # Errors
    ///
    /// [`ServiceError::PeerNotFound`], or [`ServiceError::InvalidTransition`]
    /// if the peer is not connected.
    pub async fn disconnect_from_peer(&self, id: PeerId) -> Result<Peer, ServiceError> {
        let peer = {
            let mut registry = self.registry.lock().await;
            let current = registry
                .get(id)
                .ok_or(ServiceError::PeerNotFound(id))?
                .connection_state;
            if current != ConnectionState::Connected {
                return Err(ServiceError::InvalidTransition(StateError {
                    from: current,
                    to: ConnectionState::Paired,
                }));
            }
            registry.set_state(id, ConnectionState::Paired)?;
            registry.get(id).cloned().ok_or(ServiceError::PeerNotFound(id))?
        };
        self.held.lock().await.insert(id);

        self.history
            .lock()
            .await
            .record(peer.name.clone(), HistoryAction::Disconnect, true);
        info!("disconnected from {} ({})", peer.name, peer.pairing_endpoint());
        self.emit(PeerEvent::PeerDisconnected(peer.clone()));
        Ok(peer)
    }

    /// Deletes the stored token for `id` and forces it back to `UNPAIRED`.
    /// The next connect has to pair again.
    ///
    /// Returns `true` if a token was deleted.
    ///
    /// # Errors
    ///
    /// [`ServiceError::PeerNotFound`], or [`ServiceError::Store`] if the
    /// credential document cannot be updated (the peer state is unchanged).
    pub async fn unpair_device(&self, id: PeerId) -> Result<bool, ServiceError> {
        let endpoint = self
            .registry
            .lock()
            .await
            .get(id)
            .map(|p| p.pairing_endpoint())
            .ok_or(ServiceError::PeerNotFound(id))?;

        let removed = self.store.remove(endpoint).await?;

        let (peer, was_connected) = {
            let mut registry = self.registry.lock().await;
            let previous = registry.set_state(id, ConnectionState::Unpaired)?;
            let peer = registry.get(id).cloned().ok_or(ServiceError::PeerNotFound(id))?;
            (peer, previous == ConnectionState::Connected)
        };
        self.held.lock().await.remove(&id);
        self.backoff.lock().await.remove(&id);

        self.history
            .lock()
            .await
            .record(peer.name.clone(), HistoryAction::Unpair, true);
        info!("unpaired {} ({endpoint}); token removed: {removed}", peer.name);
        if was_connected {
            self.emit(PeerEvent::PeerDisconnected(peer));
        }
        Ok(removed)
    }

    /// Deletes the stored token for a pairing endpoint, whether or not a
    /// peer is currently discovered there.  A discovered peer at `endpoint`
    /// is unpaired exactly as [`unpair_device`](Self::unpair_device) does.
    ///
    /// Returns `true` if a token was deleted.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Store`] if the credential document cannot be updated.
    pub async fn forget_credential(&self, endpoint: SocketAddr) -> Result<bool, ServiceError> {
        let discovered = self
            .registry
            .lock()
            .await
            .all()
            .into_iter()
            .find(|p| p.pairing_endpoint() == endpoint)
            .map(|p| p.id);
        if let Some(id) = discovered {
            return self.unpair_device(id).await;
        }

        let removed = self.store.remove(endpoint).await?;
        if removed {
            self.history
                .lock()
                .await
                .record(endpoint.to_string(), HistoryAction::Unpair, true);
            info!("forgot stored token for {endpoint}");
        }
        Ok(removed)
    }

    /// Endpoints that have a stored token, discovered or not.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Store`] if the credential document cannot be read.
    pub async fn paired_endpoints(&self) -> Result<Vec<SocketAddr>, ServiceError> {
        let mut endpoints: Vec<_> = self
            .store
            .all()
            .await?
            .into_iter()
            .map(|r| r.peer_address)
            .collect();
        endpoints.sort();
        Ok(endpoints)
    }

    /// Oldest first.
    pub async fn get_connection_history(&self) -> Vec<ConnectionHistoryEntry> {
        self.history.lock().await.entries()
    }

    /// Applies `patch` to the running configuration.
    ///
    /// A rename takes effect on the next broadcast.  Toggling discovery starts
    /// or stops the discovery channel if the service is running.  Turning
    /// auto-connect on runs a reconnect sweep straight away.  The result is
    /// persisted when a config path was given.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Discovery`] if enabling discovery cannot bind.
    ///   Nothing is changed in that case.
    /// - [`ServiceError::Config`] if saving fails.  The change stays in
    ///   effect for this run.
    pub async fn update_config(
        self: &Arc<Self>,
        patch: ConfigPatch,
    ) -> Result<AppConfig, ServiceError> {
        let mut config = self.config.lock().await;
        let mut updated = config.clone();
        updated.apply(&patch);
        let resume_auto_connect = updated.pairing.auto_connect && !config.pairing.auto_connect;

        let running = {
            let mut runtime = self.runtime.lock().await;
            match runtime.as_mut() {
                Some(runtime) => {
                    match (updated.discovery.enabled, runtime.discovery.is_some()) {
                        (true, false) => {
                            let handle = self
                                .start_discovery(&updated, runtime.discovery_tx.clone())
                                .await?;
                            runtime.discovery = Some(handle);
                        }
                        (false, true) => {
                            if let Some(handle) = runtime.discovery.take() {
                                handle.stop().await;
                                info!("discovery stopped");
                            }
                        }
                        _ => {}
                    }
                    true
                }
                None => false,
            }
        };

        *config = updated.clone();
        drop(config);
        self.local.write().await.name = updated.device.name.clone();
        self.allow_incoming
            .store(updated.pairing.allow_incoming, Ordering::Relaxed);
        self.auto_connect
            .store(updated.pairing.auto_connect, Ordering::Relaxed);

        if let Some(path) = &self.config_path {
            save_config_to(path, &updated)?;
            debug!("config saved to {}", path.display());
        }

        self.emit(PeerEvent::ConfigUpdated(updated.clone()));

        if resume_auto_connect && running {
            self.backoff.lock().await.clear();
            self.reconnect_sweep().await;
        }
        Ok(updated)
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    /// This node's device id.
    pub fn local_id(&self) -> PeerId {
        self.id
    }

    pub async fn config(&self) -> AppConfig {
        self.config.lock().await.clone()
    }

    /// The bound pairing server address while running.
    pub async fn pairing_addr(&self) -> Option<SocketAddr> {
        self.runtime
            .lock()
            .await
            .as_ref()
            .map(|r| r.server.local_addr())
    }

    /// The bound discovery socket address while discovery runs.
    pub async fn discovery_addr(&self) -> Option<SocketAddr> {
        self.runtime
            .lock()
            .await
            .as_ref()
            .and_then(|r| r.discovery.as_ref())
            .map(|d| d.local_addr())
    }

    pub fn credential_mode(&self) -> StoreMode {
        self.store.mode()
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    async fn run_connect(&self, id: PeerId) -> Result<ReconnectOutcome, ServiceError> {
        let local = self.local.read().await.clone();
        let outcome = self.reconnect.connect(id, &local).await?;
        match &outcome {
            ReconnectOutcome::Connected { peer, .. } => {
                self.backoff.lock().await.remove(&id);
                self.emit(PeerEvent::PeerConnected(peer.clone()));
            }
            ReconnectOutcome::Failed { .. } => self.note_failure(id).await,
            ReconnectOutcome::AlreadyConnected(_) => {}
        }
        Ok(outcome)
    }

    /// Pushes the peer's next sweep out by `interval * 2^failures`, capped.
    async fn note_failure(&self, id: PeerId) {
        let mut backoff = self.backoff.lock().await;
        let failures = backoff.get(&id).map_or(0, |b| b.failures) + 1;
        let delay = self
            .reconnect_interval
            .saturating_mul(1 << (failures - 1).min(MAX_BACKOFF_SHIFT));
        backoff.insert(
            id,
            Backoff {
                failures,
                next_at: Instant::now() + delay,
            },
        );
    }

    /// Connects every peer that has a stored token, is neither connected nor
    /// busy, was not disconnected by the user, and is past its back-off.
    async fn reconnect_sweep(self: &Arc<Self>) {
        if !self.auto_connect.load(Ordering::Relaxed) {
            return;
        }
        let idle: Vec<_> = self
            .registry
            .lock()
            .await
            .all()
            .into_iter()
            .filter(|p| {
                p.connection_state != ConnectionState::Connected
                    && !p.connection_state.is_attempt_in_progress()
            })
            .map(|p| (p.id, p.pairing_endpoint()))
            .collect();

        let now = Instant::now();
        for (id, endpoint) in idle {
            if self.held.lock().await.contains(&id) {
                continue;
            }
            let due = self
                .backoff
                .lock()
                .await
                .get(&id)
                .map_or(true, |b| b.next_at <= now);
            if !due {
                continue;
            }
            match self.store.get(endpoint).await {
                Ok(Some(_)) => {
                    debug!("reconnect sweep: retrying {endpoint}");
                    self.spawn_connect(id).await;
                }
                Ok(None) => {}
                Err(e) => warn!("credential lookup for {endpoint} failed: {e}"),
            }
        }
    }

    /// Runs a reconnect attempt in the background, tracked so `stop()` can
    /// abort it.
    async fn spawn_connect(self: &Arc<Self>, id: PeerId) {
        let service = Arc::clone(self);
        let mut attempts = self.attempts.lock().await;
        while attempts.try_join_next().is_some() {}
        attempts.spawn(async move {
            match service.run_connect(id).await {
                Ok(ReconnectOutcome::Failed { peer, reason }) => {
                    info!("auto-connect to {} failed: {reason}", peer.name)
                }
                Ok(_) => {}
                Err(e) => debug!("auto-connect to {id} skipped: {e}"),
            }
        });
    }

    async fn handle_discovery_event(self: &Arc<Self>, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::Discovered(peer) => {
                self.history
                    .lock()
                    .await
                    .record(peer.name.clone(), HistoryAction::Discover, true);
                let id = peer.id;
                let endpoint = peer.pairing_endpoint();
                self.emit(PeerEvent::PeerDiscovered(peer));

                if !self.auto_connect.load(Ordering::Relaxed)
                    || self.held.lock().await.contains(&id)
                {
                    return;
                }
                match self.store.get(endpoint).await {
                    Ok(Some(_)) => {
                        debug!("stored token for {endpoint}; reconnecting");
                        self.spawn_connect(id).await;
                    }
                    Ok(None) => {}
                    Err(e) => warn!("credential lookup for {endpoint} failed: {e}"),
                }
            }
            DiscoveryEvent::Updated(_) => {}
            DiscoveryEvent::Lost(peer) => {
                self.backoff.lock().await.remove(&peer.id);
                if peer.connection_state == ConnectionState::Connected {
                    self.history
                        .lock()
                        .await
                        .record(peer.name.clone(), HistoryAction::Disconnect, true);
                    info!("{} went away while connected", peer.name);
                    self.emit(PeerEvent::PeerDisconnected(peer.clone()));
                }
                self.emit(PeerEvent::PeerLost(peer));
            }
        }
    }

    fn emit(&self, event: PeerEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => warn!("event queue full; dropping {event:?}"),
            Err(TrySendError::Closed(_)) => debug!("event receiver dropped"),
        }
    }
}

async fn pump_discovery_events(
    service: Weak<PeerService>,
    mut events: mpsc::Receiver<DiscoveryEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(service) = service.upgrade() else {
            break;
        };
        service.handle_discovery_event(event).await;
    }
}

async fn run_reconnect_sweeps(service: Weak<PeerService>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(service) = service.upgrade() else {
            break;
        };
        service.reconnect_sweep().await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
