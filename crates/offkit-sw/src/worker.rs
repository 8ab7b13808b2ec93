//! Worker lifecycle: install, activate, fetch and sync.
//!
//! ```text
//! Parsed ──install──► Installing ──► Installed ──activate──► Activating ──► Activated
//!    │                    │                                                    │
//!    └────────────────────┴───────────── failure / retire ─────────────────► Redundant
//! ```
//!
//! Installed workers never wait: install skips the waiting phase, so the host
//! may activate as soon as install returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use http::StatusCode;
use offkit_net::{Destination, Network, Request, RequestMode, Response, UrlPattern};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, debug_span, info, trace, warn, Instrument};
use url::Url;

use crate::classify::RequestClassifier;
use crate::clients::Clients;
use crate::config::OfflineConfig;
use crate::policy::{FetchOutcome, PolicyEngine};
use crate::store::{GenerationHandle, ResourceStore};
use crate::sync::{LogSyncHook, SyncHook, SyncOutcome, SyncRegistration};
use crate::version::{Cleanup, GenerationStatus, VersionManager};
use crate::ServiceWorkerError;

/// Unique identifier for a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u64);

impl WorkerId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkerState {
    /// Constructed, nothing installed yet.
    #[default]
    Parsed,
    /// Seeding the new generation.
    Installing,
    /// Seeded; may be activated.
    Installed,
    /// Deleting old generations and claiming clients.
    Activating,
    /// Serving fetches.
    Activated,
    /// Replaced, or install failed.
    Redundant,
}

/// Events emitted by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    /// State changed.
    StateChange {
        worker_id: WorkerId,
        state: WorkerState,
    },
    /// A client is now controlled by this worker.
    ControllerChange {
        client_id: String,
        worker_id: WorkerId,
    },
    /// An old generation was deleted at activation.
    GenerationDeleted { name: String },
    /// A sync signal for the registered tag arrived.
    SyncRequested { tag: String },
}

/// What install did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    /// Generation that was seeded.
    pub generation: String,
    pub status: GenerationStatus,
    /// Own-origin seeds stored.
    pub seeded: usize,
    /// Own-origin seeds carried over from a previous generation.
    pub migrated: usize,
    /// Why own-origin seeding was abandoned, if it was.
    pub seed_error: Option<String>,
    /// Third-party URLs stored.
    pub third_party_cached: Vec<String>,
    /// Third-party URLs that could not be fetched or stored.
    pub third_party_failed: Vec<String>,
}

/// What activate did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateReport {
    pub cleanup: Cleanup,
    /// Clients whose controller changed, sorted.
    pub claimed: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
struct StateCell {
    state: WorkerState,
    changed_at: Instant,
}

#[derive(Debug, Default)]
struct OwnSeed {
    seeded: usize,
    migrated: usize,
    error: Option<String>,
}

/// One version of the offline layer.
///
/// A worker serves only its own generation. Two workers built over the same
/// store with different versions model an upgrade: the old one keeps serving
/// until the new one activates and deletes its generation.
pub struct ServiceWorker {
    id: WorkerId,
    config: OfflineConfig,
    origin: Url,
    store: ResourceStore,
    versions: VersionManager,
    engine: PolicyEngine,
    network: Arc<dyn Network>,
    clients: Arc<RwLock<Clients>>,
    sync: SyncRegistration,
    sync_hook: Arc<dyn SyncHook>,
    state: RwLock<StateCell>,
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl std::fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("id", &self.id)
            .field("generation", &self.versions.current())
            .field("origin", &self.origin.as_str())
            .finish_non_exhaustive()
    }
}

impl ServiceWorker {
    /// Create a worker for `config` over `store`.
    ///
    /// The store must be scoped to the configured origin.
    pub fn new(
        config: OfflineConfig,
        store: ResourceStore,
        network: Arc<dyn Network>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>), ServiceWorkerError> {
        config.validate()?;
        let origin = config.origin_url()?;
        if store.origin().origin() != origin.origin() {
            return Err(ServiceWorkerError::Config(format!(
                "store origin {} does not match {}",
                store.origin(),
                origin
            )));
        }

        let versions = VersionManager::new(store.clone(), config.generation_name());
        let engine = PolicyEngine::new(
            RequestClassifier::new(&origin, &config),
            versions.handle(),
            Arc::clone(&network),
            config.fallback_pages.clone(),
        );
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let worker = Self {
            id: WorkerId::new(),
            sync: SyncRegistration::from_config(&config),
            config,
            origin,
            store,
            versions,
            engine,
            network,
            clients: Arc::new(RwLock::new(Clients::new())),
            sync_hook: Arc::new(LogSyncHook),
            state: RwLock::new(StateCell {
                state: WorkerState::Parsed,
                changed_at: Instant::now(),
            }),
            event_tx,
        };

        debug!(worker = worker.id.raw(), generation = %worker.versions.current(), "Worker created");
        Ok((worker, event_rx))
    }

    /// Use `hook` for sync signals instead of only logging them.
    pub fn with_sync_hook(mut self, hook: Arc<dyn SyncHook>) -> Self {
        self.sync_hook = hook;
        self
    }

    /// Share a clients registry with other workers of the same origin.
    pub fn with_clients(mut self, clients: Arc<RwLock<Clients>>) -> Self {
        self.clients = clients;
        self
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn config(&self) -> &OfflineConfig {
        &self.config
    }

    pub fn store(&self) -> &ResourceStore {
        &self.store
    }

    /// Handle to this worker's generation.
    pub fn generation(&self) -> GenerationHandle {
        self.versions.handle()
    }

    pub fn clients(&self) -> Arc<RwLock<Clients>> {
        Arc::clone(&self.clients)
    }

    pub async fn state(&self) -> WorkerState {
        self.state.read().await.state
    }

    /// Time since the last state change.
    pub async fn state_age(&self) -> std::time::Duration {
        self.state.read().await.changed_at.elapsed()
    }

    /// Create the generation and seed it.
    ///
    /// Own-origin seeds are all-or-nothing; third-party seeds are best-effort
    /// and fail individually. Neither makes install fail. Only a generation
    /// that cannot be opened does, and it leaves the worker redundant.
    pub async fn install(&self) -> Result<InstallReport, ServiceWorkerError> {
        self.transition(&[WorkerState::Parsed], WorkerState::Installing)
            .await?;

        let (generation, status) = match self.versions.install_generation().await {
            Ok(opened) => opened,
            Err(e) => {
                warn!(worker = self.id.raw(), error = %e, "Install failed");
                self.set_state(WorkerState::Redundant).await;
                return Err(e);
            }
        };

        let own = self.seed_own_origin(&generation).await;
        let (third_party_cached, third_party_failed) = self.seed_third_party(&generation).await;

        self.transition(&[WorkerState::Installing], WorkerState::Installed)
            .await?;

        let report = InstallReport {
            generation: generation.name().to_string(),
            status,
            seeded: own.seeded,
            migrated: own.migrated,
            seed_error: own.error,
            third_party_cached,
            third_party_failed,
        };
        info!(
            worker = self.id.raw(),
            generation = %report.generation,
            seeded = report.seeded,
            migrated = report.migrated,
            third_party_failed = report.third_party_failed.len(),
            "Install complete"
        );
        Ok(report)
    }

    /// Delete every other generation, then take control of open pages.
    pub async fn activate(&self) -> Result<ActivateReport, ServiceWorkerError> {
        self.transition(&[WorkerState::Installed], WorkerState::Activating)
            .await?;

        let cleanup = self.versions.activate().await;
        for name in &cleanup.deleted {
            let _ = self
                .event_tx
                .send(ServiceWorkerEvent::GenerationDeleted { name: name.clone() });
        }

        let claimed = self.claim().await;

        self.transition(&[WorkerState::Activating], WorkerState::Activated)
            .await?;
        info!(
            worker = self.id.raw(),
            generation = %cleanup.active,
            deleted = cleanup.deleted.len(),
            claimed = claimed.len(),
            "Activation complete"
        );
        Ok(ActivateReport { cleanup, claimed })
    }

    /// Answer an intercepted request.
    ///
    /// Workers that are not activated decline every request.
    pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
        let state = self.state().await;
        if state != WorkerState::Activated {
            trace!(
                worker = self.id.raw(),
                ?state,
                url = %request.url,
                "Not active, passing through"
            );
            return FetchOutcome::Passthrough;
        }

        let class = self.engine.classifier().classify(&request.descriptor());
        let span = debug_span!(
            "fetch",
            worker = self.id.raw(),
            method = %request.method,
            url = %request.url,
            %class
        );
        self.engine.execute(class, request).instrument(span).await
    }

    /// Handle a sync signal.
    pub async fn sync(&self, tag: &str) -> Result<SyncOutcome, ServiceWorkerError> {
        let state = self.state().await;
        if state != WorkerState::Activated {
            return Err(ServiceWorkerError::StateError(format!(
                "sync '{tag}' received while {state:?}"
            )));
        }

        if tag == self.sync.tag() {
            let _ = self.event_tx.send(ServiceWorkerEvent::SyncRequested {
                tag: tag.to_string(),
            });
        }
        self.sync.dispatch(self.sync_hook.as_ref(), tag).await
    }

    /// Stop serving. Used once a newer worker has taken over.
    pub async fn retire(&self) {
        self.set_state(WorkerState::Redundant).await;
    }

    async fn seed_own_origin(&self, generation: &GenerationHandle) -> OwnSeed {
        let paths = self
            .config
            .precache_pages
            .iter()
            .chain(std::iter::once(&self.config.static_self_path));

        let mut requests = Vec::new();
        for path in paths {
            match self.origin.join(path) {
                Ok(url) => requests.push(Request::get(url)),
                Err(e) => {
                    return OwnSeed {
                        error: Some(format!("seed path '{path}': {e}")),
                        ..Default::default()
                    }
                }
            }
        }

        let fetched = join_all(requests.iter().map(|request| self.network.fetch(request))).await;

        let mut ready: Vec<(&Request, Response)> = Vec::with_capacity(requests.len());
        let mut migrated = 0;
        let mut missing = Vec::new();
        for (request, result) in requests.iter().zip(fetched) {
            let reason = match result {
                Ok(response) if response.status == StatusCode::OK => {
                    ready.push((request, response));
                    continue;
                }
                Ok(response) => format!("status {}", response.status),
                Err(e) => e.to_string(),
            };

            match self.store.match_across_all(request.url.as_str()).await {
                Some(previous) => {
                    debug!(
                        url = %request.url,
                        %reason,
                        "Carrying seed over from previous generation"
                    );
                    migrated += 1;
                    ready.push((request, previous));
                }
                None => missing.push(format!("{}: {reason}", request.url)),
            }
        }

        if !missing.is_empty() {
            let error = missing.join("; ");
            warn!(generation = %generation.name(), %error, "Own-origin seeding abandoned");
            return OwnSeed {
                error: Some(error),
                ..Default::default()
            };
        }

        let mut seeded = 0;
        for (request, response) in ready {
            match generation.put(request, &response).await {
                Ok(()) => seeded += 1,
                Err(e) => warn!(url = %request.url, error = %e, "Failed to store seed"),
            }
        }

        OwnSeed {
            seeded,
            migrated,
            error: None,
        }
    }

    async fn seed_third_party(&self, generation: &GenerationHandle) -> (Vec<String>, Vec<String>) {
        let attempts = self.config.third_party_precache.iter().map(|url| async move {
            let result = match Url::parse(url) {
                Ok(parsed) => {
                    let request = Request::get(parsed)
                        .destination(Destination::Script)
                        .mode(RequestMode::NoCors);
                    self.store_third_party(generation, &request).await
                }
                Err(e) => Err(e.to_string()),
            };
            (url.clone(), result)
        });

        let mut cached = Vec::new();
        let mut failed = Vec::new();
        for (url, result) in join_all(attempts).await {
            match result {
                Ok(()) => cached.push(url),
                Err(reason) => {
                    warn!(url = %url, %reason, "Third-party seed failed");
                    failed.push(url);
                }
            }
        }
        (cached, failed)
    }

    async fn store_third_party(
        &self,
        generation: &GenerationHandle,
        request: &Request,
    ) -> Result<(), String> {
        let response = self
            .network
            .fetch(request)
            .await
            .map_err(|e| e.to_string())?;
        if response.status != StatusCode::OK {
            return Err(format!("status {}", response.status));
        }
        generation
            .put(request, &response)
            .await
            .map_err(|e| e.to_string())
    }

    async fn claim(&self) -> Vec<String> {
        let scope = UrlPattern::origin(&self.origin);
        let claimed = self.clients.write().await.claim(&scope, self.id);
        for client_id in &claimed {
            let _ = self.event_tx.send(ServiceWorkerEvent::ControllerChange {
                client_id: client_id.clone(),
                worker_id: self.id,
            });
        }
        claimed
    }

    async fn transition(
        &self,
        from: &[WorkerState],
        to: WorkerState,
    ) -> Result<(), ServiceWorkerError> {
        {
            let mut cell = self.state.write().await;
            if !from.contains(&cell.state) {
                return Err(ServiceWorkerError::StateError(format!(
                    "cannot move from {:?} to {:?}",
                    cell.state, to
                )));
            }
            cell.state = to;
            cell.changed_at = Instant::now();
        }
        self.announce(to);
        Ok(())
    }

    async fn set_state(&self, to: WorkerState) {
        {
            let mut cell = self.state.write().await;
            if cell.state == to {
                return;
            }
            cell.state = to;
            cell.changed_at = Instant::now();
        }
        self.announce(to);
    }

    fn announce(&self, state: WorkerState) {
        debug!(worker = self.id.raw(), ?state, "Worker state changed");
        let _ = self.event_tx.send(ServiceWorkerEvent::StateChange {
            worker_id: self.id,
            state,
        });
    }
}
