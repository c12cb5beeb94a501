use std::sync::Arc;
use std::time::Instant;

use hearth_protocol::GatewayConfig;
use tokio_util::sync::CancellationToken;

use crate::audit::AuditSink;
use crate::hub::Hub;
use crate::ratelimit::RateLimiter;
use crate::repo::{
    AuditRepo, DeviceRegistry, LocationRepo, MessageBus, PanelRepo, RoomAccessRepo, SceneEngine,
    SceneRegistry, StateHistoryRepo, Tsdb, TokenRepo, UserRepo,
};
use crate::tickets::TicketStore;

/// Everything a handler or middleware needs, wired once at startup and
/// shared via `Arc`. No module-level singletons: the ticket store, hub,
/// and rate-limit map are all owned here and anchored to this object's
/// lifecycle, so multiple gateways (e.g. one per test) never share
/// state.
pub struct AppState {
    pub config: GatewayConfig,
    pub jwt_secret: String,

    pub user_repo: Arc<dyn UserRepo>,
    pub token_repo: Arc<dyn TokenRepo>,
    pub panel_repo: Arc<dyn PanelRepo>,
    pub room_access_repo: Arc<dyn RoomAccessRepo>,
    pub device_registry: Arc<dyn DeviceRegistry>,
    pub scene_registry: Arc<dyn SceneRegistry>,
    pub scene_engine: Arc<dyn SceneEngine>,
    pub location_repo: Arc<dyn LocationRepo>,
    pub tsdb: Arc<dyn Tsdb>,
    pub state_history_repo: Arc<dyn StateHistoryRepo>,
    pub bus: Arc<dyn MessageBus>,

    /// `None` when no audit repository was wired in — audit is an
    /// optional dependency per the server lifecycle contract.
    pub audit: Option<Arc<AuditSink>>,
    /// Kept alongside `audit` (not inside the sink) so `GET /audit` can
    /// query the system of record directly without going through the
    /// write queue.
    pub audit_repo: Option<Arc<dyn AuditRepo>>,

    pub tickets: TicketStore,
    pub rate_limiter: RateLimiter,
    pub hub: Arc<Hub>,

    pub started_at: Instant,
    pub cancel: CancellationToken,
}

/// Everything needed to construct an `AppState`, split out so tests can
/// build a minimal one from in-memory doubles without threading every
/// field through a dozen constructor arguments.
pub struct AppStateDeps {
    pub config: GatewayConfig,
    pub user_repo: Arc<dyn UserRepo>,
    pub token_repo: Arc<dyn TokenRepo>,
    pub panel_repo: Arc<dyn PanelRepo>,
    pub room_access_repo: Arc<dyn RoomAccessRepo>,
    pub device_registry: Arc<dyn DeviceRegistry>,
    pub scene_registry: Arc<dyn SceneRegistry>,
    pub scene_engine: Arc<dyn SceneEngine>,
    pub location_repo: Arc<dyn LocationRepo>,
    pub tsdb: Arc<dyn Tsdb>,
    pub state_history_repo: Arc<dyn StateHistoryRepo>,
    pub bus: Arc<dyn MessageBus>,
    pub audit_repo: Option<Arc<dyn AuditRepo>>,
}

impl AppState {
    pub fn new(deps: AppStateDeps, cancel: CancellationToken) -> Arc<Self> {
        let jwt_secret = deps
            .config
            .server
            .jwt_secret
            .clone()
            .unwrap_or_else(|| {
                tracing::warn!("no jwt_secret configured, generating an ephemeral one");
                crate::crypto::generate_secret()
            });

        let audit_repo = deps.audit_repo;
        let audit = audit_repo.clone().map(|repo| {
            let (sink, _handle) =
                AuditSink::start(repo, deps.config.audit.queue_capacity, cancel.clone());
            Arc::new(sink)
        });

        let hub = Arc::new(Hub::new(deps.config.hub.clone()));

        Arc::new(Self {
            config: deps.config,
            jwt_secret,
            user_repo: deps.user_repo,
            token_repo: deps.token_repo,
            panel_repo: deps.panel_repo,
            room_access_repo: deps.room_access_repo,
            device_registry: deps.device_registry,
            scene_registry: deps.scene_registry,
            scene_engine: deps.scene_engine,
            location_repo: deps.location_repo,
            tsdb: deps.tsdb,
            state_history_repo: deps.state_history_repo,
            bus: deps.bus,
            audit,
            audit_repo,
            tickets: TicketStore::new(),
            rate_limiter: RateLimiter::new(),
            hub,
            started_at: Instant::now(),
            cancel,
        })
    }

    pub fn audit_enqueue(&self, entry: crate::model::AuditEntry) {
        if let Some(sink) = &self.audit {
            sink.enqueue(entry);
        } else {
            tracing::debug!(?entry, "audit entry dropped, no audit repository configured");
        }
    }
}
