use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use relay_core::config::RelayConfig;
use relay_dispatch::{DispatchController, ExpiredCredentials, HttpMediaPlane};
use relay_embed::{EmbedGateway, HttpEmbedProvider};
use relay_events::EventBridge;
use relay_tenants::TenantRegistry;
use relay_turns::TurnStore;

use crate::claim_source::SupervisorClaimSource;
use crate::data_sources::GatewayBackfiller;
use crate::llm_client::LlmClient;
use crate::worker_launcher::ProcessWorkerLauncher;

/// Central shared state, passed as `Arc<AppState>` to every Axum handler,
/// wiring together the eight components that make up this core.
pub struct AppState {
    pub config: RelayConfig,
    pub tenants: Arc<TenantRegistry>,
    pub agents: Arc<relay_agents::AgentRegistry>,
    pub dispatch: Arc<DispatchController<HttpMediaPlane, SupervisorClaimSource<ProcessWorkerLauncher>>>,
    pub workers: Arc<relay_workers::WorkerSupervisor<ProcessWorkerLauncher>>,
    pub events: Arc<EventBridge>,
    pub embed: Arc<EmbedGateway<HttpEmbedProvider>>,
    pub llm: Arc<LlmClient>,
    pub metrics_handle: PrometheusHandle,
}

impl AppState {
    /// Each tenant carries its own `MediaPlaneConfig` (§6: "Credentials
    /// are provided per tenant"); `HttpMediaPlane` is stateless over
    /// credentials and the config is threaded through at dispatch time,
    /// so one instance serves every tenant.
    pub fn new(
        config: RelayConfig,
        tenants: TenantRegistry,
        embed_provider: HttpEmbedProvider,
        worker_binary: String,
        llm_api_key: String,
        metrics_handle: PrometheusHandle,
    ) -> Self {
        let events = Arc::new(EventBridge::new());
        let workers = Arc::new(relay_workers::WorkerSupervisor::new(ProcessWorkerLauncher::new(worker_binary)));
        let claims = SupervisorClaimSource::new(workers.clone());
        let media_plane = HttpMediaPlane::new();
        let dispatch = Arc::new(DispatchController::new(
            media_plane,
            claims,
            Arc::new(ExpiredCredentials::new()),
            config.dispatch.room_prefix.clone(),
            config.dispatch.empty_timeout_seconds,
        ));
        let embed = Arc::new(EmbedGateway::with_limits(embed_provider, config.embed.cache_size, config.embed.max_batch));

        Self {
            config,
            tenants: Arc::new(tenants),
            agents: Arc::new(relay_agents::AgentRegistry::new()),
            dispatch,
            workers,
            events,
            embed,
            llm: Arc::new(LlmClient::new(llm_api_key)),
            metrics_handle,
        }
    }

    /// Builds a fresh `TurnStore` bound to this agent's embedding
    /// profile for backfill — the profile is agent-specific so no
    /// single shared instance would fit every caller.
    pub fn turn_store_for(&self, profile: relay_agents::EmbeddingProfile) -> TurnStore {
        let backfiller = Arc::new(GatewayBackfiller::new(self.embed.clone(), profile));
        TurnStore::new(self.events.clone(), backfiller)
    }
}

pub fn build_router(state: Arc<AppState>) -> axum::Router {
    axum::Router::new()
        .route("/v1/trigger", axum::routing::post(crate::http::trigger::trigger_handler))
        .route("/healthz", axum::routing::get(crate::http::health::health_handler))
        .route("/metrics", axum::routing::get(crate::http::metrics::metrics_handler))
        .with_state(state)
        .layer(axum::middleware::from_fn(crate::middleware::security_headers::security_headers))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
