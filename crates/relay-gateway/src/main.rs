use std::net::SocketAddr;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use relay_core::config::RelayConfig;
use relay_embed::HttpEmbedProvider;
use relay_tenants::TenantRegistry;
use tracing::info;

mod app;
mod claim_source;
mod data_sources;
mod http;
mod llm_client;
mod middleware;
mod worker_launcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "relay_gateway=info,tower_http=info".into()))
        .init();

    let config_path = std::env::var("RELAY_CONFIG").ok();
    let config = RelayConfig::load(config_path.as_deref())?;

    let control_conn = rusqlite::Connection::open(&config.control_plane.sqlite_path)?;
    let tenants = TenantRegistry::new(control_conn)?;

    let embed_base_url = std::env::var("RELAY_EMBED_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:9100".to_string());
    let embed_api_key = std::env::var("RELAY_EMBED_API_KEY").unwrap_or_default();
    let embed_provider = HttpEmbedProvider::new(embed_base_url, embed_api_key);

    let worker_binary = std::env::var("RELAY_WORKER_BINARY").unwrap_or_else(|_| "relay-worker".to_string());
    let llm_api_key = std::env::var("RELAY_LLM_API_KEY").unwrap_or_default();

    let metrics_handle = PrometheusBuilder::new().install_recorder()?;

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(app::AppState::new(config, tenants, embed_provider, worker_binary, llm_api_key, metrics_handle));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!(%addr, "relay gateway listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
