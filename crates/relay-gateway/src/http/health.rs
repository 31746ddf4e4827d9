use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /healthz — liveness probe with a per-tenant data-plane
/// reachability summary (§3's Tenant invariant: "if data_plane is
/// present, it must be reachable on startup health check; otherwise the
/// tenant is marked degraded").
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let tenants = state.tenants.list_active().unwrap_or_default();
    let degraded: Vec<&str> = tenants.iter().filter(|t| t.degraded).map(|t| t.slug.as_str()).collect();

    Json(json!({
        "status": "ok",
        "tenant_count": tenants.len(),
        "degraded_tenants": degraded,
    }))
}
