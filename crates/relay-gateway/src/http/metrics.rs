use axum::extract::State;
use std::sync::Arc;

use crate::app::AppState;

/// GET /metrics — Prometheus text exposition over the `metrics`-crate
/// recorder the rest of the binary emits `counter!`/`histogram!` calls
/// against.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}
