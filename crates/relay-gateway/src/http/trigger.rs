use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use relay_core::{ConversationId, Mode, RelayError, RoomName, TurnId, UserId};
use relay_dispatch::DispatchResult;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::app::AppState;
use crate::data_sources::{PgBufferSource, PgConversationSearchSource, PgKnowledgeSearchSource, PgProfileSource};

/// Request/response shapes for the §6 trigger endpoint — the single
/// inbound entry point for both conversation modes.
#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    pub tenant_key: String,
    #[serde(default)]
    pub agent_slug: Option<String>,
    pub mode: Mode,
    pub user_id: UserId,
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
    #[serde(default)]
    pub room_name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub conversation_id: ConversationId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_token: Option<String>,
    pub dispatch_status: String,
    pub agent_info: AgentInfo,
}

#[derive(Debug, Serialize)]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    pub model_profile: String,
}

#[derive(Debug, Serialize)]
pub struct TriggerError {
    pub code: String,
    pub message: String,
}

impl From<&RelayError> for TriggerError {
    fn from(e: &RelayError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

fn status_for(e: &RelayError) -> StatusCode {
    match e {
        RelayError::TenantUnavailable { .. } | RelayError::AgentNotFound { .. } => StatusCode::NOT_FOUND,
        RelayError::InvalidDispatch { .. } => StatusCode::BAD_REQUEST,
        RelayError::CredentialsExpired { .. } => StatusCode::FAILED_DEPENDENCY,
        RelayError::DispatchUnavailable { .. } | RelayError::MediaPlane(_) | RelayError::Database(_) | RelayError::Embed(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// POST /v1/trigger. §2's data-flow algorithm: C1 binds the tenant, C2
/// binds the agent; voice mode hands off to C3/C4 and returns dispatch
/// coordinates; text mode runs C5 inline and writes the turn via C6.
pub async fn trigger_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TriggerRequest>,
) -> Result<Json<TriggerResponse>, (StatusCode, Json<TriggerError>)> {
    handle(state, req).await.map(Json).map_err(|e| {
        warn!(error = %e, code = e.code(), "trigger request failed");
        (status_for(&e), Json(TriggerError::from(&e)))
    })
}

async fn handle(state: Arc<AppState>, req: TriggerRequest) -> Result<TriggerResponse, RelayError> {
    let tenant = state.tenants.resolve(&req.tenant_key)?;
    if tenant.degraded {
        return Err(RelayError::TenantUnavailable {
            tenant_key: req.tenant_key.clone(),
            reason: "tenant is degraded".to_string(),
        });
    }
    let data_plane = state.tenants.data_plane_for(&tenant).await?;
    let agent = state.agents.resolve(&tenant, data_plane.pool().as_ref(), req.agent_slug.as_deref()).await?;

    let conversation_id = req.conversation_id.unwrap_or_default();
    let agent_info = AgentInfo {
        id: agent.id.to_string(),
        name: agent.display_name.clone(),
        model_profile: agent.model_profile.llm_model.clone(),
    };

    match req.mode {
        Mode::Voice => {
            let room_name = req.room_name.map(RoomName::from);
            let result: DispatchResult = state
                .dispatch
                .dispatch(&tenant, &agent, req.user_id, conversation_id, room_name)
                .await?;
            Ok(TriggerResponse {
                conversation_id,
                response: None,
                room_name: Some(result.room_name.to_string()),
                server_url: Some(result.server_url),
                user_token: Some(result.user_token),
                dispatch_status: claim_state_str(result.worker_claim_state).to_string(),
                agent_info,
            })
        }
        Mode::Text => {
            let message = req.message.ok_or_else(|| RelayError::InvalidDispatch {
                reason: "message is required for mode=text".to_string(),
            })?;

            let pool = data_plane.pool();
            let assembler = relay_context::ContextAssembler::new(
                PgProfileSource::new(pool.clone()),
                PgBufferSource::new(pool.clone()),
                PgConversationSearchSource::new(pool.clone()),
                PgKnowledgeSearchSource::new(pool.clone()),
                state.embed.clone(),
            );
            let cancel = CancellationToken::new();
            let cancel_guard = cancel.clone();
            let deadline_ms = state.config.context.deadline_ms_text;
            let bundle = tokio::time::timeout(
                std::time::Duration::from_millis(deadline_ms),
                assembler.build(&tenant, &agent, req.user_id, conversation_id, &message, &cancel),
            )
            .await
            .map_err(|_| {
                cancel_guard.cancel();
                RelayError::InvalidDispatch {
                    reason: "context assembly deadline exceeded".to_string(),
                }
            })??;

            let reply = state.llm.complete(&agent.model_profile, &bundle.prompt, &message).await?;

            let turn_id = TurnId::new();
            let turns = state.turn_store_for(agent.embedding_profile.clone());
            let record = relay_turns::RecordTurnRequest {
                tenant_id: tenant.id,
                agent_id: agent.id,
                user_id: req.user_id,
                conversation_id,
                turn_id,
                mode: Mode::Text,
                user: relay_turns::TurnSide::new(message.clone(), "text"),
                assistant: relay_turns::TurnSide::new(reply.clone(), "text"),
                assistant_citations: citations_json(&bundle.citations),
            };
            turns.record_turn(&data_plane, record).await?;

            Ok(TriggerResponse {
                conversation_id,
                response: Some(reply),
                room_name: None,
                server_url: None,
                user_token: None,
                dispatch_status: "n/a".to_string(),
                agent_info,
            })
        }
    }
}

fn claim_state_str(state: relay_dispatch::WorkerClaimState) -> &'static str {
    match state {
        relay_dispatch::WorkerClaimState::Pending => "pending",
        relay_dispatch::WorkerClaimState::Running => "running",
        relay_dispatch::WorkerClaimState::Failed => "failed",
    }
}

fn citations_json(citations: &[relay_context::Citation]) -> Option<serde_json::Value> {
    if citations.is_empty() {
        None
    } else {
        serde_json::to_value(citations).ok()
    }
}
