use chrono::{DateTime, Utc};
use relay_core::{AgentId, ConversationId, RoomName, TenantId, UserId};
use relay_tenants::ProviderKeys;
use serde::{Deserialize, Serialize};

use relay_agents::{EmbeddingProfile, ModelProfile};

/// Job payload handed to the media plane as `job_description` (serialised
/// to a string). Credentials travel by value for worker convenience but
/// must also be independently resolvable from `tenant_id` — the worker's
/// use of these is out of scope here, only their shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchProfile {
    pub tenant_id: TenantId,
    pub agent_id: AgentId,
    pub system_prompt: String,
    pub model_profile: ModelProfile,
    pub user_id: UserId,
    pub conversation_id: ConversationId,
    pub provider_keys_subset: ProviderKeys,
    pub embedding_profile: EmbeddingProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerClaimState {
    Pending,
    Running,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResult {
    pub room_name: RoomName,
    pub user_token: String,
    pub worker_claim_state: WorkerClaimState,
    pub server_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    Pending,
    Running,
    Terminated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobClaim {
    pub room_name: RoomName,
    pub worker_id: String,
    pub claimed_at: DateTime<Utc>,
    pub status: ClaimStatus,
}

/// Queried by the dispatch controller while polling for a claim to go
/// `running` (§4.3 step 5). A real deployment backs this with whatever
/// the worker supervisor (C4) exposes; dispatch only needs this read side.
#[async_trait::async_trait]
pub trait ClaimSource: Send + Sync {
    async fn claim_for(&self, room_name: &RoomName) -> Option<JobClaim>;
}
