use async_trait::async_trait;
use relay_core::{ConversationId, TenantId, TurnId, UserId};

use crate::types::{BufferTurn, ConversationHit, KnowledgeHit, UserProfile};

/// S1. Missing is normal — returns `None`, not an error.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn fetch_profile(&self, tenant_id: TenantId, user_id: UserId) -> Option<UserProfile>;
}

/// S2. Oldest first; returns fewer than `n_buf` if that's all there is.
#[async_trait]
pub trait BufferSource: Send + Sync {
    async fn recent_turns(&self, conversation_id: ConversationId, n_buf: usize) -> Vec<BufferTurn>;
}

/// S4. Excludes `exclude_turn_ids` (the current buffer) and filters to
/// `role in {user, assistant}` at the implementation side.
#[async_trait]
pub trait ConversationSearchSource: Send + Sync {
    async fn search(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        query_embedding: &[f32],
        exclude_turn_ids: &[TurnId],
        top_k: usize,
        theta: f32,
    ) -> Vec<ConversationHit>;
}

/// S5. Restricted to chunks the agent's slug is permitted to see.
#[async_trait]
pub trait KnowledgeSearchSource: Send + Sync {
    async fn search(
        &self,
        tenant_id: TenantId,
        agent_slug: &str,
        query_embedding: &[f32],
        top_k: usize,
        theta: f32,
    ) -> Vec<KnowledgeHit>;
}
