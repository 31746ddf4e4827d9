use async_trait::async_trait;
use relay_core::{AgentId, ConversationId, TenantId, TurnId, UserId};
use serde::{Deserialize, Serialize};

/// Object-safe seam onto C7 for the fire-and-forget embedding backfill
/// (§4.6 step 4). The concrete impl wraps a `relay_embed::EmbedGateway`
/// plus the agent's `EmbeddingProfile`; kept as a narrow trait here so
/// `relay-turns` doesn't need to be generic over the embed provider.
#[async_trait]
pub trait Backfiller: Send + Sync {
    async fn embed_one(&self, text: &str) -> Option<Vec<f32>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One side of a turn (user message or assistant reply) as handed to
/// `record_turn`. `embedding` is `None` when the caller hasn't computed
/// one yet — C6 schedules a best-effort backfill in that case.
#[derive(Debug, Clone)]
pub struct TurnSide {
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub source: String,
}

impl TurnSide {
    pub fn new(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            embedding: None,
            source: source.into(),
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

#[derive(Debug, Clone)]
pub struct RecordTurnRequest {
    pub tenant_id: TenantId,
    pub agent_id: AgentId,
    pub user_id: UserId,
    pub conversation_id: ConversationId,
    pub turn_id: TurnId,
    pub mode: relay_core::Mode,
    pub user: TurnSide,
    pub assistant: TurnSide,
    /// Citations returned alongside the assistant's reply, if any
    /// (persisted on the assistant row only).
    pub assistant_citations: Option<serde_json::Value>,
}
