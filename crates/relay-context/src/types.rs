use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use relay_core::{AgentId, ConversationId, TenantId, TurnId, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    pub name: Option<String>,
    pub email: Option<String>,
    /// Arbitrary profile attributes, rendered in stable sorted-key order
    /// per §4.5.3 step 2.
    pub attributes: BTreeMap<String, String>,
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

/// A single row from the short-term buffer (S2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferTurn {
    pub turn_id: TurnId,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A semantic-recall hit over prior conversation turns (S4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationHit {
    pub turn_id: TurnId,
    pub role: Role,
    pub content: String,
    pub similarity: f32,
    pub created_at: DateTime<Utc>,
}

/// A knowledge-base hit (S5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeHit {
    pub chunk_id: String,
    pub document_id: String,
    pub title: String,
    pub content: String,
    pub similarity: f32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub chunk_id: String,
    pub document_id: String,
    pub title: String,
    pub similarity: f32,
}

/// Per-stage outcome recorded in `ContextMetadata`: elapsed time, hit
/// count, and whether the stage degraded (timed out or errored).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    pub elapsed_ms: u64,
    pub hit_count: usize,
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMetadata {
    pub s1_profile: StageOutcome,
    pub s2_buffer: StageOutcome,
    pub s3_embedding: StageOutcome,
    pub s4_conversation: StageOutcome,
    pub s5_knowledge: StageOutcome,
    pub embedding_unavailable: bool,
    /// Sections dropped from the bottom to respect the token budget
    /// (§4.5.3): values are section numbers, e.g. `[5, 4]`.
    pub sections_dropped: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBundle {
    pub tenant_id: TenantId,
    pub agent_id: AgentId,
    pub user_id: UserId,
    pub conversation_id: ConversationId,
    pub prompt: String,
    pub citations: Vec<Citation>,
    pub metadata: ContextMetadata,
}
