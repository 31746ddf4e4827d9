use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use relay_agents::EmbeddingProfile;
use relay_context::{BufferSource, BufferTurn, ConversationHit, ConversationSearchSource, KnowledgeHit, KnowledgeSearchSource, ProfileSource, Role, UserProfile};
use relay_core::{ConversationId, TenantId, TurnId, UserId};
use relay_embed::{EmbedGateway, EmbedProvider};
use relay_turns::Backfiller;
use sqlx::Row;
use tracing::warn;

/// The concrete `sqlx`+`pgvector` adapters behind C5's source traits
/// (DESIGN.md Open Question 6) and C6's `Backfiller` seam. One instance
/// is built per tenant data plane; the traits themselves stay in
/// `relay-context`/`relay-turns` so those crates remain testable without
/// a live database.
pub struct PgProfileSource {
    pool: Arc<sqlx::PgPool>,
}

impl PgProfileSource {
    pub fn new(pool: Arc<sqlx::PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileSource for PgProfileSource {
    async fn fetch_profile(&self, tenant_id: TenantId, user_id: UserId) -> Option<UserProfile> {
        let row = sqlx::query("SELECT name, email, attributes FROM profiles WHERE tenant_id = $1 AND user_id = $2")
            .bind(tenant_id.as_uuid())
            .bind(user_id.as_uuid())
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(|e| warn!(error = %e, "S1 profile query failed"))
            .ok()
            .flatten()?;

        let name: Option<String> = row.try_get("name").ok();
        let email: Option<String> = row.try_get("email").ok();
        let attributes_json: Option<serde_json::Value> = row.try_get("attributes").ok();
        let attributes: BTreeMap<String, String> = attributes_json
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        Some(UserProfile {
            user_id,
            name,
            email,
            attributes,
        })
    }
}

pub struct PgBufferSource {
    pool: Arc<sqlx::PgPool>,
}

impl PgBufferSource {
    pub fn new(pool: Arc<sqlx::PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BufferSource for PgBufferSource {
    async fn recent_turns(&self, conversation_id: ConversationId, n_buf: usize) -> Vec<BufferTurn> {
        let rows = sqlx::query(
            "SELECT turn_id, role, content, created_at FROM conversation_transcripts
             WHERE conversation_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(conversation_id.as_uuid())
        .bind(n_buf as i64)
        .fetch_all(self.pool.as_ref())
        .await;

        let Ok(mut rows) = rows else {
            warn!("S2 buffer query failed");
            return Vec::new();
        };
        rows.reverse(); // oldest first, per the S2 contract

        rows.into_iter()
            .filter_map(|row| {
                let turn_id: uuid::Uuid = row.try_get("turn_id").ok()?;
                let role: String = row.try_get("role").ok()?;
                let content: String = row.try_get("content").ok()?;
                let created_at = row.try_get("created_at").ok()?;
                Some(BufferTurn {
                    turn_id: turn_id.into(),
                    role: parse_role(&role)?,
                    content,
                    created_at,
                })
            })
            .collect()
    }
}

pub struct PgConversationSearchSource {
    pool: Arc<sqlx::PgPool>,
}

impl PgConversationSearchSource {
    pub fn new(pool: Arc<sqlx::PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationSearchSource for PgConversationSearchSource {
    async fn search(
        &self,
        _tenant_id: TenantId,
        user_id: UserId,
        query_embedding: &[f32],
        exclude_turn_ids: &[TurnId],
        top_k: usize,
        theta: f32,
    ) -> Vec<ConversationHit> {
        let exclude: Vec<uuid::Uuid> = exclude_turn_ids.iter().map(|t| t.as_uuid()).collect();
        let vector = pgvector::Vector::from(query_embedding.to_vec());

        let rows = sqlx::query(
            "SELECT ct.turn_id, ct.role, ct.content, ct.created_at,
                    1 - (ct.embedding <=> $1) AS similarity
             FROM conversation_transcripts ct
             JOIN conversations c ON c.id = ct.conversation_id
             WHERE c.user_id = $2 AND NOT (ct.turn_id = ANY($3))
               AND ct.embedding IS NOT NULL
               AND 1 - (ct.embedding <=> $1) >= $4
             ORDER BY similarity DESC, ct.created_at DESC
             LIMIT $5",
        )
        .bind(vector.clone())
        .bind(user_id.as_uuid())
        .bind(&exclude[..])
        .bind(theta)
        .bind(top_k as i64)
        .fetch_all(self.pool.as_ref())
        .await;

        let Ok(rows) = rows else {
            warn!("S4 conversation search failed");
            return Vec::new();
        };

        rows.into_iter()
            .filter_map(|row| {
                let turn_id: uuid::Uuid = row.try_get("turn_id").ok()?;
                let role: String = row.try_get("role").ok()?;
                let content: String = row.try_get("content").ok()?;
                let created_at = row.try_get("created_at").ok()?;
                let similarity: f32 = row.try_get("similarity").ok()?;
                Some(ConversationHit {
                    turn_id: turn_id.into(),
                    role: parse_role(&role)?,
                    content,
                    similarity,
                    created_at,
                })
            })
            .collect()
    }
}

pub struct PgKnowledgeSearchSource {
    pool: Arc<sqlx::PgPool>,
}

impl PgKnowledgeSearchSource {
    pub fn new(pool: Arc<sqlx::PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KnowledgeSearchSource for PgKnowledgeSearchSource {
    async fn search(&self, _tenant_id: TenantId, agent_slug: &str, query_embedding: &[f32], top_k: usize, theta: f32) -> Vec<KnowledgeHit> {
        let vector = pgvector::Vector::from(query_embedding.to_vec());

        // `match_documents` enforces the permitted_agent_slugs filter
        // server-side (§6, P3) — the gateway never sees a chunk this
        // agent lacks permission for.
        let rows = sqlx::query("SELECT chunk_id, document_id, title, content, similarity FROM match_documents($1, $2, $3, $4)")
            .bind(vector.clone())
            .bind(agent_slug)
            .bind(theta)
            .bind(top_k as i64)
            .fetch_all(self.pool.as_ref())
            .await;

        let Ok(rows) = rows else {
            warn!("S5 knowledge search failed");
            return Vec::new();
        };

        rows.into_iter()
            .filter_map(|row| {
                let chunk_id: String = row.try_get::<uuid::Uuid, _>("chunk_id").map(|u| u.to_string()).ok()?;
                let document_id: String = row.try_get::<uuid::Uuid, _>("document_id").map(|u| u.to_string()).ok()?;
                let title: String = row.try_get("title").ok()?;
                let content: String = row.try_get("content").ok()?;
                let similarity: f32 = row.try_get("similarity").ok()?;
                Some(KnowledgeHit {
                    chunk_id,
                    document_id,
                    title,
                    content,
                    similarity,
                    created_at: chrono::Utc::now(),
                })
            })
            .collect()
    }
}

/// Wraps C7's gateway to satisfy C6's `Backfiller` seam for a single
/// agent's embedding profile.
pub struct GatewayBackfiller<P: EmbedProvider> {
    embed: Arc<EmbedGateway<P>>,
    profile: EmbeddingProfile,
}

impl<P: EmbedProvider> GatewayBackfiller<P> {
    pub fn new(embed: Arc<EmbedGateway<P>>, profile: EmbeddingProfile) -> Self {
        Self { embed, profile }
    }
}

#[async_trait]
impl<P: EmbedProvider + Send + Sync> Backfiller for GatewayBackfiller<P> {
    async fn embed_one(&self, text: &str) -> Option<Vec<f32>> {
        let mut out = self.embed.embed(&[text.to_string()], &self.profile).await.ok()?;
        out.pop()
    }
}

fn parse_role(s: &str) -> Option<Role> {
    match s {
        "user" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        _ => None,
    }
}
