use chrono::{DateTime, Duration, Utc};
use relay_core::{RelayError, Result, TurnId};
use relay_events::{EventBridge, EventKind, TurnCommitted};
use relay_tenants::DataPlaneHandle;
use tracing::{error, info, warn};

use crate::types::{Backfiller, RecordTurnRequest, Role};

/// Messages shorter than this skip embedding generation entirely (§4.6);
/// citations still persist on the assistant row.
pub const L_TRIVIAL: usize = 3;

const BACKFILL_MAX_ATTEMPTS: u32 = 3;

/// C6. Atomic two-row turn persistence, run directly through
/// `sqlx::Transaction` rather than `spawn_blocking` since `sqlx` is
/// already async.
pub struct TurnStore {
    events: std::sync::Arc<EventBridge>,
    backfiller: std::sync::Arc<dyn Backfiller>,
}

impl TurnStore {
    pub fn new(events: std::sync::Arc<EventBridge>, backfiller: std::sync::Arc<dyn Backfiller>) -> Self {
        Self { events, backfiller }
    }

    /// Implements the §4.6 algorithm. The embedding backfill step (4) is
    /// fire-and-forget: this call returns before any backfill retry
    /// resolves.
    pub async fn record_turn(&self, data_plane: &DataPlaneHandle, req: RecordTurnRequest) -> Result<()> {
        let pool = data_plane.pool();

        ensure_conversation(&pool, &req).await?;

        let user_created_at = Utc::now();
        let assistant_created_at = user_created_at + Duration::microseconds(1);

        let mut tx = pool.begin().await.map_err(|e| RelayError::Database(e.to_string()))?;

        let user_insert = insert_turn_row(
            &mut tx,
            &req,
            req.turn_id,
            Role::User,
            &req.user.content,
            req.user.embedding.as_deref(),
            &req.user.source,
            user_created_at,
            None,
        )
        .await;

        if let Err(e) = user_insert {
            let _ = tx.rollback().await;
            return Err(RelayError::TurnWriteFailed {
                turn_id: req.turn_id.to_string(),
                cause: e.to_string(),
            });
        }

        let assistant_insert = insert_turn_row(
            &mut tx,
            &req,
            req.turn_id,
            Role::Assistant,
            &req.assistant.content,
            req.assistant.embedding.as_deref(),
            &req.assistant.source,
            assistant_created_at,
            req.assistant_citations.clone(),
        )
        .await;

        if let Err(e) = assistant_insert {
            // Compensate: the user row was staged in this same transaction
            // and never committed, so rolling back removes it too — no
            // separate delete statement is needed.
            let _ = tx.rollback().await;
            warn!(turn_id = %req.turn_id, error = %e, "assistant row insert failed, compensating");
            return Err(RelayError::TurnWriteFailed {
                turn_id: req.turn_id.to_string(),
                cause: e.to_string(),
            });
        }

        tx.commit().await.map_err(|e| RelayError::TurnWriteFailed {
            turn_id: req.turn_id.to_string(),
            cause: e.to_string(),
        })?;

        let has_citations = req.assistant_citations.is_some();

        self.events.try_emit(req.turn_id, EventKind::UserSpeechCommitted);
        self.events.try_emit(req.turn_id, EventKind::AgentSpeechCommitted);
        self.events.publish_turn_committed(TurnCommitted {
            conversation_id: req.conversation_id,
            turn_id: req.turn_id,
            has_citations,
        });

        if req.user.embedding.is_none() && !is_trivial(&req.user.content) {
            schedule_backfill(
                pool.clone(),
                self.backfiller.clone(),
                req.conversation_id,
                req.turn_id,
                Role::User,
                req.user.content.clone(),
            );
        }
        if req.assistant.embedding.is_none() && !is_trivial(&req.assistant.content) {
            schedule_backfill(
                pool.clone(),
                self.backfiller.clone(),
                req.conversation_id,
                req.turn_id,
                Role::Assistant,
                req.assistant.content.clone(),
            );
        }

        info!(turn_id = %req.turn_id, conversation_id = %req.conversation_id, "turn committed");
        Ok(())
    }
}

pub fn is_trivial(content: &str) -> bool {
    content.trim().chars().count() < L_TRIVIAL
}

async fn ensure_conversation(pool: &sqlx::PgPool, req: &RecordTurnRequest) -> Result<()> {
    sqlx::query(
        "INSERT INTO conversations (id, tenant_id, agent_id, user_id, created_at, last_activity_at, mode)
         VALUES ($1, $2, $3, $4, now(), now(), $5)
         ON CONFLICT (id) DO UPDATE SET last_activity_at = now()",
    )
    .bind(req.conversation_id.as_uuid())
    .bind(req.tenant_id.as_uuid())
    .bind(req.agent_id.as_uuid())
    .bind(req.user_id.as_uuid())
    .bind(req.mode.to_string())
    .execute(pool)
    .await
    .map_err(|e| RelayError::Database(e.to_string()))?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn insert_turn_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    req: &RecordTurnRequest,
    turn_id: TurnId,
    role: Role,
    content: &str,
    embedding: Option<&[f32]>,
    source: &str,
    created_at: DateTime<Utc>,
    citations: Option<serde_json::Value>,
) -> std::result::Result<(), sqlx::Error> {
    let embedding = embedding.map(|e| pgvector::Vector::from(e.to_vec()));
    sqlx::query(
        "INSERT INTO conversation_transcripts
         (turn_id, conversation_id, role, content, created_at, source, embedding, citations, metadata)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(turn_id.as_uuid())
    .bind(req.conversation_id.as_uuid())
    .bind(role.to_string())
    .bind(content)
    .bind(created_at)
    .bind(source)
    .bind(embedding)
    .bind(citations)
    .bind(serde_json::Value::Null)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Fire-and-forget embedding backfill: the caller never awaits this, so
/// its failure (even after exhausting retries) never surfaces to
/// `record_turn`'s caller.
fn schedule_backfill(
    pool: sqlx::PgPool,
    backfiller: std::sync::Arc<dyn Backfiller>,
    conversation_id: relay_core::ConversationId,
    turn_id: TurnId,
    role: Role,
    content: String,
) {
    tokio::spawn(async move {
        for attempt in 1..=BACKFILL_MAX_ATTEMPTS {
            match backfill_once(&pool, backfiller.as_ref(), turn_id, role, &content).await {
                Ok(()) => return,
                Err(e) if attempt < BACKFILL_MAX_ATTEMPTS => {
                    warn!(%turn_id, attempt, error = %e, "embedding backfill attempt failed, retrying");
                }
                Err(e) => {
                    error!(%turn_id, %conversation_id, error = %e, "embedding backfill exhausted retries, giving up");
                }
            }
        }
    });
}

async fn backfill_once(pool: &sqlx::PgPool, backfiller: &dyn Backfiller, turn_id: TurnId, role: Role, content: &str) -> std::result::Result<(), sqlx::Error> {
    let Some(embedding) = backfiller.embed_one(content).await else {
        return Err(sqlx::Error::Protocol("backfill embed attempt returned nothing".to_string()));
    };
    let vector = pgvector::Vector::from(embedding);
    sqlx::query("UPDATE conversation_transcripts SET embedding = $1 WHERE turn_id = $2 AND role = $3")
        .bind(vector)
        .bind(turn_id.as_uuid())
        .bind(role.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trivial_message_is_below_threshold() {
        assert!(is_trivial("ok"));
        assert!(is_trivial(" hi "));
        assert!(!is_trivial("sure thing"));
    }
}
