use std::sync::Arc;
use std::time::Instant;

use relay_agents::Agent;
use relay_core::deadline::soft_deadline;
use relay_core::{ConversationId, RelayError, Result, TenantId, UserId};
use relay_embed::{EmbedGateway, EmbedProvider};
use relay_tenants::Tenant;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::compose::compose;
use crate::sources::{BufferSource, ConversationSearchSource, KnowledgeSearchSource, ProfileSource};
use crate::types::{ContextBundle, ContextMetadata, StageOutcome};

const S1_DEADLINE_MS: u64 = 150;
const S2_DEADLINE_MS: u64 = 200;
const S3_DEADLINE_MS: u64 = 400;
const S4_DEADLINE_MS: u64 = 300;
const S5_DEADLINE_MS: u64 = 400;

const MAX_USER_MESSAGE_BYTES: usize = 4 * 1024;

/// Builds a `ContextBundle` by running S1-S5 concurrently against their
/// own soft deadlines, then composing the result deterministically. Each
/// source is an explicit `tokio::time::timeout` future run via
/// `tokio::join!` rather than an ad-hoc coroutine fan-out.
pub struct ContextAssembler<Pr, Bu, Co, Kn, Ep>
where
    Pr: ProfileSource,
    Bu: BufferSource,
    Co: ConversationSearchSource,
    Kn: KnowledgeSearchSource,
    Ep: EmbedProvider,
{
    profile_source: Pr,
    buffer_source: Bu,
    conversation_search: Co,
    knowledge_search: Kn,
    embed: Arc<EmbedGateway<Ep>>,
}

impl<Pr, Bu, Co, Kn, Ep> ContextAssembler<Pr, Bu, Co, Kn, Ep>
where
    Pr: ProfileSource,
    Bu: BufferSource,
    Co: ConversationSearchSource,
    Kn: KnowledgeSearchSource,
    Ep: EmbedProvider,
{
    pub fn new(profile_source: Pr, buffer_source: Bu, conversation_search: Co, knowledge_search: Kn, embed: Arc<EmbedGateway<Ep>>) -> Self {
        Self {
            profile_source,
            buffer_source,
            conversation_search,
            knowledge_search,
            embed,
        }
    }

    #[instrument(skip(self, tenant, agent, user_message, cancel), fields(tenant = %tenant.slug, agent = %agent.slug))]
    pub async fn build(
        &self,
        tenant: &Tenant,
        agent: &Agent,
        user_id: UserId,
        conversation_id: ConversationId,
        user_message: &str,
        cancel: &CancellationToken,
    ) -> Result<ContextBundle> {
        if user_message.is_empty() {
            return Err(RelayError::InvalidDispatch {
                reason: "user_message must be non-empty".to_string(),
            });
        }
        let clipped_message = clip_bytes(user_message, MAX_USER_MESSAGE_BYTES);

        let defaults = &agent.defaults;

        let s1_start = Instant::now();
        let s2_start = Instant::now();
        let s3_start = Instant::now();

        let (profile, buffer, embedding) = tokio::join!(
            run_cancellable(cancel, soft_deadline(S1_DEADLINE_MS, self.profile_source.fetch_profile(tenant.id, user_id))),
            run_cancellable(cancel, soft_deadline(S2_DEADLINE_MS, self.buffer_source.recent_turns(conversation_id, defaults.n_buf))),
            run_cancellable(
                cancel,
                soft_deadline(S3_DEADLINE_MS, self.embed.embed(&[clipped_message.clone()], &agent.embedding_profile))
            ),
        );

        let profile = profile.flatten().flatten();
        let buffer = buffer.unwrap_or_default().unwrap_or_default();
        let s1_elapsed = s1_start.elapsed().as_millis() as u64;
        let s2_elapsed = s2_start.elapsed().as_millis() as u64;
        let s3_elapsed = s3_start.elapsed().as_millis() as u64;

        let query_embedding = embedding.flatten().and_then(|r| r.ok()).and_then(|mut v| v.pop());
        let embedding_unavailable = query_embedding.is_none();

        let exclude_turn_ids: Vec<_> = buffer.iter().map(|t| t.turn_id).collect();

        let s4_start = Instant::now();
        let s5_start = Instant::now();

        let (conversation_hits, knowledge_hits) = if let Some(ref embedding) = query_embedding {
            tokio::join!(
                run_cancellable(
                    cancel,
                    soft_deadline(
                        S4_DEADLINE_MS,
                        self.conversation_search
                            .search(tenant.id, user_id, embedding, &exclude_turn_ids, defaults.k_conv, defaults.theta_conv)
                    )
                ),
                run_cancellable(
                    cancel,
                    soft_deadline(
                        S5_DEADLINE_MS,
                        self.knowledge_search.search(tenant.id, &agent.slug, embedding, defaults.k_doc, defaults.theta_doc)
                    )
                ),
            )
        } else {
            (None, None)
        };

        let conversation_hits = conversation_hits.flatten();
        let knowledge_hits = knowledge_hits.flatten();
        let s4_degraded = embedding_unavailable || conversation_hits.is_none();
        let s5_degraded = embedding_unavailable || knowledge_hits.is_none();
        let conversation_hits = conversation_hits.unwrap_or_default();
        let knowledge_hits = knowledge_hits.unwrap_or_default();
        let s4_elapsed = s4_start.elapsed().as_millis() as u64;
        let s5_elapsed = s5_start.elapsed().as_millis() as u64;

        let composed = compose(
            &agent.system_prompt,
            profile.as_ref(),
            &buffer,
            &conversation_hits,
            &knowledge_hits,
            defaults.max_context_tokens,
        );

        let metadata = ContextMetadata {
            s1_profile: StageOutcome {
                elapsed_ms: s1_elapsed,
                hit_count: usize::from(profile.is_some()),
                degraded: profile.is_none(),
            },
            s2_buffer: StageOutcome {
                elapsed_ms: s2_elapsed,
                hit_count: buffer.len(),
                degraded: false,
            },
            s3_embedding: StageOutcome {
                elapsed_ms: s3_elapsed,
                hit_count: usize::from(!embedding_unavailable),
                degraded: embedding_unavailable,
            },
            s4_conversation: StageOutcome {
                elapsed_ms: s4_elapsed,
                hit_count: conversation_hits.len(),
                degraded: s4_degraded,
            },
            s5_knowledge: StageOutcome {
                elapsed_ms: s5_elapsed,
                hit_count: knowledge_hits.len(),
                degraded: s5_degraded,
            },
            embedding_unavailable,
            sections_dropped: composed.sections_dropped,
        };

        Ok(ContextBundle {
            tenant_id: tenant.id,
            agent_id: agent.id,
            user_id,
            conversation_id,
            prompt: composed.prompt,
            citations: composed.citations,
            metadata,
        })
    }
}

async fn run_cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Option<T>
where
    F: std::future::Future<Output = T>,
{
    tokio::select! {
        result = fut => Some(result),
        _ = cancel.cancelled() => None,
    }
}

fn clip_bytes(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_bytes_respects_char_boundaries() {
        let s = "h\u{00e9}llo world";
        let clipped = clip_bytes(s, 3);
        assert!(clipped.ends_with("..."));
    }
}
