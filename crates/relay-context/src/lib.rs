pub mod assembler;
pub mod compose;
pub mod sources;
pub mod types;

pub use assembler::ContextAssembler;
pub use sources::{BufferSource, ConversationSearchSource, KnowledgeSearchSource, ProfileSource};
pub use types::{BufferTurn, Citation, ContextBundle, ContextMetadata, ConversationHit, KnowledgeHit, Role, StageOutcome, UserProfile};

#[cfg(test)]
mod integration_tests {
    use std::sync::Arc;
    use async_trait::async_trait;
    use relay_agents::{Agent, AgentDefaults, EmbeddingProfile, ModelProfile};
    use relay_core::{AgentId, ConversationId, TenantId, TurnId, UserId};
    use relay_embed::{EmbedError, EmbedGateway, EmbedProvider};
    use relay_tenants::{MediaPlaneConfig, ProviderKeys, Tenant};
    use std::collections::HashSet;
    use tokio_util::sync::CancellationToken;

    use crate::assembler::ContextAssembler;
    use crate::sources::{BufferSource, ConversationSearchSource, KnowledgeSearchSource, ProfileSource};
    use crate::types::{BufferTurn, ConversationHit, KnowledgeHit, Role, UserProfile};

    struct NoProfile;
    #[async_trait]
    impl ProfileSource for NoProfile {
        async fn fetch_profile(&self, _tenant_id: TenantId, _user_id: UserId) -> Option<UserProfile> {
            None
        }
    }

    struct EmptyBuffer;
    #[async_trait]
    impl BufferSource for EmptyBuffer {
        async fn recent_turns(&self, _conversation_id: ConversationId, _n_buf: usize) -> Vec<BufferTurn> {
            Vec::new()
        }
    }

    struct OneConversationHit;
    #[async_trait]
    impl ConversationSearchSource for OneConversationHit {
        async fn search(
            &self,
            _tenant_id: TenantId,
            _user_id: UserId,
            _query_embedding: &[f32],
            _exclude_turn_ids: &[TurnId],
            _top_k: usize,
            _theta: f32,
        ) -> Vec<ConversationHit> {
            vec![ConversationHit {
                turn_id: TurnId::new(),
                role: Role::User,
                content: "previously we discussed pricing".to_string(),
                similarity: 0.75,
                created_at: chrono::Utc::now(),
            }]
        }
    }

    struct OneKnowledgeHit;
    #[async_trait]
    impl KnowledgeSearchSource for OneKnowledgeHit {
        async fn search(
            &self,
            _tenant_id: TenantId,
            _agent_slug: &str,
            _query_embedding: &[f32],
            _top_k: usize,
            _theta: f32,
        ) -> Vec<KnowledgeHit> {
            vec![KnowledgeHit {
                chunk_id: "chunk-1".to_string(),
                document_id: "doc-1".to_string(),
                title: "Pricing FAQ".to_string(),
                content: "Plans start at $10/mo".to_string(),
                similarity: 0.85,
                created_at: chrono::Utc::now(),
            }]
        }
    }

    struct FakeEmbedProvider;
    #[async_trait]
    impl EmbedProvider for FakeEmbedProvider {
        async fn embed_batch(
            &self,
            texts: &[String],
            profile: &EmbeddingProfile,
        ) -> Result<Vec<Vec<f32>>, EmbedError> {
            Ok(texts.iter().map(|_| vec![0.1; profile.dim as usize]).collect())
        }

        async fn rerank(&self, _query: &str, docs: &[String], _profile: &EmbeddingProfile) -> Result<Vec<f32>, EmbedError> {
            Ok(vec![0.5; docs.len()])
        }
    }

    fn tenant() -> Tenant {
        Tenant {
            id: TenantId::new(),
            slug: "acme".to_string(),
            data_plane: None,
            media_plane: MediaPlaneConfig {
                url: "https://media.example".to_string(),
                api_key: "k".to_string(),
                api_secret: "s".to_string(),
            },
            provider_keys: ProviderKeys::default(),
            degraded: false,
        }
    }

    fn agent() -> Agent {
        Agent {
            id: AgentId::new(),
            tenant_id: TenantId::new(),
            slug: "ada".to_string(),
            display_name: "Ada".to_string(),
            system_prompt: "You are Ada, a helpful assistant.".to_string(),
            model_profile: ModelProfile {
                llm_provider: "openai".to_string(),
                llm_model: "gpt-4".to_string(),
                stt_provider: "deepgram".to_string(),
                stt_model: "nova-2".to_string(),
                tts_provider: "cartesia".to_string(),
                tts_voice: "default".to_string(),
            },
            embedding_profile: EmbeddingProfile {
                provider: "openai-embedding".to_string(),
                model: "text-embedding-3-small".to_string(),
                dim: 4,
            },
            tools: HashSet::new(),
            defaults: AgentDefaults::default(),
            is_default: true,
        }
    }

    #[tokio::test]
    async fn build_composes_prompt_with_knowledge_citation() {
        let assembler = ContextAssembler::new(
            NoProfile,
            EmptyBuffer,
            OneConversationHit,
            OneKnowledgeHit,
            Arc::new(EmbedGateway::new(FakeEmbedProvider)),
        );
        let cancel = CancellationToken::new();

        let bundle = assembler
            .build(&tenant(), &agent(), UserId::new(), ConversationId::new(), "what's the price?", &cancel)
            .await
            .unwrap();

        assert!(bundle.prompt.starts_with("You are Ada"));
        assert!(bundle.prompt.contains("Relevant Past Conversation"));
        assert!(bundle.prompt.contains("Relevant Knowledge"));
        assert_eq!(bundle.citations.len(), 1);
        assert_eq!(bundle.citations[0].chunk_id, "chunk-1");
        assert!(!bundle.metadata.embedding_unavailable);
    }

    #[tokio::test]
    async fn empty_user_message_is_rejected() {
        let assembler = ContextAssembler::new(
            NoProfile,
            EmptyBuffer,
            OneConversationHit,
            OneKnowledgeHit,
            Arc::new(EmbedGateway::new(FakeEmbedProvider)),
        );
        let cancel = CancellationToken::new();

        let err = assembler
            .build(&tenant(), &agent(), UserId::new(), ConversationId::new(), "", &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_DISPATCH");
    }
}
