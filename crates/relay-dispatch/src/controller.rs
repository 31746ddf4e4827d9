use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use relay_agents::Agent;
use relay_core::{ConversationId, RelayError, Result, RoomName, UserId};
use relay_tenants::Tenant;
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};

use crate::backoff::single_retry_delay;
use crate::media_plane::{MediaPlane, MediaPlaneError};
use crate::types::{ClaimSource, ClaimStatus, DispatchProfile, DispatchResult, WorkerClaimState};

const CLAIM_POLL_DEADLINE_MS: u64 = 8_000;
const CLAIM_POLL_INTERVAL_MS: u64 = 200;
const USER_TOKEN_TTL_SECS: u64 = 600;
const RETRY_BASE: Duration = Duration::from_millis(250);
const RETRY_CAP: Duration = Duration::from_millis(2_000);

/// Tracks providers known to have expired credentials so dispatch can fail
/// eagerly (§4.3: "detected eagerly via a known-expired list... before any
/// network call") instead of discovering it from a media-plane 4xx.
#[derive(Default)]
pub struct ExpiredCredentials {
    entries: DashMap<(relay_core::TenantId, String), ()>,
}

impl ExpiredCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_expired(&self, tenant_id: relay_core::TenantId, provider: &str) {
        self.entries.insert((tenant_id, provider.to_string()), ());
    }

    pub fn clear(&self, tenant_id: relay_core::TenantId, provider: &str) {
        self.entries.remove(&(tenant_id, provider.to_string()));
    }

    fn is_expired(&self, tenant_id: relay_core::TenantId, provider: &str) -> bool {
        self.entries.contains_key(&(tenant_id, provider.to_string()))
    }
}

/// Creates media rooms, attaches job descriptions, mints join tokens, and
/// polls for a worker claim. Idempotent per `room_name` via an in-memory
/// `in_flight: DashMap<RoomName, Arc<OnceCell<DispatchResult>>>` collapse
/// map: the slot is reserved before any network call, so concurrent
/// dispatches for the same room race on the same `OnceCell` and only one
/// of them actually creates the room and mints a token.
pub struct DispatchController<M: MediaPlane, C: ClaimSource> {
    media_plane: M,
    claims: C,
    expired_credentials: Arc<ExpiredCredentials>,
    in_flight: DashMap<RoomName, Arc<OnceCell<DispatchResult>>>,
    room_prefix: String,
    empty_timeout_secs: u64,
}

impl<M: MediaPlane, C: ClaimSource> DispatchController<M, C> {
    pub fn new(
        media_plane: M,
        claims: C,
        expired_credentials: Arc<ExpiredCredentials>,
        room_prefix: String,
        empty_timeout_secs: u64,
    ) -> Self {
        Self {
            media_plane,
            claims,
            expired_credentials,
            in_flight: DashMap::new(),
            room_prefix,
            empty_timeout_secs,
        }
    }

    #[instrument(skip(self, tenant, agent), fields(tenant = %tenant.slug, agent = %agent.slug))]
    pub async fn dispatch(
        &self,
        tenant: &Tenant,
        agent: &Agent,
        user_id: UserId,
        conversation_id: ConversationId,
        room_name: Option<RoomName>,
    ) -> Result<DispatchResult> {
        let room_name = room_name.unwrap_or_else(|| RoomName::generate(&self.room_prefix, &agent.slug));

        // Reserve the slot atomically, before any network call: the DashMap
        // entry API locks the shard for the duration of `or_insert_with`, so
        // only one caller creates the cell, and every caller — including
        // concurrent ones — then races on the same `OnceCell`. The actual
        // create_room/mint/poll work runs at most once per room_name.
        let slot = self.in_flight.entry(room_name.clone()).or_insert_with(|| Arc::new(OnceCell::new())).clone();
        let was_in_flight = slot.initialized();

        let result = slot
            .get_or_try_init(|| async {
                self.check_credentials(tenant, agent)?;

                let profile = DispatchProfile {
                    tenant_id: tenant.id,
                    agent_id: agent.id,
                    system_prompt: agent.system_prompt.clone(),
                    model_profile: agent.model_profile.clone(),
                    user_id,
                    conversation_id,
                    provider_keys_subset: tenant.provider_keys.clone(),
                    embedding_profile: agent.embedding_profile.clone(),
                };
                let job_description = serde_json::to_string(&profile).map_err(RelayError::Serialization)?;

                self.create_room_with_retry(&tenant.media_plane, &room_name, &job_description).await?;

                let user_token = self
                    .media_plane
                    .mint_participant_token(&tenant.media_plane, &room_name, &user_id.to_string(), USER_TOKEN_TTL_SECS)
                    .await
                    .map_err(|e| RelayError::MediaPlane(e.to_string()))?;

                let worker_claim_state = self.poll_for_claim(&room_name).await;

                Ok::<DispatchResult, RelayError>(DispatchResult {
                    room_name: room_name.clone(),
                    user_token,
                    worker_claim_state,
                    server_url: tenant.media_plane.url.clone(),
                })
            })
            .await?;

        if was_in_flight {
            info!(room_name = %result.room_name, "dispatch collapsed onto existing room");
        }
        Ok(result.clone())
    }

    fn check_credentials(&self, tenant: &Tenant, agent: &Agent) -> Result<()> {
        for provider in [
            agent.model_profile.llm_provider.as_str(),
            agent.model_profile.stt_provider.as_str(),
            agent.model_profile.tts_provider.as_str(),
            agent.embedding_profile.provider.as_str(),
        ] {
            if self.expired_credentials.is_expired(tenant.id, provider) {
                return Err(RelayError::CredentialsExpired {
                    tenant_id: tenant.id.to_string(),
                    provider: provider.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn create_room_with_retry(&self, media_plane_config: &relay_tenants::MediaPlaneConfig, room_name: &RoomName, job_description: &str) -> Result<()> {
        match self
            .media_plane
            .create_room(media_plane_config, room_name, job_description, self.empty_timeout_secs)
            .await
        {
            Ok(()) => Ok(()),
            Err(MediaPlaneError::InvalidRequest(reason)) => Err(RelayError::InvalidDispatch { reason }),
            Err(first_err @ (MediaPlaneError::ServerError(_) | MediaPlaneError::Transport(_))) => {
                let delay = single_retry_delay(RETRY_BASE, RETRY_CAP);
                warn!(room_name = %room_name, delay_ms = delay.as_millis(), "media plane create_room failed, retrying once");
                tokio::time::sleep(delay).await;

                self.media_plane
                    .create_room(media_plane_config, room_name, job_description, self.empty_timeout_secs)
                    .await
                    .map_err(|second_err| match second_err {
                        MediaPlaneError::InvalidRequest(reason) => RelayError::InvalidDispatch { reason },
                        _ => RelayError::DispatchUnavailable {
                            reason: format!("{first_err}; retry also failed: {second_err}"),
                        },
                    })
            }
        }
    }

    async fn poll_for_claim(&self, room_name: &RoomName) -> WorkerClaimState {
        let deadline = relay_core::deadline::soft_deadline(CLAIM_POLL_DEADLINE_MS, async {
            loop {
                if let Some(claim) = self.claims.claim_for(room_name).await {
                    if matches!(claim.status, ClaimStatus::Running) {
                        return ();
                    }
                }
                tokio::time::sleep(Duration::from_millis(CLAIM_POLL_INTERVAL_MS)).await;
            }
        })
        .await;

        match deadline {
            Some(()) => WorkerClaimState::Running,
            None => WorkerClaimState::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_agents::{AgentDefaults, EmbeddingProfile, ModelProfile};
    use relay_core::TenantId;
    use relay_tenants::{MediaPlaneConfig, ProviderKeys};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeMediaPlane {
        create_calls: AtomicUsize,
    }

    #[async_trait]
    impl MediaPlane for FakeMediaPlane {
        async fn create_room(&self, _: &MediaPlaneConfig, _: &RoomName, _: &str, _: u64) -> Result<(), MediaPlaneError> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn mint_participant_token(&self, _: &MediaPlaneConfig, _: &RoomName, _: &str, _: u64) -> Result<String, MediaPlaneError> {
            Ok("token-123".to_string())
        }

        async fn list_room_participants(&self, _: &MediaPlaneConfig, _: &RoomName) -> Result<Vec<String>, MediaPlaneError> {
            Ok(vec![])
        }
    }

    struct ImmediateRunningClaims;

    #[async_trait]
    impl ClaimSource for ImmediateRunningClaims {
        async fn claim_for(&self, room_name: &RoomName) -> Option<crate::types::JobClaim> {
            Some(crate::types::JobClaim {
                room_name: room_name.clone(),
                worker_id: "w1".to_string(),
                claimed_at: chrono::Utc::now(),
                status: ClaimStatus::Running,
            })
        }
    }

    fn make_tenant() -> Tenant {
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

    fn make_agent() -> Agent {
        Agent {
            id: relay_core::AgentId::new(),
            tenant_id: TenantId::new(),
            slug: "ada".to_string(),
            display_name: "Ada".to_string(),
            system_prompt: "You are Ada.".to_string(),
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
                dim: 1536,
            },
            tools: HashSet::new(),
            defaults: AgentDefaults::default(),
            is_default: true,
        }
    }

    #[tokio::test]
    async fn duplicate_dispatch_collapses_to_same_result() {
        let controller = DispatchController::new(
            FakeMediaPlane {
                create_calls: AtomicUsize::new(0),
            },
            ImmediateRunningClaims,
            Arc::new(ExpiredCredentials::new()),
            "relay".to_string(),
            300,
        );

        let tenant = make_tenant();
        let agent = make_agent();
        let room = RoomName("r_test_1".to_string());

        let first = controller
            .dispatch(&tenant, &agent, UserId::new(), ConversationId::new(), Some(room.clone()))
            .await
            .unwrap();
        let second = controller
            .dispatch(&tenant, &agent, UserId::new(), ConversationId::new(), Some(room.clone()))
            .await
            .unwrap();

        assert_eq!(first.room_name, second.room_name);
        assert_eq!(first.user_token, second.user_token);
        assert_eq!(controller.media_plane.create_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_duplicate_dispatch_collapses_to_single_create_room() {
        struct SlowFakeMediaPlane {
            create_calls: AtomicUsize,
        }

        #[async_trait]
        impl MediaPlane for SlowFakeMediaPlane {
            async fn create_room(&self, _: &MediaPlaneConfig, _: &RoomName, _: &str, _: u64) -> Result<(), MediaPlaneError> {
                self.create_calls.fetch_add(1, Ordering::SeqCst);
                // Widen the race window so both callers are guaranteed to
                // reach the slot reservation before either finishes.
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            }

            async fn mint_participant_token(&self, _: &MediaPlaneConfig, _: &RoomName, _: &str, _: u64) -> Result<String, MediaPlaneError> {
                Ok("token-456".to_string())
            }

            async fn list_room_participants(&self, _: &MediaPlaneConfig, _: &RoomName) -> Result<Vec<String>, MediaPlaneError> {
                Ok(vec![])
            }
        }

        let controller = Arc::new(DispatchController::new(
            SlowFakeMediaPlane {
                create_calls: AtomicUsize::new(0),
            },
            ImmediateRunningClaims,
            Arc::new(ExpiredCredentials::new()),
            "relay".to_string(),
            300,
        ));

        let tenant = make_tenant();
        let agent = make_agent();
        let room = RoomName("r_concurrent_1".to_string());

        let (c1, c2) = (controller.clone(), controller.clone());
        let (t1, t2) = (tenant.clone(), tenant.clone());
        let (a1, a2) = (agent.clone(), agent.clone());
        let (r1, r2) = (room.clone(), room.clone());

        let (first, second) = tokio::join!(
            c1.dispatch(&t1, &a1, UserId::new(), ConversationId::new(), Some(r1)),
            c2.dispatch(&t2, &a2, UserId::new(), ConversationId::new(), Some(r2)),
        );

        let first = first.unwrap();
        let second = second.unwrap();

        assert_eq!(first.room_name, second.room_name);
        assert_eq!(first.user_token, second.user_token);
        assert_eq!(controller.media_plane.create_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_credentials_fail_before_network_call() {
        let controller = DispatchController::new(
            FakeMediaPlane {
                create_calls: AtomicUsize::new(0),
            },
            ImmediateRunningClaims,
            Arc::new(ExpiredCredentials::new()),
            "relay".to_string(),
            300,
        );

        let tenant = make_tenant();
        let agent = make_agent();
        controller.expired_credentials.mark_expired(tenant.id, "openai");

        let err = controller
            .dispatch(&tenant, &agent, UserId::new(), ConversationId::new(), None)
            .await
            .unwrap_err();

        assert_eq!(err.code(), "CREDENTIALS_EXPIRED");
        assert_eq!(controller.media_plane.create_calls.load(Ordering::SeqCst), 0);
    }
}
