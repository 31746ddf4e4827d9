use chrono::{DateTime, Utc};
use dashmap::DashMap;
use relay_core::{RelayError, Result, TenantId};
use relay_tenants::Tenant;
use sqlx::Row;
use tracing::instrument;

use crate::types::{Agent, AgentDefaults, EmbeddingProfile, ModelProfile};

const CACHE_TTL_SECS: i64 = 30;

struct CacheEntry {
    agent: Agent,
    inserted_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_fresh(&self) -> bool {
        Utc::now().signed_duration_since(self.inserted_at) < chrono::Duration::seconds(CACHE_TTL_SECS)
    }
}

/// Resolves agents from each tenant's own data plane. Cache keyed by
/// `(tenant_id, slug-or-"default")`, TTL 30s per §4.2, invalidated
/// explicitly after admin writes via `invalidate`.
pub struct AgentRegistry {
    cache: DashMap<(TenantId, String), CacheEntry>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    #[instrument(skip(self, tenant, data_plane))]
    pub async fn resolve(
        &self,
        tenant: &Tenant,
        data_plane: &sqlx::PgPool,
        slug: Option<&str>,
    ) -> Result<Agent> {
        let cache_key = (tenant.id, slug.unwrap_or("__default__").to_string());
        if let Some(entry) = self.cache.get(&cache_key) {
            if entry.is_fresh() {
                return Ok(entry.agent.clone());
            }
        }

        let agent = match slug {
            Some(slug) => fetch_by_slug(data_plane, tenant.id, slug).await?,
            None => fetch_default(data_plane, tenant.id).await?,
        };

        agent.model_profile.validate()?;
        agent.embedding_profile.validate()?;

        self.cache.insert(
            cache_key,
            CacheEntry {
                agent: agent.clone(),
                inserted_at: Utc::now(),
            },
        );
        Ok(agent)
    }

    pub async fn list_for(&self, tenant: &Tenant, data_plane: &sqlx::PgPool) -> Result<Vec<Agent>> {
        let rows = sqlx::query(
            "SELECT id, slug, display_name, system_prompt, model_profile, embedding_profile,
                    tools, defaults, is_default
             FROM agents WHERE tenant_id = $1 ORDER BY slug",
        )
        .bind(tenant.id.as_uuid())
        .fetch_all(data_plane)
        .await
        .map_err(|e| RelayError::Database(e.to_string()))?;

        rows.iter().map(|r| row_to_agent(r, tenant.id)).collect()
    }

    pub fn invalidate(&self, tenant_id: TenantId, slug: &str) {
        self.cache.remove(&(tenant_id, slug.to_string()));
        self.cache.remove(&(tenant_id, "__default__".to_string()));
    }
}

async fn fetch_by_slug(pool: &sqlx::PgPool, tenant_id: TenantId, slug: &str) -> Result<Agent> {
    let row = sqlx::query(
        "SELECT id, slug, display_name, system_prompt, model_profile, embedding_profile,
                tools, defaults, is_default
         FROM agents WHERE tenant_id = $1 AND slug = $2",
    )
    .bind(tenant_id.as_uuid())
    .bind(slug)
    .fetch_optional(pool)
    .await
    .map_err(|e| RelayError::Database(e.to_string()))?
    .ok_or_else(|| RelayError::AgentNotFound {
        tenant_id: tenant_id.to_string(),
        slug: slug.to_string(),
    })?;

    row_to_agent(&row, tenant_id)
}

async fn fetch_default(pool: &sqlx::PgPool, tenant_id: TenantId) -> Result<Agent> {
    let row = sqlx::query(
        "SELECT id, slug, display_name, system_prompt, model_profile, embedding_profile,
                tools, defaults, is_default
         FROM agents WHERE tenant_id = $1 AND is_default = true LIMIT 1",
    )
    .bind(tenant_id.as_uuid())
    .fetch_optional(pool)
    .await
    .map_err(|e| RelayError::Database(e.to_string()))?
    .ok_or_else(|| RelayError::AgentNotFound {
        tenant_id: tenant_id.to_string(),
        slug: "<default>".to_string(),
    })?;

    row_to_agent(&row, tenant_id)
}

fn row_to_agent(row: &sqlx::postgres::PgRow, tenant_id: TenantId) -> Result<Agent> {
    let id: uuid::Uuid = row.try_get("id").map_err(|e| RelayError::Database(e.to_string()))?;
    let slug: String = row.try_get("slug").map_err(|e| RelayError::Database(e.to_string()))?;
    let display_name: String = row
        .try_get("display_name")
        .map_err(|e| RelayError::Database(e.to_string()))?;
    let system_prompt: String = row
        .try_get("system_prompt")
        .map_err(|e| RelayError::Database(e.to_string()))?;
    let model_profile_json: serde_json::Value = row
        .try_get("model_profile")
        .map_err(|e| RelayError::Database(e.to_string()))?;
    let embedding_profile_json: serde_json::Value = row
        .try_get("embedding_profile")
        .map_err(|e| RelayError::Database(e.to_string()))?;
    let tools_json: serde_json::Value =
        row.try_get("tools").map_err(|e| RelayError::Database(e.to_string()))?;
    let defaults_json: serde_json::Value = row
        .try_get("defaults")
        .map_err(|e| RelayError::Database(e.to_string()))?;
    let is_default: bool = row
        .try_get("is_default")
        .map_err(|e| RelayError::Database(e.to_string()))?;

    let model_profile: ModelProfile =
        serde_json::from_value(model_profile_json).map_err(RelayError::Serialization)?;
    let embedding_profile: EmbeddingProfile =
        serde_json::from_value(embedding_profile_json).map_err(RelayError::Serialization)?;
    let tools: Vec<String> = serde_json::from_value(tools_json).unwrap_or_default();
    let defaults: AgentDefaults = serde_json::from_value(defaults_json).unwrap_or_default();

    Ok(Agent {
        id: id.into(),
        tenant_id,
        slug,
        display_name,
        system_prompt,
        model_profile,
        embedding_profile,
        tools: tools.into_iter().collect(),
        defaults,
        is_default,
    })
}
