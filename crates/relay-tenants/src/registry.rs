use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use relay_core::{RelayError, Result, TenantId};
use rusqlite::Connection;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, instrument, warn};

use crate::db::init_db;
use crate::types::{DataPlaneConfig, MediaPlaneConfig, ProviderKeys, Tenant};

const CACHE_TTL_SECS: i64 = 60;
const POOL_MAX_CONNECTIONS: u32 = 8;

struct CacheEntry {
    tenant: Tenant,
    inserted_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_fresh(&self) -> bool {
        Utc::now().signed_duration_since(self.inserted_at) < chrono::Duration::seconds(CACHE_TTL_SECS)
    }
}

/// A per-tenant connection pool handle. Credential rotation swaps the
/// inner pool atomically (`ArcSwap::store`); any call that already loaded
/// the old `Arc<PgPool>` via `pool()` keeps using it until it finishes —
/// "in-flight calls continue on the old pool until drained" (§4.1).
#[derive(Clone)]
pub struct DataPlaneHandle {
    tenant_id: TenantId,
    inner: Arc<ArcSwap<PgPool>>,
}

impl DataPlaneHandle {
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn pool(&self) -> Arc<PgPool> {
        self.inner.load_full()
    }

    fn rotate(&self, new_pool: PgPool) {
        self.inner.store(Arc::new(new_pool));
    }
}

/// Resolves tenants (and their data-plane handles) for the rest of the
/// core. A 60s TTL cache rather than insertion-order eviction.
pub struct TenantRegistry {
    control: Arc<Mutex<Connection>>,
    cache: DashMap<String, CacheEntry>,
    pools: DashMap<TenantId, DataPlaneHandle>,
}

impl TenantRegistry {
    pub fn new(control: Connection) -> Result<Self> {
        init_db(&control).map_err(|e| RelayError::Database(e.to_string()))?;
        Ok(Self {
            control: Arc::new(Mutex::new(control)),
            cache: DashMap::new(),
            pools: DashMap::new(),
        })
    }

    /// Resolve by id (UUID string) or slug. Cache hit within TTL skips the
    /// control-plane read entirely.
    #[instrument(skip(self))]
    pub fn resolve(&self, tenant_key: &str) -> Result<Tenant> {
        if let Some(entry) = self.cache.get(tenant_key) {
            if entry.is_fresh() {
                return Ok(entry.tenant.clone());
            }
        }

        let tenant = self.load_from_control_plane(tenant_key)?;
        self.cache.insert(
            tenant_key.to_string(),
            CacheEntry {
                tenant: tenant.clone(),
                inserted_at: Utc::now(),
            },
        );
        // Also key by the other identifier so a lookup by id after a
        // lookup by slug (or vice versa) is still a cache hit.
        self.cache.insert(
            tenant.id.to_string(),
            CacheEntry {
                tenant: tenant.clone(),
                inserted_at: Utc::now(),
            },
        );
        self.cache.insert(
            tenant.slug.clone(),
            CacheEntry {
                tenant: tenant.clone(),
                inserted_at: Utc::now(),
            },
        );
        Ok(tenant)
    }

    pub fn invalidate(&self, tenant_key: &str) {
        self.cache.remove(tenant_key);
    }

    pub fn list_active(&self) -> Result<Vec<Tenant>> {
        let conn = self.control.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, slug, sql_endpoint, service_credential, vector_capabilities,
                        media_url, media_api_key, media_api_secret, provider_keys_json, degraded
                 FROM tenants WHERE degraded = 0",
            )
            .map_err(|e| RelayError::Database(e.to_string()))?;
        let rows = stmt
            .query_map([], row_to_tenant)
            .map_err(|e| RelayError::Database(e.to_string()))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Get (or lazily create) a pooled, vector-capable handle for the
    /// tenant's data plane. Bounded to `POOL_MAX_CONNECTIONS` per §4.1.
    pub async fn data_plane_for(&self, tenant: &Tenant) -> Result<DataPlaneHandle> {
        if let Some(handle) = self.pools.get(&tenant.id) {
            return Ok(handle.clone());
        }

        let dsn = tenant
            .data_plane
            .as_ref()
            .ok_or_else(|| RelayError::TenantUnavailable {
                tenant_key: tenant.slug.clone(),
                reason: "tenant has no data plane configured".to_string(),
            })?
            .sql_endpoint
            .clone();

        let pool = connect(&dsn).await?;
        let handle = DataPlaneHandle {
            tenant_id: tenant.id,
            inner: Arc::new(ArcSwap::new(Arc::new(pool))),
        };
        self.pools.insert(tenant.id, handle.clone());
        Ok(handle)
    }

    /// Re-resolve credentials and swap the pool atomically. Existing
    /// holders of the old `Arc<PgPool>` drain naturally.
    #[instrument(skip(self))]
    pub async fn rotate_credentials(&self, tenant: &Tenant, new_dsn: &str) -> Result<()> {
        let pool = connect(new_dsn).await?;
        match self.pools.get(&tenant.id) {
            Some(handle) => {
                handle.rotate(pool);
                info!(tenant_id = %tenant.id, "data-plane credentials rotated");
                Ok(())
            }
            None => {
                let handle = DataPlaneHandle {
                    tenant_id: tenant.id,
                    inner: Arc::new(ArcSwap::new(Arc::new(pool))),
                };
                self.pools.insert(tenant.id, handle);
                Ok(())
            }
        }
    }

    /// Startup + periodic sweep: probe every active tenant's data-plane
    /// handshake. Marks degraded tenants in the control store and returns
    /// the per-tenant outcome so the caller can emit `tenant_degraded`.
    pub async fn health_check_all(&self) -> Vec<(TenantId, bool)> {
        let tenants = match self.list_active() {
            Ok(t) => t,
            Err(e) => {
                warn!("health check sweep could not list tenants: {e}");
                return Vec::new();
            }
        };

        let mut results = Vec::with_capacity(tenants.len());
        for tenant in tenants {
            let reachable = match &tenant.data_plane {
                None => true,
                Some(dp) => connect(&dp.sql_endpoint).await.is_ok(),
            };
            if !reachable {
                warn!(tenant_id = %tenant.id, slug = %tenant.slug, "tenant_degraded");
                self.mark_degraded(&tenant.id);
            }
            results.push((tenant.id, reachable));
        }
        results
    }

    fn mark_degraded(&self, tenant_id: &TenantId) {
        let conn = self.control.lock().unwrap();
        let _ = conn.execute(
            "UPDATE tenants SET degraded = 1 WHERE id = ?1",
            [tenant_id.to_string()],
        );
        self.cache.remove(&tenant_id.to_string());
    }

    fn load_from_control_plane(&self, tenant_key: &str) -> Result<Tenant> {
        let conn = self.control.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, slug, sql_endpoint, service_credential, vector_capabilities,
                        media_url, media_api_key, media_api_secret, provider_keys_json, degraded
                 FROM tenants WHERE id = ?1 OR slug = ?1",
            )
            .map_err(|e| RelayError::Database(e.to_string()))?;
        stmt.query_row([tenant_key], row_to_tenant).map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => RelayError::TenantUnavailable {
                tenant_key: tenant_key.to_string(),
                reason: "not found".to_string(),
            },
            other => RelayError::Database(other.to_string()),
        })
    }
}

async fn connect(dsn: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(POOL_MAX_CONNECTIONS)
        .acquire_timeout(Duration::from_secs(5))
        .connect(dsn)
        .await
        .map_err(|e| RelayError::TenantUnavailable {
            tenant_key: dsn.to_string(),
            reason: e.to_string(),
        })
}

fn row_to_tenant(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tenant> {
    let id: String = row.get(0)?;
    let slug: String = row.get(1)?;
    let sql_endpoint: Option<String> = row.get(2)?;
    let service_credential: Option<String> = row.get(3)?;
    let vector_capabilities: bool = row.get::<_, i64>(4)? != 0;
    let media_url: String = row.get(5)?;
    let media_api_key: String = row.get(6)?;
    let media_api_secret: String = row.get(7)?;
    let provider_keys_json: String = row.get(8)?;
    let degraded: bool = row.get::<_, i64>(9)? != 0;

    let data_plane = sql_endpoint.map(|sql_endpoint| DataPlaneConfig {
        sql_endpoint,
        service_credential: service_credential.unwrap_or_default(),
        vector_capabilities,
    });

    let provider_keys: ProviderKeys =
        serde_json::from_str(&provider_keys_json).unwrap_or_default();

    Ok(Tenant {
        id: id.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text)
        })?,
        slug,
        data_plane,
        media_plane: MediaPlaneConfig {
            url: media_url,
            api_key: media_api_key,
            api_secret: media_api_secret,
        },
        provider_keys,
        degraded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_registry() -> TenantRegistry {
        let conn = Connection::open_in_memory().unwrap();
        TenantRegistry::new(conn).unwrap()
    }

    fn insert_tenant(registry: &TenantRegistry, id: &str, slug: &str) {
        let conn = registry.control.lock().unwrap();
        conn.execute(
            "INSERT INTO tenants (id, slug, sql_endpoint, service_credential, vector_capabilities,
                                   media_url, media_api_key, media_api_secret, provider_keys_json,
                                   degraded, created_at)
             VALUES (?1, ?2, NULL, NULL, 0, 'https://media.example', 'k', 's', '{}', 0, ?3)",
            rusqlite::params![id, slug, Utc::now().to_rfc3339()],
        )
        .unwrap();
    }

    #[test]
    fn resolve_by_slug_then_by_id_both_hit_cache() {
        let registry = make_registry();
        let id = TenantId::new().to_string();
        insert_tenant(&registry, &id, "acme");

        let by_slug = registry.resolve("acme").unwrap();
        let by_id = registry.resolve(&id).unwrap();
        assert_eq!(by_slug.id, by_id.id);
    }

    #[test]
    fn resolve_unknown_tenant_fails() {
        let registry = make_registry();
        let err = registry.resolve("ghost").unwrap_err();
        assert_eq!(err.code(), "TENANT_UNAVAILABLE");
    }

    #[test]
    fn list_active_excludes_degraded() {
        let registry = make_registry();
        let id = TenantId::new().to_string();
        insert_tenant(&registry, &id, "acme");
        registry.mark_degraded(&id.parse().unwrap());
        assert!(registry.list_active().unwrap().is_empty());
    }
}
