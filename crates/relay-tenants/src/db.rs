use rusqlite::Connection;

/// Control-plane schema: tenants only. Agents are resolved from each
/// tenant's own data plane (§4.2 — "resolution is per-tenant, queries the
/// tenant's data plane"), so they are not bookkept here; see DESIGN.md's
/// Open Question decisions for why this reads §9's "control-plane knows
/// tenants and agents" note as the registry *pattern* (a reified
/// `TenantRegistry`/`AgentRegistry` value) rather than a literal shared
/// table. Tenant data proper (conversations, turns, knowledge) lives in
/// each tenant's own data plane, never here.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tenants (
            id                  TEXT PRIMARY KEY,
            slug                TEXT UNIQUE NOT NULL,
            sql_endpoint        TEXT,
            service_credential  TEXT,
            vector_capabilities INTEGER NOT NULL DEFAULT 0,
            media_url           TEXT NOT NULL,
            media_api_key       TEXT NOT NULL,
            media_api_secret    TEXT NOT NULL,
            provider_keys_json  TEXT NOT NULL DEFAULT '{}',
            degraded            INTEGER NOT NULL DEFAULT 0,
            created_at          TEXT NOT NULL
        );
        ",
    )
}
