use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_EMPTY_TIMEOUT_SECONDS: u64 = 300;
pub const CONTEXT_DEADLINE_MS_TEXT: u64 = 1_200;
pub const CONTEXT_DEADLINE_MS_VOICE: u64 = 700;
pub const EMBED_CACHE_SIZE: usize = 10_000;

/// Top-level config (`relay.toml` + `RELAY_*` env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    pub control_plane: ControlPlaneConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub embed: EmbedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

/// Control-plane store: where tenants and agents themselves are bootstrapped
/// from. Corresponds to spec.md §6's `CONTROL_PLANE_URL`/`CONTROL_PLANE_CREDENTIAL`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    pub url: String,
    pub credential: String,
    #[serde(default = "default_control_plane_db_path")]
    pub sqlite_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_empty_timeout")]
    pub empty_timeout_seconds: u64,
    #[serde(default = "default_worker_pool_label")]
    pub worker_pool_label: String,
    #[serde(default = "default_room_prefix")]
    pub room_prefix: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            empty_timeout_seconds: default_empty_timeout(),
            worker_pool_label: default_worker_pool_label(),
            room_prefix: default_room_prefix(),
        }
    }
}

/// Tunable thresholds and top-K values for the context assembler (§4.5,
/// §9 open question: tenant/agent-overridable, these are the global
/// conservative defaults).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_deadline_text")]
    pub deadline_ms_text: u64,
    #[serde(default = "default_deadline_voice")]
    pub deadline_ms_voice: u64,
    #[serde(default = "default_n_buf")]
    pub n_buf: usize,
    #[serde(default = "default_k_conv")]
    pub k_conv: usize,
    #[serde(default = "default_k_doc")]
    pub k_doc: usize,
    #[serde(default = "default_theta_conv")]
    pub theta_conv: f32,
    #[serde(default = "default_theta_doc")]
    pub theta_doc: f32,
    #[serde(default = "default_l_trivial")]
    pub l_trivial: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            deadline_ms_text: default_deadline_text(),
            deadline_ms_voice: default_deadline_voice(),
            n_buf: default_n_buf(),
            k_conv: default_k_conv(),
            k_doc: default_k_doc(),
            theta_conv: default_theta_conv(),
            theta_doc: default_theta_doc(),
            l_trivial: default_l_trivial(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedConfig {
    #[serde(default = "default_embed_cache_size")]
    pub cache_size: usize,
    #[serde(default = "default_embed_max_batch")]
    pub max_batch: usize,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            cache_size: default_embed_cache_size(),
            max_batch: default_embed_max_batch(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_control_plane_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.relay/control-plane.db")
}
fn default_empty_timeout() -> u64 {
    DEFAULT_EMPTY_TIMEOUT_SECONDS
}
fn default_worker_pool_label() -> String {
    "relay-voice-worker".to_string()
}
fn default_room_prefix() -> String {
    "relay".to_string()
}
fn default_deadline_text() -> u64 {
    CONTEXT_DEADLINE_MS_TEXT
}
fn default_deadline_voice() -> u64 {
    CONTEXT_DEADLINE_MS_VOICE
}
fn default_n_buf() -> usize {
    10
}
fn default_k_conv() -> usize {
    6
}
fn default_k_doc() -> usize {
    8
}
fn default_theta_conv() -> f32 {
    0.30
}
fn default_theta_doc() -> f32 {
    0.30
}
fn default_l_trivial() -> usize {
    3
}
fn default_embed_cache_size() -> usize {
    EMBED_CACHE_SIZE
}
fn default_embed_max_batch() -> usize {
    32
}

impl RelayConfig {
    /// Load config from a TOML file with `RELAY_*` env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. `RELAY_CONFIG` env var
    ///   3. `~/.relay/relay.toml`
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("RELAY_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("RELAY_").split("_"))
            .extract()
            .map_err(|e| RelayError::Config(e.to_string()))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.relay/relay.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_config_defaults_match_spec() {
        let c = ContextConfig::default();
        assert_eq!(c.deadline_ms_text, 1_200);
        assert_eq!(c.deadline_ms_voice, 700);
        assert_eq!(c.n_buf, 10);
        assert_eq!(c.k_conv, 6);
        assert_eq!(c.k_doc, 8);
        assert!((c.theta_conv - 0.30).abs() < f32::EPSILON);
        assert!((c.theta_doc - 0.30).abs() < f32::EPSILON);
    }
}
