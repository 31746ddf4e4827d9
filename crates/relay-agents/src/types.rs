use std::collections::HashSet;

use relay_core::{AgentId, RelayError, Result, TenantId};
use serde::{Deserialize, Serialize};

use crate::registry_table::{lookup, ProviderKind};

pub const VALID_EMBEDDING_DIMS: &[u32] = &[384, 768, 1024, 1536];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProfile {
    pub llm_provider: String,
    pub llm_model: String,
    pub stt_provider: String,
    pub stt_model: String,
    pub tts_provider: String,
    pub tts_voice: String,
}

impl ModelProfile {
    /// Validates every provider slot against the closed provider sum.
    /// Unknown providers fail resolution per §4.2.
    pub fn validate(&self) -> Result<()> {
        check(&self.llm_provider, ProviderKind::Llm)?;
        check(&self.stt_provider, ProviderKind::Stt)?;
        check(&self.tts_provider, ProviderKind::Tts)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingProfile {
    pub provider: String,
    pub model: String,
    pub dim: u32,
}

impl EmbeddingProfile {
    pub fn validate(&self) -> Result<()> {
        check(&self.provider, ProviderKind::Embedding)?;
        if !VALID_EMBEDDING_DIMS.contains(&self.dim) {
            return Err(RelayError::InvalidDispatch {
                reason: format!(
                    "embedding dim {} is not one of {:?}",
                    self.dim, VALID_EMBEDDING_DIMS
                ),
            });
        }
        Ok(())
    }
}

fn check(provider: &str, kind: ProviderKind) -> Result<()> {
    lookup(provider, kind)
        .map(|_| ())
        .ok_or_else(|| RelayError::InvalidDispatch {
            reason: format!("unknown {kind:?} provider '{provider}'"),
        })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefaults {
    pub max_context_tokens: usize,
    pub temperature: f32,
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

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            max_context_tokens: 8_000,
            temperature: 0.7,
            n_buf: default_n_buf(),
            k_conv: default_k_conv(),
            k_doc: default_k_doc(),
            theta_conv: default_theta_conv(),
            theta_doc: default_theta_doc(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub tenant_id: TenantId,
    pub slug: String,
    pub display_name: String,
    pub system_prompt: String,
    pub model_profile: ModelProfile,
    pub embedding_profile: EmbeddingProfile,
    pub tools: HashSet<String>,
    pub defaults: AgentDefaults,
    pub is_default: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> ModelProfile {
        ModelProfile {
            llm_provider: "anthropic".into(),
            llm_model: "claude".into(),
            stt_provider: "deepgram".into(),
            stt_model: "nova".into(),
            tts_provider: "elevenlabs".into(),
            tts_voice: "v1".into(),
        }
    }

    #[test]
    fn valid_model_profile_passes() {
        assert!(profile().validate().is_ok());
    }

    #[test]
    fn unknown_llm_provider_fails() {
        let mut p = profile();
        p.llm_provider = "not-a-provider".into();
        assert!(p.validate().is_err());
    }

    #[test]
    fn embedding_dim_must_be_recognised() {
        let ok = EmbeddingProfile {
            provider: "siliconflow".into(),
            model: "bge".into(),
            dim: 1024,
        };
        assert!(ok.validate().is_ok());

        let bad = EmbeddingProfile {
            dim: 999,
            ..ok
        };
        assert!(bad.validate().is_err());
    }
}
