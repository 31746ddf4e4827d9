use relay_agents::ModelProfile;
use relay_core::{RelayError, Result};
use serde::Deserialize;
use tracing::{debug, warn};

/// Non-streaming chat completion for `mode=text`. The LLM provider API is
/// explicitly out of scope for this core (§1 Non-goals: "not a hosted
/// LLM") — this is a thin contract client only, with streaming and
/// tool-calling dropped since the trigger endpoint's text mode returns
/// one `response` string, not a stream.
pub struct LlmClient {
    client: reqwest::Client,
    api_key: String,
}

impl LlmClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }

    pub async fn complete(&self, profile: &ModelProfile, system_prompt: &str, user_message: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": profile.llm_model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_message},
            ],
        });

        debug!(provider = %profile.llm_provider, model = %profile.llm_model, "sending completion request");

        let resp = self
            .client
            .post(completions_url(&profile.llm_provider))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::Internal(format!("llm transport error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(%status, body = %text, "llm provider error");
            return Err(RelayError::Internal(format!("llm provider returned {status}: {text}")));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| RelayError::Internal(format!("llm response parse error: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| RelayError::Internal("llm provider returned no choices".to_string()))
    }
}

fn completions_url(provider: &str) -> String {
    match provider {
        "openai" | "openai-embedding" => "https://api.openai.com/v1/chat/completions".to_string(),
        other => format!("https://api.{other}.com/v1/chat/completions"),
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}
