use async_trait::async_trait;
use relay_agents::EmbeddingProfile;

#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbedError {
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider returned {got} vectors for {expected} inputs")]
    LengthMismatch { expected: usize, got: usize },
    #[error("vector has {got} components, expected {expected}")]
    DimMismatch { expected: u32, got: usize },
}

impl EmbedError {
    pub fn is_retryable(&self) -> bool {
        match self {
            EmbedError::RateLimited { .. } => true,
            EmbedError::Transport(_) => true,
            EmbedError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Uniform embed/rerank contract over pluggable providers, narrowed to
/// the two RAG-facing operations C7 needs.
#[async_trait]
pub trait EmbedProvider: Send + Sync {
    async fn embed_batch(
        &self,
        texts: &[String],
        profile: &EmbeddingProfile,
    ) -> Result<Vec<Vec<f32>>, EmbedError>;

    async fn rerank(
        &self,
        query: &str,
        docs: &[String],
        profile: &EmbeddingProfile,
    ) -> Result<Vec<f32>, EmbedError>;
}

/// HTTP JSON provider client. 429/non-2xx branching follows
/// `OpenAiProvider::send` exactly: 429 extracts `retry-after` (seconds ->
/// ms, default 5000ms), other non-2xx becomes `Api{status, message}`.
pub struct HttpEmbedProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpEmbedProvider {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value, EmbedError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry_after_ms = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(5000);
            return Err(EmbedError::RateLimited { retry_after_ms });
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(EmbedError::Api { status, message: text });
        }

        resp.json().await.map_err(|e| EmbedError::Transport(e.to_string()))
    }
}

#[async_trait]
impl EmbedProvider for HttpEmbedProvider {
    async fn embed_batch(
        &self,
        texts: &[String],
        profile: &EmbeddingProfile,
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        let body = self
            .post(
                "/embed",
                serde_json::json!({ "model": profile.model, "inputs": texts }),
            )
            .await?;

        let vectors: Vec<Vec<f32>> = serde_json::from_value(
            body.get("vectors").cloned().unwrap_or(serde_json::Value::Null),
        )
        .map_err(|e| EmbedError::Transport(e.to_string()))?;

        if vectors.len() != texts.len() {
            return Err(EmbedError::LengthMismatch {
                expected: texts.len(),
                got: vectors.len(),
            });
        }
        for v in &vectors {
            if v.len() != profile.dim as usize {
                return Err(EmbedError::DimMismatch {
                    expected: profile.dim,
                    got: v.len(),
                });
            }
        }
        Ok(vectors)
    }

    async fn rerank(
        &self,
        query: &str,
        docs: &[String],
        profile: &EmbeddingProfile,
    ) -> Result<Vec<f32>, EmbedError> {
        let body = self
            .post(
                "/rerank",
                serde_json::json!({ "model": profile.model, "query": query, "docs": docs }),
            )
            .await?;

        let scores: Vec<f32> = serde_json::from_value(
            body.get("scores").cloned().unwrap_or(serde_json::Value::Null),
        )
        .map_err(|e| EmbedError::Transport(e.to_string()))?;

        if scores.len() != docs.len() {
            return Err(EmbedError::LengthMismatch {
                expected: docs.len(),
                got: scores.len(),
            });
        }
        Ok(scores)
    }
}
