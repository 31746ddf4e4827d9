use relay_agents::EmbeddingProfile;
use tracing::instrument;

use crate::backoff::retry_with_backoff;
use crate::cache::EmbedCache;
use crate::provider::{EmbedError, EmbedProvider};

const DEFAULT_CACHE_SIZE: usize = 10_000;
const DEFAULT_MAX_BATCH: usize = 32;
const MAX_RERANK_DOCS: usize = 100;

/// The C7 contract: `embed`/`rerank` over a pluggable provider, with
/// batching, retry, and an LRU in front of the network call.
pub struct EmbedGateway<P: EmbedProvider> {
    provider: P,
    cache: EmbedCache,
    max_batch: usize,
}

impl<P: EmbedProvider> EmbedGateway<P> {
    pub fn new(provider: P) -> Self {
        Self::with_limits(provider, DEFAULT_CACHE_SIZE, DEFAULT_MAX_BATCH)
    }

    pub fn with_limits(provider: P, cache_size: usize, max_batch: usize) -> Self {
        Self {
            provider,
            cache: EmbedCache::new(cache_size),
            max_batch,
        }
    }

    /// `len(out) == len(texts)`, every vector has `profile.dim` components.
    /// Cache hits short-circuit the network entirely; misses are batched
    /// to `max_batch` and sent through the retrying provider call.
    #[instrument(skip(self, texts, profile), fields(n = texts.len()))]
    pub async fn embed(&self, texts: &[String], profile: &EmbeddingProfile) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut out: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut misses: Vec<usize> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            match self.cache.get(&profile.provider, &profile.model, text) {
                Some(v) => out[i] = Some(v),
                None => misses.push(i),
            }
        }

        for chunk in misses.chunks(self.max_batch) {
            let chunk_texts: Vec<String> = chunk.iter().map(|&i| texts[i].clone()).collect();
            let vectors = retry_with_backoff(|| self.provider.embed_batch(&chunk_texts, profile)).await?;

            for (offset, &i) in chunk.iter().enumerate() {
                self.cache.put(&profile.provider, &profile.model, &texts[i], vectors[offset].clone());
                out[i] = Some(vectors[offset].clone());
            }
        }

        Ok(out.into_iter().map(|v| v.expect("every index filled by cache or fetch")).collect())
    }

    /// `docs` truncated to 100 entries upstream of the provider call.
    #[instrument(skip(self, query, docs, profile), fields(n = docs.len()))]
    pub async fn rerank(
        &self,
        query: &str,
        docs: &[String],
        profile: &EmbeddingProfile,
    ) -> Result<Vec<f32>, EmbedError> {
        let truncated = if docs.len() > MAX_RERANK_DOCS {
            &docs[..MAX_RERANK_DOCS]
        } else {
            docs
        };
        retry_with_backoff(|| self.provider.rerank(query, truncated, profile)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        batch_calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbedProvider for CountingProvider {
        async fn embed_batch(
            &self,
            texts: &[String],
            profile: &EmbeddingProfile,
        ) -> Result<Vec<Vec<f32>>, EmbedError> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![0.5; profile.dim as usize]).collect())
        }

        async fn rerank(&self, _query: &str, docs: &[String], _profile: &EmbeddingProfile) -> Result<Vec<f32>, EmbedError> {
            Ok(vec![0.9; docs.len()])
        }
    }

    fn profile() -> EmbeddingProfile {
        EmbeddingProfile {
            provider: "openai-embedding".to_string(),
            model: "text-embedding-3-small".to_string(),
            dim: 4,
        }
    }

    #[tokio::test]
    async fn embed_preserves_length_and_dim() {
        let gateway = EmbedGateway::new(CountingProvider {
            batch_calls: AtomicUsize::new(0),
        });
        let texts = vec!["hello".to_string(), "world".to_string()];
        let out = gateway.embed(&texts, &profile()).await.unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|v| v.len() == 4));
    }

    #[tokio::test]
    async fn repeated_text_is_served_from_cache() {
        let gateway = EmbedGateway::new(CountingProvider {
            batch_calls: AtomicUsize::new(0),
        });
        let texts = vec!["hello".to_string()];
        gateway.embed(&texts, &profile()).await.unwrap();
        gateway.embed(&texts, &profile()).await.unwrap();
        assert_eq!(gateway.provider.batch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rerank_truncates_to_100_docs() {
        let gateway = EmbedGateway::new(CountingProvider {
            batch_calls: AtomicUsize::new(0),
        });
        let docs: Vec<String> = (0..150).map(|i| format!("doc-{i}")).collect();
        let scores = gateway.rerank("query", &docs, &profile()).await.unwrap();
        assert_eq!(scores.len(), 100);
    }
}
