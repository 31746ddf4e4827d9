use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use sha2::{Digest, Sha256};

/// Process-local cache keyed by `(provider, model, sha256(text))`, sized
/// 10 000 entries per §4.7.
pub struct EmbedCache {
    inner: Mutex<LruCache<String, Vec<f32>>>,
}

impl EmbedCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, provider: &str, model: &str, text: &str) -> Option<Vec<f32>> {
        let key = cache_key(provider, model, text);
        self.inner.lock().unwrap().get(&key).cloned()
    }

    pub fn put(&self, provider: &str, model: &str, text: &str, vector: Vec<f32>) {
        let key = cache_key(provider, model, text);
        self.inner.lock().unwrap().put(key, vector);
    }
}

fn cache_key(provider: &str, model: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{provider}:{model}:{digest}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let cache = EmbedCache::new(10);
        cache.put("openai", "text-embedding-3-small", "hello", vec![0.1, 0.2]);
        assert_eq!(
            cache.get("openai", "text-embedding-3-small", "hello"),
            Some(vec![0.1, 0.2])
        );
    }

    #[test]
    fn different_provider_is_a_cache_miss() {
        let cache = EmbedCache::new(10);
        cache.put("openai", "m", "hello", vec![0.1]);
        assert_eq!(cache.get("siliconflow", "m", "hello"), None);
    }

    #[test]
    fn eviction_drops_least_recently_used() {
        let cache = EmbedCache::new(1);
        cache.put("openai", "m", "a", vec![1.0]);
        cache.put("openai", "m", "b", vec![2.0]);
        assert_eq!(cache.get("openai", "m", "a"), None);
        assert_eq!(cache.get("openai", "m", "b"), Some(vec![2.0]));
    }
}
