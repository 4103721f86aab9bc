//! Deduplicating, batching embedding cache.
//!
//! [`EmbeddingCache`] sits between callers and an [`EmbeddingProvider`]. For
//! each request it resolves already-known texts from the cache, embeds each
//! remaining unique text exactly once in batches of `batch_size` (retrying
//! transient failures with exponential backoff), optionally L2-normalizes
//! the new vectors, and stores them keyed by the exact input text.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::retry::{self, RetryPolicy};
use crate::similarity::normalize;

/// Configuration for an [`EmbeddingCache`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingCacheConfig {
    /// Maximum texts per provider call.
    pub batch_size: usize,
    /// Retry policy for each provider call.
    pub retry: RetryPolicy,
    /// Rescale new vectors to unit L2 norm before caching them.
    pub normalize: bool,
    /// Maximum cached entries, evicted least-recently-used first.
    /// `None` keeps every entry for the lifetime of the cache.
    pub capacity: Option<usize>,
}

impl Default for EmbeddingCacheConfig {
    fn default() -> Self {
        Self { batch_size: 32, retry: RetryPolicy::default(), normalize: true, capacity: Some(10_000) }
    }
}

impl EmbeddingCacheConfig {
    /// Create a new builder starting from the defaults.
    pub fn builder() -> EmbeddingCacheConfigBuilder {
        EmbeddingCacheConfigBuilder::default()
    }

    /// Check that the parameters are usable.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if `batch_size == 0`,
    /// `capacity == Some(0)`, or the retry policy is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(RagError::config("embedding batch_size must be greater than zero"));
        }
        if self.capacity == Some(0) {
            return Err(RagError::config("embedding cache capacity must be greater than zero"));
        }
        retry::validate(&self.retry, "embedding cache")
    }
}

/// Builder for a validated [`EmbeddingCacheConfig`].
#[derive(Debug, Clone, Default)]
pub struct EmbeddingCacheConfigBuilder {
    config: EmbeddingCacheConfig,
}

impl EmbeddingCacheConfigBuilder {
    /// Set the maximum number of texts per provider call.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Set the retry budget for each provider call.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.retry.max_retries = retries;
        self
    }

    /// Set the delay before the first retry.
    pub fn retry_delay(mut self, delay: std::time::Duration) -> Self {
        self.config.retry.base_delay = delay;
        self
    }

    /// Enable or disable L2 normalization of new vectors.
    pub fn normalize(mut self, normalize: bool) -> Self {
        self.config.normalize = normalize;
        self
    }

    /// Bound the cache to `capacity` entries.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = Some(capacity);
        self
    }

    /// Never evict cached entries.
    pub fn unbounded(mut self) -> Self {
        self.config.capacity = None;
        self
    }

    /// Build the config, validating it.
    pub fn build(self) -> Result<EmbeddingCacheConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Counters describing cache effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Input texts answered from the cache.
    pub hits: u64,
    /// Unique texts sent to the provider.
    pub misses: u64,
    /// Provider calls issued, excluding retries.
    pub provider_calls: u64,
    /// Entries currently cached.
    pub entries: usize,
}

/// An order-preserving, deduplicating front for an [`EmbeddingProvider`].
///
/// # Example
///
/// ```rust,ignore
/// use ragflow::{EmbeddingCache, EmbeddingCacheConfig};
///
/// let cache = EmbeddingCache::new(provider, EmbeddingCacheConfig::default())?;
/// let vectors = cache.get_embeddings(&["a", "b", "a"]).await?;
/// assert_eq!(vectors[0], vectors[2]);
/// ```
pub struct EmbeddingCache {
    provider: Arc<dyn EmbeddingProvider>,
    config: EmbeddingCacheConfig,
    entries: Mutex<LruCache<String, Vec<f32>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    provider_calls: AtomicU64,
}

impl std::fmt::Debug for EmbeddingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingCache")
            .field("provider", &self.provider.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EmbeddingCache {
    /// Create a cache in front of `provider`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if `config` is invalid.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: EmbeddingCacheConfig) -> Result<Self> {
        config.validate()?;
        let entries = match config.capacity.and_then(NonZeroUsize::new) {
            Some(capacity) => LruCache::new(capacity),
            None => LruCache::unbounded(),
        };
        Ok(Self {
            provider,
            config,
            entries: Mutex::new(entries),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            provider_calls: AtomicU64::new(0),
        })
    }

    /// The underlying provider.
    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// The cache configuration.
    pub fn config(&self) -> &EmbeddingCacheConfig {
        &self.config
    }

    /// The dimensionality reported by the provider.
    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// Embed a single text.
    pub async fn get_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.get_embeddings(&[text]).await?;
        vectors.pop().ok_or_else(|| RagError::FatalProvider {
            provider: self.provider.name().to_string(),
            message: "no embedding returned".into(),
        })
    }

    /// Embed many texts, returning one vector per input in input order.
    ///
    /// Repeated texts within one call are embedded once and share the same
    /// vector value.
    ///
    /// # Errors
    ///
    /// Returns the provider's error once retries are exhausted, a
    /// [`RagError::FatalProvider`] if the provider returns the wrong number
    /// of vectors, or [`RagError::DimensionMismatch`] if a vector's length
    /// differs from [`EmbeddingProvider::dimensions`].
    pub async fn get_embeddings<S: AsRef<str>>(&self, texts: &[S]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut resolved: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut pending: Vec<String> = Vec::new();
        let mut positions: Vec<Vec<usize>> = Vec::new();

        {
            let mut entries = self.entries.lock().await;
            let mut pending_index: HashMap<&str, usize> = HashMap::new();
            for (i, text) in texts.iter().map(AsRef::as_ref).enumerate() {
                if let Some(vector) = entries.get(text) {
                    resolved[i] = Some(vector.clone());
                    continue;
                }
                match pending_index.get(text) {
                    Some(&slot) => positions[slot].push(i),
                    None => {
                        pending_index.insert(text, pending.len());
                        pending.push(text.to_string());
                        positions.push(vec![i]);
                    }
                }
            }
        }

        let hit_count = resolved.iter().filter(|r| r.is_some()).count() as u64;
        self.hits.fetch_add(hit_count, Ordering::Relaxed);
        self.misses.fetch_add(pending.len() as u64, Ordering::Relaxed);
        debug!(
            provider = self.provider.name(),
            inputs = texts.len(),
            hits = hit_count,
            misses = pending.len(),
            "resolving embeddings"
        );

        if !pending.is_empty() {
            let mut fresh = self.embed_pending(&pending).await?;
            if self.config.normalize {
                fresh.iter_mut().for_each(|v| normalize(v));
            }

            let mut entries = self.entries.lock().await;
            for ((text, vector), slots) in pending.into_iter().zip(fresh).zip(&positions) {
                for &slot in slots {
                    resolved[slot] = Some(vector.clone());
                }
                entries.put(text, vector);
            }
        }

        resolved.into_iter().collect::<Option<Vec<_>>>().ok_or_else(|| RagError::FatalProvider {
            provider: self.provider.name().to_string(),
            message: "embedding missing for an input".into(),
        })
    }

    /// Embed unique texts batch by batch.
    async fn embed_pending(&self, pending: &[String]) -> Result<Vec<Vec<f32>>> {
        let expected_dim = self.provider.dimensions();
        let mut vectors = Vec::with_capacity(pending.len());

        for batch in pending.chunks(self.config.batch_size) {
            self.provider_calls.fetch_add(1, Ordering::Relaxed);
            let batch_vectors =
                self.config.retry.run("embed", || self.provider.embed(batch)).await.map_err(|e| {
                    error!(provider = self.provider.name(), batch_size = batch.len(), error = %e, "embedding batch failed");
                    e
                })?;

            if batch_vectors.len() != batch.len() {
                return Err(RagError::FatalProvider {
                    provider: self.provider.name().to_string(),
                    message: format!(
                        "expected {} embeddings, provider returned {}",
                        batch.len(),
                        batch_vectors.len()
                    ),
                });
            }
            if let Some(bad) = batch_vectors.iter().find(|v| expected_dim > 0 && v.len() != expected_dim) {
                return Err(RagError::DimensionMismatch { expected: expected_dim, actual: bad.len() });
            }
            vectors.extend(batch_vectors);
        }

        Ok(vectors)
    }

    /// Returns `true` if `text` has a cached embedding.
    pub async fn contains(&self, text: &str) -> bool {
        self.entries.lock().await.contains(text)
    }

    /// The number of cached entries.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Returns `true` if nothing is cached.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every cached entry. Counters are kept.
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    /// A snapshot of the cache counters.
    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            provider_calls: self.provider_calls.load(Ordering::Relaxed),
            entries: self.len().await,
        }
    }
}
