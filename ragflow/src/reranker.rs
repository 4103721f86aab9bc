//! Second-pass reranking of retrieved candidates.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::Value;
use tracing::{debug, error};

use crate::config::RerankingConfig;
use crate::document::SearchResult;
use crate::error::{RagError, Result};

/// A relevance model that scores candidate texts against a query.
///
/// Implementations wrap cross-encoders, hosted rerank APIs, or LLM-based
/// scorers. Like [`EmbeddingProvider`](crate::EmbeddingProvider), they should
/// report transient failures as
/// [`RagError::RetryableProvider`](crate::RagError::RetryableProvider).
#[async_trait]
pub trait RerankingProvider: Send + Sync {
    /// Return one relevance score per text, in input order.
    async fn rerank(&self, query: &str, texts: &[String]) -> Result<Vec<f32>>;

    /// A short name used in logs and error messages.
    fn name(&self) -> &str {
        "reranker"
    }
}

/// Rescores retrieval results with a [`RerankingProvider`].
///
/// Candidate texts are sent in batches of `batch_size`; batches are scored
/// concurrently and recombined by position, so arrival order never affects
/// the result. Each result's retrieval score is kept in
/// `metadata.original_score` and the provider's score in
/// `metadata.rerank_score`; the new `score` is computed by the configured
/// [`ScoreMergePolicy`](crate::ScoreMergePolicy).
pub struct RerankingStage {
    config: RerankingConfig,
    provider: Arc<dyn RerankingProvider>,
}

impl RerankingStage {
    /// Create a reranking stage.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if `config` is invalid.
    pub fn new(config: RerankingConfig, provider: Arc<dyn RerankingProvider>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, provider })
    }

    /// The stage configuration.
    pub fn config(&self) -> &RerankingConfig {
        &self.config
    }

    /// Rerank `results` for `query`.
    ///
    /// Returns at most `results.len()` results: those below `min_score` are
    /// dropped, the rest are sorted by descending score (ties keep their
    /// input order) and truncated to `limit`.
    pub async fn process(&self, query: &str, results: Vec<SearchResult>) -> Result<Vec<SearchResult>> {
        if results.is_empty() {
            return Ok(results);
        }

        let texts: Vec<String> = results.iter().map(|r| r.document.text()).collect();
        let scores = self.score(query, &texts).await?;

        let policy = self.config.merge_policy;
        let mut reranked: Vec<SearchResult> = results
            .into_iter()
            .zip(scores)
            .map(|(mut result, rerank_score)| {
                let original = result.score;
                result.metadata.insert("original_score".to_string(), Value::from(original));
                result.metadata.insert("rerank_score".to_string(), Value::from(rerank_score));
                result.score = policy.merge(original, rerank_score);
                result
            })
            .filter(|r| self.config.min_score.is_none_or(|min| r.score >= min))
            .collect();

        reranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        reranked.truncate(self.config.limit);

        debug!(
            provider = self.provider.name(),
            candidates = texts.len(),
            kept = reranked.len(),
            "reranking completed"
        );
        Ok(reranked)
    }

    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        let batches = texts.chunks(self.config.batch_size).map(|batch| async move {
            let scores = self
                .config
                .retry
                .run("rerank", || self.provider.rerank(query, batch))
                .await
                .map_err(|e| {
                    error!(provider = self.provider.name(), batch_size = batch.len(), error = %e, "rerank batch failed");
                    e
                })?;
            if scores.len() != batch.len() {
                return Err(RagError::FatalProvider {
                    provider: self.provider.name().to_string(),
                    message: format!(
                        "expected {} scores, provider returned {}",
                        batch.len(),
                        scores.len()
                    ),
                });
            }
            if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
                return Err(RagError::FatalProvider {
                    provider: self.provider.name().to_string(),
                    message: format!("provider returned non-finite score {bad}"),
                });
            }
            Ok(scores)
        });

        // try_join_all yields batch results in submission order.
        Ok(try_join_all(batches).await?.into_iter().flatten().collect())
    }
}
