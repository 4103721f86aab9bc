//! Configuration for the pipeline stages.
//!
//! Every config is serializable, has sensible defaults, and is validated by
//! its builder's `build()` (or [`PipelineConfig::validate`]) before a stage
//! is constructed from it.

use serde::{Deserialize, Serialize};

use crate::document::Metadata;
use crate::error::{RagError, Result};
use crate::retry::{self, RetryPolicy};

/// Serialize a `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

fn check_score_bound(name: &str, value: Option<f32>) -> Result<()> {
    match value {
        Some(v) if !v.is_finite() => {
            Err(RagError::config(format!("{name} must be a finite number, got {v}")))
        }
        _ => Ok(()),
    }
}

/// Parameters for the retrieval stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalConfig {
    /// The vector store collection to search.
    pub collection: String,
    /// Number of results to return from vector search.
    pub limit: usize,
    /// Minimum similarity score for results.
    #[serde(default)]
    pub min_score: Option<f32>,
    /// Exact-match metadata filter applied to every search.
    #[serde(default)]
    pub filter: Metadata,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { collection: "default".to_string(), limit: 10, min_score: None, filter: Metadata::new() }
    }
}

impl RetrievalConfig {
    /// Create a new builder for constructing a [`RetrievalConfig`].
    pub fn builder() -> RetrievalConfigBuilder {
        RetrievalConfigBuilder::default()
    }

    /// Check that the parameters are usable.
    pub fn validate(&self) -> Result<()> {
        if self.collection.is_empty() {
            return Err(RagError::config("retrieval collection must not be empty"));
        }
        if self.limit == 0 {
            return Err(RagError::config("retrieval limit must be greater than zero"));
        }
        check_score_bound("retrieval min_score", self.min_score)
    }
}

/// Builder for a validated [`RetrievalConfig`].
#[derive(Debug, Clone, Default)]
pub struct RetrievalConfigBuilder {
    config: RetrievalConfig,
}

impl RetrievalConfigBuilder {
    /// Set the collection to search.
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.config.collection = name.into();
        self
    }

    /// Set the number of results to return.
    pub fn limit(mut self, limit: usize) -> Self {
        self.config.limit = limit;
        self
    }

    /// Set the minimum similarity score.
    pub fn min_score(mut self, min_score: f32) -> Self {
        self.config.min_score = Some(min_score);
        self
    }

    /// Add a metadata filter pair.
    pub fn filter(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.config.filter.insert(key.into(), value.into());
        self
    }

    /// Build the [`RetrievalConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if the collection is empty,
    /// `limit == 0`, or `min_score` is not finite.
    pub fn build(self) -> Result<RetrievalConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// How a reranking score is combined with the original retrieval score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum ScoreMergePolicy {
    /// The reranking score replaces the retrieval score.
    #[default]
    Replace,
    /// The mean of the retrieval and reranking scores.
    Average,
    /// `rerank_weight * rerank + (1 - rerank_weight) * original`.
    Weighted {
        /// Weight of the reranking score, in `[0, 1]`.
        rerank_weight: f32,
    },
}

impl ScoreMergePolicy {
    /// Combine an original and a reranked score.
    pub fn merge(&self, original: f32, reranked: f32) -> f32 {
        match self {
            ScoreMergePolicy::Replace => reranked,
            ScoreMergePolicy::Average => (original + reranked) / 2.0,
            ScoreMergePolicy::Weighted { rerank_weight } => {
                rerank_weight * reranked + (1.0 - rerank_weight) * original
            }
        }
    }
}

/// Parameters for the reranking stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RerankingConfig {
    /// Maximum results kept after reranking.
    pub limit: usize,
    /// Drop results whose merged score is below this value.
    #[serde(default)]
    pub min_score: Option<f32>,
    /// Candidates per provider call. Batches are scored concurrently.
    pub batch_size: usize,
    /// How reranking scores combine with retrieval scores.
    #[serde(default)]
    pub merge_policy: ScoreMergePolicy,
    /// Retry policy for each provider call.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for RerankingConfig {
    fn default() -> Self {
        Self {
            limit: 5,
            min_score: None,
            batch_size: 16,
            merge_policy: ScoreMergePolicy::Replace,
            retry: RetryPolicy::default(),
        }
    }
}

impl RerankingConfig {
    /// Create a new builder for constructing a [`RerankingConfig`].
    pub fn builder() -> RerankingConfigBuilder {
        RerankingConfigBuilder::default()
    }

    /// Check that the parameters are usable.
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(RagError::config("reranking limit must be greater than zero"));
        }
        if self.batch_size == 0 {
            return Err(RagError::config("reranking batch_size must be greater than zero"));
        }
        if let ScoreMergePolicy::Weighted { rerank_weight } = self.merge_policy {
            if !(0.0..=1.0).contains(&rerank_weight) {
                return Err(RagError::config(format!(
                    "rerank_weight ({rerank_weight}) must be within [0, 1]"
                )));
            }
        }
        check_score_bound("reranking min_score", self.min_score)?;
        retry::validate(&self.retry, "reranking")
    }
}

/// Builder for a validated [`RerankingConfig`].
#[derive(Debug, Clone, Default)]
pub struct RerankingConfigBuilder {
    config: RerankingConfig,
}

impl RerankingConfigBuilder {
    /// Set the number of results kept after reranking.
    pub fn limit(mut self, limit: usize) -> Self {
        self.config.limit = limit;
        self
    }

    /// Set the minimum merged score.
    pub fn min_score(mut self, min_score: f32) -> Self {
        self.config.min_score = Some(min_score);
        self
    }

    /// Set the number of candidates per provider call.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Set the score merge policy.
    pub fn merge_policy(mut self, policy: ScoreMergePolicy) -> Self {
        self.config.merge_policy = policy;
        self
    }

    /// Set the retry policy for provider calls.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Build the [`RerankingConfig`].
    pub fn build(self) -> Result<RerankingConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Parameters for the generation stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationConfig {
    /// Model identifier passed to the provider and reported in metadata.
    pub model: String,
    /// Sampling temperature, in `[0, 2]`.
    pub temperature: f32,
    /// Nucleus sampling mass, in `(0, 1]`.
    pub top_p: f32,
    /// Context budget in words (a token proxy). Documents that would exceed
    /// it are left out of the context.
    pub max_input_tokens: usize,
    /// Maximum tokens the provider may generate.
    pub max_output_tokens: usize,
    /// Prefix each document's text with its metadata.
    #[serde(default)]
    pub include_metadata: bool,
    /// Retry policy for each provider call.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            temperature: 0.7,
            top_p: 1.0,
            max_input_tokens: 4096,
            max_output_tokens: 1024,
            include_metadata: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl GenerationConfig {
    /// Create a new builder for constructing a [`GenerationConfig`].
    pub fn builder() -> GenerationConfigBuilder {
        GenerationConfigBuilder::default()
    }

    /// Check that the parameters are usable.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(RagError::config(format!(
                "temperature ({}) must be within [0, 2]",
                self.temperature
            )));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(RagError::config(format!("top_p ({}) must be within (0, 1]", self.top_p)));
        }
        if self.max_input_tokens == 0 || self.max_output_tokens == 0 {
            return Err(RagError::config("token limits must be greater than zero"));
        }
        retry::validate(&self.retry, "generation")
    }
}

/// Builder for a validated [`GenerationConfig`].
#[derive(Debug, Clone, Default)]
pub struct GenerationConfigBuilder {
    config: GenerationConfig,
}

impl GenerationConfigBuilder {
    /// Set the model identifier.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    /// Set the sampling temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = temperature;
        self
    }

    /// Set the nucleus sampling mass.
    pub fn top_p(mut self, top_p: f32) -> Self {
        self.config.top_p = top_p;
        self
    }

    /// Set the context budget in words.
    pub fn max_input_tokens(mut self, tokens: usize) -> Self {
        self.config.max_input_tokens = tokens;
        self
    }

    /// Set the generation limit.
    pub fn max_output_tokens(mut self, tokens: usize) -> Self {
        self.config.max_output_tokens = tokens;
        self
    }

    /// Include document metadata in the context block.
    pub fn include_metadata(mut self, include: bool) -> Self {
        self.config.include_metadata = include;
        self
    }

    /// Set the retry policy for provider calls.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Build the [`GenerationConfig`].
    pub fn build(self) -> Result<GenerationConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Which stages a pipeline runs, and how.
///
/// Immutable once a [`Pipeline`](crate::Pipeline) is built from it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Retrieval parameters. Always active.
    pub retrieval: RetrievalConfig,
    /// Reranking parameters, when the stage is active.
    #[serde(default)]
    pub reranking: Option<RerankingConfig>,
    /// Generation parameters, when the stage is active.
    #[serde(default)]
    pub generation: Option<GenerationConfig>,
    /// Degrade instead of failing when reranking or generation fails.
    #[serde(default)]
    pub allow_partial_results: bool,
}

impl PipelineConfig {
    /// Parse and validate a JSON pipeline description.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Serialization`] for malformed JSON and
    /// [`RagError::Configuration`] for invalid values.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every configured section.
    pub fn validate(&self) -> Result<()> {
        self.retrieval.validate()?;
        if let Some(reranking) = &self.reranking {
            reranking.validate()?;
        }
        if let Some(generation) = &self.generation {
            generation.validate()?;
        }
        Ok(())
    }
}
