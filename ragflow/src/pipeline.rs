//! Three-stage RAG pipeline orchestrator.
//!
//! The [`Pipeline`] runs retrieval, then optional reranking, then optional
//! generation, and returns one [`PipelineResponse`]. Construct one via
//! [`Pipeline::builder()`].
//!
//! # Example
//!
//! ```rust,ignore
//! use ragflow::{InMemoryVectorStore, Pipeline, RetrievalConfig};
//!
//! let pipeline = Pipeline::builder()
//!     .retrieval(RetrievalConfig::builder().collection("docs").limit(5).build()?)
//!     .embedding_provider(Arc::new(my_embedder))
//!     .vector_store(Arc::new(InMemoryVectorStore::new()))
//!     .reranking(RerankingConfig::default(), Arc::new(my_reranker)) // optional
//!     .generation(GenerationConfig::default(), Arc::new(my_llm))   // optional
//!     .build()?;
//!
//! let response = pipeline.process("how do lifetimes work?", Metadata::new()).await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cache::{EmbeddingCache, EmbeddingCacheConfig};
use crate::chunking::Chunker;
use crate::config::{GenerationConfig, PipelineConfig, RerankingConfig, RetrievalConfig};
use crate::document::{Metadata, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result, Stage};
use crate::generation::{GenerationProvider, GenerationStage, Usage};
use crate::reranker::{RerankingProvider, RerankingStage};
use crate::retrieval::RetrievalStage;
use crate::vectorstore::VectorStore;

/// The result of one [`Pipeline::process`] call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineResponse {
    /// Generated text, or empty when no generation stage is configured.
    pub response_text: String,
    /// Token usage, zeroed when no generation stage ran.
    pub usage: Usage,
    /// Stage metadata: `stages`, `retrieved_count`, `result_count`,
    /// `elapsed_ms`, generation fields, and the caller's `request` metadata.
    pub metadata: Metadata,
    /// The results the response is grounded in, after reranking.
    pub results: Vec<SearchResult>,
}

/// Await `fut`, aborting with [`RagError::Cancelled`] if `token` fires first.
async fn guarded<T>(
    token: Option<&CancellationToken>,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match token {
        None => fut.await,
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(RagError::Cancelled),
                result = fut => result,
            }
        }
    }
}

/// The RAG pipeline orchestrator.
///
/// A failure in any configured stage aborts the call with a
/// [`RagError::PipelineStage`] naming the stage, unless
/// [`PipelineConfig::allow_partial_results`] is set, in which case a
/// reranking failure falls back to retrieval order and a generation failure
/// returns the results with empty text and a `generation_error` entry.
/// Retrieval failures always abort.
pub struct Pipeline {
    config: PipelineConfig,
    retrieval: RetrievalStage,
    reranking: Option<RerankingStage>,
    generation: Option<GenerationStage>,
}

impl Pipeline {
    /// Create a new [`PipelineBuilder`].
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// The configuration the pipeline was built with.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The retrieval stage, for ingestion passthroughs.
    pub fn retrieval(&self) -> &RetrievalStage {
        &self.retrieval
    }

    /// The reranking stage, if configured.
    pub fn reranking(&self) -> Option<&RerankingStage> {
        self.reranking.as_ref()
    }

    /// The generation stage, if configured.
    pub fn generation(&self) -> Option<&GenerationStage> {
        self.generation.as_ref()
    }

    /// Chunk, embed and store a document in the retrieval collection.
    pub async fn ingest(
        &self,
        document_id: &str,
        text: &str,
        metadata: &Metadata,
        chunker: &dyn Chunker,
    ) -> Result<Vec<String>> {
        self.retrieval.ingest(document_id, text, metadata, chunker).await
    }

    /// Answer `query` by running every configured stage in order.
    ///
    /// `metadata` is caller context (request ids, user tags) echoed back
    /// under `metadata.request`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::PipelineStage`] identifying the failed stage.
    pub async fn process(&self, query: &str, metadata: Metadata) -> Result<PipelineResponse> {
        self.run(query, metadata, None).await
    }

    /// Like [`process`](Self::process), but aborts with
    /// [`RagError::Cancelled`] as soon as `token` is cancelled.
    pub async fn process_with_cancellation(
        &self,
        query: &str,
        metadata: Metadata,
        token: &CancellationToken,
    ) -> Result<PipelineResponse> {
        self.run(query, metadata, Some(token)).await
    }

    async fn run(
        &self,
        query: &str,
        request: Metadata,
        token: Option<&CancellationToken>,
    ) -> Result<PipelineResponse> {
        let started = Instant::now();
        let mut metadata = Metadata::new();
        let mut stages = vec![Stage::Retrieval];

        // 1. Retrieve
        let results = guarded(token, self.retrieval.process(query)).await.map_err(|e| {
            error!(stage = %Stage::Retrieval, error = %e, "pipeline stage failed");
            RagError::stage(Stage::Retrieval, e)
        })?;
        let retrieved_count = results.len();

        // 2. Rerank if a reranking stage is configured
        let results = match &self.reranking {
            Some(stage) => {
                let fallback = self.config.allow_partial_results.then(|| results.clone());
                match guarded(token, stage.process(query, results)).await {
                    Ok(reranked) => {
                        stages.push(Stage::Reranking);
                        reranked
                    }
                    Err(RagError::Cancelled) => return Err(RagError::Cancelled),
                    Err(e) => match fallback {
                        Some(fallback) => {
                            warn!(stage = %Stage::Reranking, error = %e, "stage failed, using retrieval order");
                            metadata.insert("reranking_error".to_string(), Value::from(e.to_string()));
                            fallback
                        }
                        None => {
                            error!(stage = %Stage::Reranking, error = %e, "pipeline stage failed");
                            return Err(RagError::stage(Stage::Reranking, e));
                        }
                    },
                }
            }
            None => results,
        };

        // 3. Generate if a generation stage is configured
        let mut response_text = String::new();
        let mut usage = Usage::default();
        if let Some(stage) = &self.generation {
            match guarded(token, stage.process(query, &results)).await {
                Ok(generated) => {
                    stages.push(Stage::Generation);
                    response_text = generated.response_text;
                    usage = generated.usage;
                    metadata.extend(generated.metadata);
                }
                Err(RagError::Cancelled) => return Err(RagError::Cancelled),
                Err(e) if self.config.allow_partial_results => {
                    warn!(stage = %Stage::Generation, error = %e, "stage failed, returning results only");
                    metadata.insert("generation_error".to_string(), Value::from(e.to_string()));
                }
                Err(e) => {
                    error!(stage = %Stage::Generation, error = %e, "pipeline stage failed");
                    return Err(RagError::stage(Stage::Generation, e));
                }
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        metadata.insert("stages".to_string(), json!(stages));
        metadata.insert("retrieved_count".to_string(), Value::from(retrieved_count));
        metadata.insert("result_count".to_string(), Value::from(results.len()));
        metadata.insert("elapsed_ms".to_string(), Value::from(elapsed_ms));
        if !request.is_empty() {
            metadata.insert("request".to_string(), json!(request));
        }

        info!(
            retrieved_count,
            result_count = results.len(),
            stages = stages.len(),
            elapsed_ms,
            "pipeline completed"
        );

        Ok(PipelineResponse { response_text, usage, metadata, results })
    }
}

/// Builder for constructing a [`Pipeline`].
///
/// Retrieval configuration, an embedding provider (or a prebuilt
/// [`EmbeddingCache`]) and a vector store are required. Reranking and
/// generation are optional. Call [`build()`](PipelineBuilder::build) to
/// validate and produce the pipeline.
#[derive(Default)]
pub struct PipelineBuilder {
    retrieval: Option<RetrievalConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    embedding_cache: Option<Arc<EmbeddingCache>>,
    cache_config: Option<EmbeddingCacheConfig>,
    vector_store: Option<Arc<dyn VectorStore>>,
    reranking_config: Option<RerankingConfig>,
    reranking_provider: Option<Arc<dyn RerankingProvider>>,
    generation_config: Option<GenerationConfig>,
    generation_provider: Option<Arc<dyn GenerationProvider>>,
    allow_partial_results: bool,
}

impl PipelineBuilder {
    /// Take every stage configuration from `config`. Providers still need
    /// to be supplied for each configured stage.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.retrieval = Some(config.retrieval);
        self.reranking_config = config.reranking;
        self.generation_config = config.generation;
        self.allow_partial_results = config.allow_partial_results;
        self
    }

    /// Set the retrieval configuration.
    pub fn retrieval(mut self, config: RetrievalConfig) -> Self {
        self.retrieval = Some(config);
        self
    }

    /// Set the embedding provider. A cache is built around it.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Configure the cache built around the embedding provider.
    pub fn cache_config(mut self, config: EmbeddingCacheConfig) -> Self {
        self.cache_config = Some(config);
        self
    }

    /// Use an existing embedding cache, shared with other components.
    pub fn embedding_cache(mut self, cache: Arc<EmbeddingCache>) -> Self {
        self.embedding_cache = Some(cache);
        self
    }

    /// Set the vector store backend.
    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    /// Enable reranking.
    pub fn reranking(mut self, config: RerankingConfig, provider: Arc<dyn RerankingProvider>) -> Self {
        self.reranking_config = Some(config);
        self.reranking_provider = Some(provider);
        self
    }

    /// Supply the reranking provider for a stage configured via [`config`](Self::config).
    pub fn reranking_provider(mut self, provider: Arc<dyn RerankingProvider>) -> Self {
        self.reranking_provider = Some(provider);
        self
    }

    /// Enable generation.
    pub fn generation(mut self, config: GenerationConfig, provider: Arc<dyn GenerationProvider>) -> Self {
        self.generation_config = Some(config);
        self.generation_provider = Some(provider);
        self
    }

    /// Supply the generation provider for a stage configured via [`config`](Self::config).
    pub fn generation_provider(mut self, provider: Arc<dyn GenerationProvider>) -> Self {
        self.generation_provider = Some(provider);
        self
    }

    /// Degrade instead of failing when reranking or generation fails.
    pub fn allow_partial_results(mut self, allow: bool) -> Self {
        self.allow_partial_results = allow;
        self
    }

    /// Build the [`Pipeline`], validating every configured stage.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if retrieval inputs are missing,
    /// a configured stage has no provider, or any configuration is invalid.
    pub fn build(self) -> Result<Pipeline> {
        let retrieval_config = self
            .retrieval
            .ok_or_else(|| RagError::config("retrieval configuration is required"))?;
        let vector_store =
            self.vector_store.ok_or_else(|| RagError::config("vector_store is required"))?;
        let embeddings = match (self.embedding_cache, self.embedding_provider) {
            (Some(cache), _) => cache,
            (None, Some(provider)) => {
                Arc::new(EmbeddingCache::new(provider, self.cache_config.unwrap_or_default())?)
            }
            (None, None) => {
                return Err(RagError::config("embedding_provider or embedding_cache is required"));
            }
        };

        let reranking = match (self.reranking_config, self.reranking_provider) {
            (Some(config), Some(provider)) => Some(RerankingStage::new(config, provider)?),
            (None, Some(provider)) => Some(RerankingStage::new(RerankingConfig::default(), provider)?),
            (Some(_), None) => {
                return Err(RagError::config("reranking is configured but no provider was given"));
            }
            (None, None) => None,
        };

        let generation = match (self.generation_config, self.generation_provider) {
            (Some(config), Some(provider)) => Some(GenerationStage::new(config, provider)?),
            (None, Some(provider)) => {
                Some(GenerationStage::new(GenerationConfig::default(), provider)?)
            }
            (Some(_), None) => {
                return Err(RagError::config("generation is configured but no provider was given"));
            }
            (None, None) => None,
        };

        let retrieval = RetrievalStage::new(retrieval_config, embeddings, vector_store)?;
        let config = PipelineConfig {
            retrieval: retrieval.config().clone(),
            reranking: reranking.as_ref().map(|s| s.config().clone()),
            generation: generation.as_ref().map(|s| s.config().clone()),
            allow_partial_results: self.allow_partial_results,
        };

        Ok(Pipeline { config, retrieval, reranking, generation })
    }
}
