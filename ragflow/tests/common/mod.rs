//! Deterministic providers shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ragflow::{
    DistanceMetric, EmbeddingCache, EmbeddingCacheConfig, EmbeddingProvider, FixedSizeChunker,
    Generation, GenerationProvider, GenerationRequest, InMemoryVectorStore, Metadata, Pipeline,
    PipelineBuilder, RagError, RerankingProvider, Result, RetrievalConfig, RetrievalStage, Usage,
};

/// One dimension per keyword; a text's vector counts keyword occurrences.
pub const KEYWORDS: [&str; 6] = ["rust", "tokio", "serde", "python", "memory", "async"];

/// Embeds text as keyword counts, so texts sharing keywords score high.
#[derive(Default)]
pub struct KeywordEmbedder {
    pub calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                KEYWORDS.iter().map(|k| lower.matches(k).count() as f32).collect()
            })
            .collect())
    }

    fn dimensions(&self) -> usize {
        KEYWORDS.len()
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

/// Scores by text length, favouring the longest candidate.
pub struct LengthReranker;

#[async_trait]
impl RerankingProvider for LengthReranker {
    async fn rerank(&self, _query: &str, texts: &[String]) -> Result<Vec<f32>> {
        Ok(texts.iter().map(|t| t.len() as f32).collect())
    }
}

/// Always fails with a fatal error.
pub struct BrokenReranker;

#[async_trait]
impl RerankingProvider for BrokenReranker {
    async fn rerank(&self, _query: &str, _texts: &[String]) -> Result<Vec<f32>> {
        Err(RagError::FatalProvider { provider: "broken".into(), message: "model unloaded".into() })
    }
}

/// Answers with the query and the number of context entries.
pub struct TemplateGenerator;

#[async_trait]
impl GenerationProvider for TemplateGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
        let documents = request.context.matches("Document ").count();
        Ok(Generation {
            text: format!("{} ({documents} documents)", request.query),
            usage: Usage::new(request.context.split_whitespace().count() as u32, 4),
            model: request.model.clone(),
            finish_reason: Some("stop".into()),
        })
    }
}

/// Always fails with a fatal error.
pub struct BrokenGenerator;

#[async_trait]
impl GenerationProvider for BrokenGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<Generation> {
        Err(RagError::FatalProvider { provider: "broken".into(), message: "quota exhausted".into() })
    }
}

/// Sleeps before answering, to exercise cancellation.
pub struct SlowGenerator(pub Duration);

#[async_trait]
impl GenerationProvider for SlowGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
        tokio::time::sleep(self.0).await;
        TemplateGenerator.generate(request).await
    }
}

pub const CORPUS: [(&str, &str); 4] = [
    ("ownership", "Rust ownership manages memory without a garbage collector."),
    ("runtime", "Tokio is an async runtime for Rust."),
    ("serde", "Serde serializes Rust data structures."),
    ("python", "Python uses reference counting for memory."),
];

/// A retrieval stage over a fresh in-memory store with a `docs` collection.
pub async fn retrieval_stage(limit: usize) -> Arc<RetrievalStage> {
    let cache = Arc::new(
        EmbeddingCache::new(Arc::new(KeywordEmbedder::default()), EmbeddingCacheConfig::default())
            .unwrap(),
    );
    let config = RetrievalConfig::builder().collection("docs").limit(limit).build().unwrap();
    let stage = RetrievalStage::new(config, cache, Arc::new(InMemoryVectorStore::new())).unwrap();
    stage.create_collection(DistanceMetric::Cosine).await.unwrap();
    Arc::new(stage)
}

/// A pipeline builder with retrieval over a fresh in-memory store.
pub fn pipeline_builder(limit: usize) -> PipelineBuilder {
    Pipeline::builder()
        .retrieval(RetrievalConfig::builder().collection("docs").limit(limit).build().unwrap())
        .embedding_provider(Arc::new(KeywordEmbedder::default()))
        .vector_store(Arc::new(InMemoryVectorStore::new()))
}

/// Create the `docs` collection and ingest [`CORPUS`] through `pipeline`.
pub async fn seed(pipeline: &Pipeline) {
    pipeline.retrieval().create_collection(DistanceMetric::Cosine).await.unwrap();
    ingest_corpus(pipeline.retrieval()).await;
}

/// Ingest [`CORPUS`] one chunk per document.
pub async fn ingest_corpus(stage: &RetrievalStage) {
    let chunker = FixedSizeChunker::new(64, 0).unwrap();
    for (id, text) in CORPUS {
        stage.ingest(id, text, &Metadata::new(), &chunker).await.unwrap();
    }
}
