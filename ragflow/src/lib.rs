//! # ragflow
//!
//! Retrieval-augmented generation building blocks.
//!
//! - [`Chunker`] implementations split text into overlapping word, sentence
//!   or paragraph windows.
//! - [`EmbeddingCache`] deduplicates, batches, retries and caches calls to an
//!   [`EmbeddingProvider`].
//! - [`VectorStore`] is implemented in memory ([`InMemoryVectorStore`]) and
//!   as one JSON file per collection ([`FileVectorStore`]).
//! - [`Pipeline`] runs [`RetrievalStage`], an optional [`RerankingStage`]
//!   and an optional [`GenerationStage`].
//! - [`StreamProcessor`] gives any [`BatchProcessor`] a bounded queue with
//!   backpressure.
//!
//! Providers for embedding, reranking and generation are traits; callers
//! bring their own clients.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ragflow::*;
//!
//! let pipeline = Pipeline::builder()
//!     .retrieval(RetrievalConfig::builder().collection("docs").limit(3).build()?)
//!     .embedding_provider(Arc::new(MyEmbedder))
//!     .vector_store(Arc::new(InMemoryVectorStore::new()))
//!     .build()?;
//!
//! pipeline.retrieval().create_collection(DistanceMetric::Cosine).await?;
//! pipeline.ingest("intro", "Rust is a systems language.", &Metadata::new(), &FixedSizeChunker::new(64, 8)?).await?;
//! let response = pipeline.process("what is rust?", Metadata::new()).await?;
//! ```

pub mod cache;
pub mod chunking;
mod collection;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod file;
pub mod generation;
pub mod inmemory;
pub mod pipeline;
pub mod reranker;
pub mod retrieval;
pub mod retry;
pub mod similarity;
pub mod stream;
pub mod vectorstore;

pub use cache::{CacheStats, EmbeddingCache, EmbeddingCacheConfig, EmbeddingCacheConfigBuilder};
pub use chunking::{
    ChunkStrategy, Chunker, ChunkerConfig, FixedSizeChunker, ParagraphChunker, SentenceChunker,
};
pub use config::{
    GenerationConfig, GenerationConfigBuilder, PipelineConfig, RerankingConfig,
    RerankingConfigBuilder, RetrievalConfig, RetrievalConfigBuilder, ScoreMergePolicy,
};
pub use document::{Chunk, Collection, Document, Metadata, SearchResult};
pub use embedding::EmbeddingProvider;
pub use error::{RagError, Result, Stage};
pub use file::FileVectorStore;
pub use generation::{
    Generation, GenerationProvider, GenerationRequest, GenerationResponse, GenerationStage, Usage,
};
pub use inmemory::InMemoryVectorStore;
pub use pipeline::{Pipeline, PipelineBuilder, PipelineResponse};
pub use reranker::{RerankingProvider, RerankingStage};
pub use retrieval::RetrievalStage;
pub use retry::RetryPolicy;
pub use similarity::DistanceMetric;
pub use stream::{
    BatchProcessor, IngestProcessor, IngestRequest, ProcessorState, QueryOutcome, QueryProcessor,
    QueryRequest, StreamConfig, StreamConfigBuilder, StreamMetrics, StreamProcessor,
};
pub use tokio_util::sync::CancellationToken;
pub use vectorstore::{SearchQuery, VectorStore};
