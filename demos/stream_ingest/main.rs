//! # Stream Ingest Example
//!
//! Feeds documents through a bounded `StreamProcessor` into a file-backed
//! vector store, then answers a batch of queries through a second stream.
//!
//! Run: `cargo run -p ragflow-demos --example stream_ingest`

#[path = "../shared/mod.rs"]
mod shared;

use std::sync::Arc;
use std::time::Duration;

use ragflow::{
    DistanceMetric, EmbeddingCache, EmbeddingCacheConfig, FileVectorStore, FixedSizeChunker,
    IngestProcessor, IngestRequest, Pipeline, QueryProcessor, QueryRequest, RetrievalConfig,
    RetrievalStage, StreamConfig, StreamProcessor, VectorStore,
};
use shared::MockEmbeddingProvider;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const TOPICS: [&str; 5] = ["ownership", "borrowing", "lifetimes", "traits", "async"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let dir = std::env::temp_dir().join("ragflow-stream-demo");
    let store = Arc::new(FileVectorStore::open(&dir).await?);
    let cache = Arc::new(EmbeddingCache::new(
        Arc::new(MockEmbeddingProvider::new(128)),
        EmbeddingCacheConfig::builder().batch_size(16).build()?,
    )?);
    let retrieval = RetrievalConfig::builder().collection("notes").limit(3).build()?;

    let stage = Arc::new(RetrievalStage::new(retrieval.clone(), cache.clone(), store.clone())?);
    stage.create_collection(DistanceMetric::Cosine).await?;

    // -- 1. Ingest through a small queue so producers feel backpressure ---
    let ingest = StreamProcessor::new(
        IngestProcessor::new(stage.clone(), Arc::new(FixedSizeChunker::new(12, 2)?)),
        StreamConfig::builder()
            .buffer_size(8)
            .batch_size(4)
            .batch_timeout(Duration::from_millis(20))
            .build()?,
    )?;
    ingest.initialize().await?;

    for i in 0..40 {
        let topic = TOPICS[i % TOPICS.len()];
        let text = format!(
            "Note {i} about {topic}. Rust {topic} rules are checked at compile time, \
             and understanding {topic} makes async code and data structures easier to write."
        );
        ingest.process(IngestRequest::new(format!("note-{i}"), text).with_metadata("topic", topic)).await?;
    }
    ingest.drain().await?;

    let metrics = ingest.metrics().await;
    info!(
        processed = metrics.processed_items,
        errors = metrics.processing_errors,
        batches = metrics.processed_batches,
        avg_latency_us = metrics.average_latency.as_micros() as u64,
        "ingest finished"
    );
    println!("Stored {} chunks in {}", store.count("notes").await?, dir.display());

    // -- 2. Answer queries through a second stream -------------------------
    let pipeline = Arc::new(
        Pipeline::builder()
            .retrieval(retrieval)
            .embedding_cache(cache)
            .vector_store(store)
            .build()?,
    );
    let (tx, mut rx) = mpsc::channel(TOPICS.len());
    let queries = StreamProcessor::new(QueryProcessor::new(pipeline, tx), StreamConfig::default())?;
    queries.initialize().await?;

    for topic in TOPICS {
        queries.process(QueryRequest::new(topic, format!("how do {topic} work"))).await?;
    }
    queries.drain().await?;
    drop(queries);

    while let Some(outcome) = rx.recv().await {
        let response = outcome.result?;
        let top: Vec<&str> = response.results.iter().map(|r| r.document.id.as_str()).collect();
        println!("{:>10}: {}", outcome.id, top.join(", "));
    }

    Ok(())
}
