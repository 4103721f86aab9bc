//! # RAG Basic Example
//!
//! Ingests a few documents, then answers queries through the full
//! retrieval, reranking and generation pipeline.
//!
//! Uses `InMemoryVectorStore`, `SentenceChunker`, and offline mock providers
//! so it runs with **zero API keys**.
//!
//! Run: `cargo run -p ragflow-demos --example rag_basic`
//! Set `RUST_LOG=ragflow=debug` to see per-stage logs.

#[path = "../shared/mod.rs"]
mod shared;

use std::sync::Arc;

use ragflow::{
    DistanceMetric, GenerationConfig, InMemoryVectorStore, Metadata, Pipeline, RerankingConfig,
    RetrievalConfig, SentenceChunker,
};
use shared::{ExtractiveGenerator, MockEmbeddingProvider, OverlapReranker};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // -- 1. Build the pipeline --------------------------------------------
    // limit=4 candidates from vector search, narrowed to 2 by the reranker.
    let pipeline = Pipeline::builder()
        .retrieval(RetrievalConfig::builder().collection("knowledge_base").limit(4).build()?)
        .embedding_provider(Arc::new(MockEmbeddingProvider::new(64)))
        .vector_store(Arc::new(InMemoryVectorStore::new()))
        .reranking(RerankingConfig::builder().limit(2).build()?, Arc::new(OverlapReranker))
        .generation(
            GenerationConfig::builder().model("extractive").max_input_tokens(256).build()?,
            Arc::new(ExtractiveGenerator),
        )
        .build()?;

    // -- 2. Create a collection -------------------------------------------
    pipeline.retrieval().create_collection(DistanceMetric::Cosine).await?;

    // -- 3. Ingest sample documents ---------------------------------------
    let documents = [
        (
            "rust",
            "Rust is a systems programming language focused on safety, speed, and concurrency. \
             It achieves memory safety without a garbage collector through its ownership system.",
        ),
        (
            "python",
            "Python is a high-level, interpreted programming language known for its readability. \
             It is widely used in data science, web development, and automation.",
        ),
        (
            "rag",
            "Retrieval-augmented generation combines a retrieval system with a language model. \
             Documents are chunked, embedded, and stored in a vector database. \
             At query time the most relevant chunks are retrieved and given to the model as context.",
        ),
    ];

    let chunker = SentenceChunker::new(2, 0)?;
    println!("Ingesting {} documents...", documents.len());
    for (id, text) in documents {
        let mut metadata = Metadata::new();
        metadata.insert("topic".to_string(), id.into());
        let chunks = pipeline.ingest(id, text, &metadata, &chunker).await?;
        println!("  {id} -> {} chunk(s)", chunks.len());
    }

    // -- 4. Query the pipeline --------------------------------------------
    let queries = ["memory safety without garbage collector", "data science language", "vector database"];

    for query in queries {
        println!("\nQuery: \"{query}\"");
        let response = pipeline.process(query, Metadata::new()).await?;
        println!("  Answer: {}", response.response_text);
        for (i, result) in response.results.iter().enumerate() {
            let text = result.document.text();
            println!(
                "  {}. [score={:.4}] {} | {}",
                i + 1,
                result.score,
                result.document.id,
                &text[..text.len().min(80)],
            );
        }
        println!("  Usage: {} tokens", response.usage.total_tokens);
    }

    println!("\nDone.");
    Ok(())
}
