//! First-pass retrieval: embed the query and search a collection.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::cache::EmbeddingCache;
use crate::chunking::Chunker;
use crate::config::RetrievalConfig;
use crate::document::{Document, Metadata, SearchResult};
use crate::error::Result;
use crate::similarity::DistanceMetric;
use crate::vectorstore::{SearchQuery, VectorStore};

/// Converts query text to a vector and searches the configured collection.
///
/// Also exposes ingestion passthroughs to the underlying [`VectorStore`]
/// so that the same embedding cache is used for documents and queries.
pub struct RetrievalStage {
    config: RetrievalConfig,
    embeddings: Arc<EmbeddingCache>,
    store: Arc<dyn VectorStore>,
}

impl RetrievalStage {
    /// Create a retrieval stage.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`](crate::RagError::Configuration)
    /// if `config` is invalid.
    pub fn new(
        config: RetrievalConfig,
        embeddings: Arc<EmbeddingCache>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, embeddings, store })
    }

    /// The stage configuration.
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// The embedding cache shared by queries and ingestion.
    pub fn embeddings(&self) -> &Arc<EmbeddingCache> {
        &self.embeddings
    }

    /// The underlying vector store.
    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Create the configured collection sized to the embedding provider.
    pub async fn create_collection(&self, metric: DistanceMetric) -> Result<()> {
        self.store
            .create_collection(&self.config.collection, self.embeddings.dimensions(), metric)
            .await
    }

    /// Retrieve the documents most relevant to `query`.
    pub async fn process(&self, query: &str) -> Result<Vec<SearchResult>> {
        self.process_filtered(query, &Metadata::new()).await
    }

    /// Retrieve with extra filter pairs merged over the configured filter.
    pub async fn process_filtered(&self, query: &str, filter: &Metadata) -> Result<Vec<SearchResult>> {
        let vector = self.embeddings.get_embedding(query).await?;

        let mut merged = self.config.filter.clone();
        merged.extend(filter.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut search = SearchQuery::new(vector, self.config.limit).with_filter(merged);
        search.min_score = self.config.min_score;

        let results = self.store.search(&self.config.collection, &search).await?;
        debug!(
            collection = %self.config.collection,
            limit = self.config.limit,
            result_count = results.len(),
            "retrieval completed"
        );
        Ok(results)
    }

    /// Store documents, embedding any that have no vector from their chunk text.
    pub async fn add(&self, mut documents: Vec<Document>) -> Result<Vec<String>> {
        self.embed_missing(&mut documents).await?;
        self.store.add(&self.config.collection, documents).await
    }

    /// Insert or replace documents, embedding any that have no vector.
    pub async fn upsert(&self, mut documents: Vec<Document>) -> Result<Vec<String>> {
        self.embed_missing(&mut documents).await?;
        self.store.upsert(&self.config.collection, documents).await
    }

    /// Chunk `text` and store one document per chunk.
    ///
    /// Chunk documents are named `{document_id}_{chunk_index}` and carry
    /// `metadata` plus `document_id` and `chunk_index` fields. Re-ingesting
    /// the same id replaces the previous chunks with the same index.
    pub async fn ingest(
        &self,
        document_id: &str,
        text: &str,
        metadata: &Metadata,
        chunker: &dyn Chunker,
    ) -> Result<Vec<String>> {
        let chunks = chunker.split(text, metadata);
        if chunks.is_empty() {
            info!(document.id = document_id, chunk_count = 0, "ingested document (empty)");
            return Ok(Vec::new());
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let vectors = self.embeddings.get_embeddings(&texts).await?;
        let documents: Vec<Document> = chunks
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (chunk, vector))| {
                let mut doc_metadata = chunk.metadata.clone();
                doc_metadata.insert("document_id".to_string(), Value::from(document_id));
                Document {
                    id: format!("{document_id}_{i}"),
                    chunks: vec![chunk],
                    vector: Some(vector),
                    metadata: doc_metadata,
                }
            })
            .collect();

        let ids = self.store.upsert(&self.config.collection, documents).await?;
        info!(document.id = document_id, chunk_count = ids.len(), "ingested document");
        Ok(ids)
    }

    /// Delete documents by id.
    pub async fn delete(&self, ids: &[&str]) -> Result<usize> {
        self.store.delete(&self.config.collection, ids).await
    }

    /// Remove every document from the configured collection.
    pub async fn clear(&self) -> Result<usize> {
        self.store.clear(&self.config.collection).await
    }

    async fn embed_missing(&self, documents: &mut [Document]) -> Result<()> {
        let missing: Vec<usize> =
            documents.iter().enumerate().filter(|(_, d)| d.vector.is_none()).map(|(i, _)| i).collect();
        if missing.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = missing.iter().map(|&i| documents[i].text()).collect();
        let vectors = self.embeddings.get_embeddings(&texts).await?;
        for (i, vector) in missing.into_iter().zip(vectors) {
            documents[i].vector = Some(vector);
        }
        Ok(())
    }
}
