//! Vector store trait for storing and searching document embeddings.

use async_trait::async_trait;
use serde_json::Value;

use crate::document::{Collection, Document, Metadata, SearchResult};
use crate::error::Result;
use crate::similarity::DistanceMetric;

/// Parameters for one similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    /// The query embedding. Must match the collection's dimension.
    pub vector: Vec<f32>,
    /// Maximum number of results.
    pub limit: usize,
    /// Drop results scoring below this value.
    pub min_score: Option<f32>,
    /// Exact-match metadata filter; every pair must be present on a document.
    pub filter: Metadata,
}

impl SearchQuery {
    /// Search for the `limit` nearest documents to `vector`.
    pub fn new(vector: Vec<f32>, limit: usize) -> Self {
        Self { vector, limit, min_score: None, filter: Metadata::new() }
    }

    /// Set a minimum score.
    pub fn min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }

    /// Add a metadata filter pair.
    pub fn filter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.insert(key.into(), value.into());
        self
    }

    /// Replace the metadata filter.
    pub fn with_filter(mut self, filter: Metadata) -> Self {
        self.filter = filter;
        self
    }
}

/// A storage backend for document embeddings with similarity search.
///
/// Implementations manage named collections of [`Document`]s. Every stored
/// and queried vector is validated against the collection's dimension.
/// Search is a linear scan: filter by metadata, score with the collection's
/// [`DistanceMetric`], drop scores below `min_score`, sort descending with
/// ties broken by insertion order, and truncate to `limit`.
///
/// # Example
///
/// ```rust,ignore
/// use ragflow::{DistanceMetric, InMemoryVectorStore, SearchQuery, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.create_collection("docs", 384, DistanceMetric::Cosine).await?;
/// store.add("docs", documents).await?;
/// let results = store.search("docs", &SearchQuery::new(query_embedding, 5)).await?;
/// ```
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create a named collection.
    ///
    /// No-op if an identical collection exists; fails with
    /// [`RagError::AlreadyExists`](crate::RagError::AlreadyExists) if one
    /// exists with a different dimension or metric.
    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<()>;

    /// Delete a named collection and all its documents.
    async fn delete_collection(&self, name: &str) -> Result<()>;

    /// Describe a collection, or `None` if it does not exist.
    async fn collection(&self, name: &str) -> Result<Option<Collection>>;

    /// All collections, sorted by name.
    async fn list_collections(&self) -> Result<Vec<Collection>>;

    /// Insert new documents, returning their ids in input order.
    ///
    /// Empty ids are replaced with generated UUIDs. Fails without inserting
    /// anything if an id already exists or a vector has the wrong length.
    async fn add(&self, collection: &str, documents: Vec<Document>) -> Result<Vec<String>>;

    /// Insert or fully replace documents, returning their ids.
    async fn upsert(&self, collection: &str, documents: Vec<Document>) -> Result<Vec<String>>;

    /// Replace existing documents. A document without a vector keeps its
    /// stored vector. Fails if any id is unknown.
    async fn update(&self, collection: &str, documents: Vec<Document>) -> Result<()>;

    /// Fetch documents by id in request order. Unknown ids are omitted.
    async fn get(&self, collection: &str, ids: &[&str]) -> Result<Vec<Document>>;

    /// Delete documents by id, returning how many were removed.
    async fn delete(&self, collection: &str, ids: &[&str]) -> Result<usize>;

    /// Remove every document from a collection, returning how many were removed.
    async fn clear(&self, collection: &str) -> Result<usize>;

    /// The number of documents in a collection.
    async fn count(&self, collection: &str) -> Result<usize>;

    /// Search a collection for the documents most similar to `query.vector`.
    ///
    /// Returns results ordered by descending score.
    async fn search(&self, collection: &str, query: &SearchQuery) -> Result<Vec<SearchResult>>;
}
