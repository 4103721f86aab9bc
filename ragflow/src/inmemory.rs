//! In-memory vector store.
//!
//! This module provides [`InMemoryVectorStore`], a vector store with no
//! durability. Each collection is guarded by its own `tokio::sync::RwLock`.
//! It is suitable for development, testing, and short-lived processes.

use async_trait::async_trait;
use tracing::debug;

use crate::collection::Collections;
use crate::document::{Collection, Document, SearchResult};
use crate::error::Result;
use crate::similarity::DistanceMetric;
use crate::vectorstore::{SearchQuery, VectorStore};

/// An in-memory vector store using linear-scan similarity search.
///
/// # Example
///
/// ```rust,ignore
/// use ragflow::{DistanceMetric, InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.create_collection("docs", 384, DistanceMetric::Cosine).await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collections: Collections,
}

impl InMemoryVectorStore {
    /// Create a new empty in-memory vector store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<()> {
        if self.collections.create(Collection::new(name, dimension, metric)).await?.is_some() {
            debug!(collection = name, dimension, ?metric, "created collection");
        }
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.collections.remove(name).await?;
        debug!(collection = name, "deleted collection");
        Ok(())
    }

    async fn collection(&self, name: &str) -> Result<Option<Collection>> {
        Ok(self.collections.info(name).await)
    }

    async fn list_collections(&self) -> Result<Vec<Collection>> {
        Ok(self.collections.list().await)
    }

    async fn add(&self, collection: &str, documents: Vec<Document>) -> Result<Vec<String>> {
        let handle = self.collections.handle(collection).await?;
        let mut state = handle.write().await;
        state.add(documents)
    }

    async fn upsert(&self, collection: &str, documents: Vec<Document>) -> Result<Vec<String>> {
        let handle = self.collections.handle(collection).await?;
        let mut state = handle.write().await;
        state.upsert(documents)
    }

    async fn update(&self, collection: &str, documents: Vec<Document>) -> Result<()> {
        let handle = self.collections.handle(collection).await?;
        let mut state = handle.write().await;
        state.update(documents)
    }

    async fn get(&self, collection: &str, ids: &[&str]) -> Result<Vec<Document>> {
        let handle = self.collections.handle(collection).await?;
        let state = handle.read().await;
        state.get(ids)
    }

    async fn delete(&self, collection: &str, ids: &[&str]) -> Result<usize> {
        let handle = self.collections.handle(collection).await?;
        let mut state = handle.write().await;
        state.delete(ids)
    }

    async fn clear(&self, collection: &str) -> Result<usize> {
        let handle = self.collections.handle(collection).await?;
        let mut state = handle.write().await;
        state.clear()
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let handle = self.collections.handle(collection).await?;
        let state = handle.read().await;
        state.count()
    }

    async fn search(&self, collection: &str, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        let handle = self.collections.handle(collection).await?;
        let state = handle.read().await;
        state.search(query)
    }
}
