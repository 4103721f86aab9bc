//! File-backed vector store.
//!
//! [`FileVectorStore`] keeps every collection in memory and mirrors each one
//! to `<root>/<collection>.json`. Every mutating call rewrites the whole
//! collection file: the record is written to a temporary file and renamed
//! over the previous version, so readers of the directory never see a
//! half-written file. There is no append log or partial update.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::collection::{CollectionState, Collections, StoredDocument};
use crate::document::{Chunk, Collection, Document, Metadata, SearchResult};
use crate::error::{RagError, Result};
use crate::similarity::DistanceMetric;
use crate::vectorstore::{SearchQuery, VectorStore};

const EXTENSION: &str = "json";

/// The persisted form of one collection.
#[derive(Debug, Serialize, Deserialize)]
struct CollectionRecord {
    collection: Collection,
    documents: BTreeMap<String, DocumentRecord>,
    vectors: BTreeMap<String, Vec<f32>>,
    metadata: BTreeMap<String, Metadata>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DocumentRecord {
    id: String,
    sequence: u64,
    chunks: Vec<Chunk>,
}

impl CollectionRecord {
    fn from_state(state: &CollectionState) -> Self {
        let mut record = Self {
            collection: state.info.clone(),
            documents: BTreeMap::new(),
            vectors: BTreeMap::new(),
            metadata: BTreeMap::new(),
        };
        for stored in state.ordered() {
            let document = &stored.document;
            record.documents.insert(
                document.id.clone(),
                DocumentRecord {
                    id: document.id.clone(),
                    sequence: stored.sequence,
                    chunks: document.chunks.clone(),
                },
            );
            if let Some(vector) = &document.vector {
                record.vectors.insert(document.id.clone(), vector.clone());
            }
            if !document.metadata.is_empty() {
                record.metadata.insert(document.id.clone(), document.metadata.clone());
            }
        }
        record
    }

    fn into_state(mut self) -> Result<CollectionState> {
        let documents = self
            .documents
            .into_values()
            .map(|d| StoredDocument {
                sequence: d.sequence,
                document: Document {
                    vector: self.vectors.remove(&d.id),
                    metadata: self.metadata.remove(&d.id).unwrap_or_default(),
                    chunks: d.chunks,
                    id: d.id,
                },
            })
            .collect();
        CollectionState::restore(self.collection, documents)
    }
}

/// A [`VectorStore`] that persists each collection as a JSON file.
///
/// # Example
///
/// ```rust,ignore
/// use ragflow::{DistanceMetric, FileVectorStore, VectorStore};
///
/// let store = FileVectorStore::open("./vectors").await?;
/// store.create_collection("docs", 384, DistanceMetric::Cosine).await?;
/// ```
#[derive(Debug)]
pub struct FileVectorStore {
    root: PathBuf,
    collections: Collections,
}

impl FileVectorStore {
    /// Open a store rooted at `root`, creating the directory if needed and
    /// loading every `*.json` collection file in it.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Io`] if the directory cannot be read and
    /// [`RagError::Serialization`] if a collection file is corrupt.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;

        let mut states = Vec::new();
        let mut entries = tokio::fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            let record: CollectionRecord = serde_json::from_slice(&bytes).map_err(|e| {
                error!(path = %path.display(), error = %e, "corrupt collection file");
                e
            })?;
            let state = record.into_state()?;
            debug!(collection = %state.info.name, documents = state.entries.len(), "loaded collection");
            states.push(state);
        }

        info!(root = %root.display(), collections = states.len(), "opened file vector store");
        Ok(Self { root, collections: Collections::from_states(states) })
    }

    /// The directory holding the collection files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.{EXTENSION}"))
    }

    fn validate_name(name: &str) -> Result<()> {
        let valid = !name.is_empty()
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(RagError::config(format!(
                "collection name '{name}' may only contain ASCII letters, digits, '_' and '-'"
            )));
        }
        Ok(())
    }

    /// Rewrite the collection file from the current state.
    async fn persist(&self, state: &CollectionState) -> Result<()> {
        let record = CollectionRecord::from_state(state);
        let bytes = serde_json::to_vec(&record)?;
        let path = self.path_for(&state.info.name);
        let tmp = path.with_extension(format!("{EXTENSION}.tmp"));

        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            error!(path = %path.display(), error = %e, "failed to replace collection file");
            e
        })?;
        debug!(collection = %state.info.name, bytes = bytes.len(), "persisted collection");
        Ok(())
    }

    /// Apply a mutation under the collection's write lock and persist it.
    ///
    /// The mutation runs on a copy of the collection. The copy replaces the
    /// live state only once it is on disk, so a failed mutation or a failed
    /// write leaves both memory and the file as they were.
    async fn mutate<T: Send>(
        &self,
        collection: &str,
        op: impl FnOnce(&mut CollectionState) -> Result<T> + Send,
    ) -> Result<T> {
        let handle = self.collections.handle(collection).await?;
        let mut state = handle.write().await;
        let mut staged = state.clone();
        let value = op(&mut staged)?;
        self.persist(&staged).await?;
        *state = staged;
        Ok(value)
    }
}

#[async_trait]
impl VectorStore for FileVectorStore {
    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<()> {
        Self::validate_name(name)?;
        if let Some(handle) = self.collections.create(Collection::new(name, dimension, metric)).await? {
            let state = handle.read().await;
            if let Err(e) = self.persist(&state).await {
                drop(state);
                warn!(collection = name, error = %e, "rolling back collection creation");
                self.collections.remove(name).await?;
                return Err(e);
            }
            debug!(collection = name, dimension, ?metric, "created collection");
        }
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let handle = self.collections.handle(name).await?;
        {
            // Writers queued behind this lock see a retired collection and
            // never recreate the file.
            let mut state = handle.write().await;
            match tokio::fs::remove_file(self.path_for(name)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            state.retire();
        }
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
        self.mutate(collection, |state| state.add(documents)).await
    }

    async fn upsert(&self, collection: &str, documents: Vec<Document>) -> Result<Vec<String>> {
        self.mutate(collection, |state| state.upsert(documents)).await
    }

    async fn update(&self, collection: &str, documents: Vec<Document>) -> Result<()> {
        self.mutate(collection, |state| state.update(documents)).await
    }

    async fn get(&self, collection: &str, ids: &[&str]) -> Result<Vec<Document>> {
        let handle = self.collections.handle(collection).await?;
        let state = handle.read().await;
        state.get(ids)
    }

    async fn delete(&self, collection: &str, ids: &[&str]) -> Result<usize> {
        self.mutate(collection, |state| state.delete(ids)).await
    }

    async fn clear(&self, collection: &str) -> Result<usize> {
        self.mutate(collection, |state| state.clear()).await
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
