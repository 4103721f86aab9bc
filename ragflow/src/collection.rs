//! Per-collection state shared by the in-memory and file-backed stores.
//!
//! Each collection lives behind its own `tokio::sync::RwLock`. Writers take
//! the write lock for the whole mutation and searches hold the read lock for
//! the whole scan, so a search observes the collection as it was when the
//! scan started and never a partially applied write.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::document::{Collection, Document, SearchResult};
use crate::error::{RagError, Result};
use crate::vectorstore::SearchQuery;

/// A stored document and its insertion sequence number.
#[derive(Debug, Clone)]
pub(crate) struct StoredDocument {
    pub(crate) sequence: u64,
    pub(crate) document: Document,
}

/// The documents of one collection.
#[derive(Debug, Clone)]
pub(crate) struct CollectionState {
    pub(crate) info: Collection,
    pub(crate) entries: HashMap<String, StoredDocument>,
    pub(crate) next_sequence: u64,
    /// Set when the collection is deleted so holders of a stale handle fail.
    dropped: bool,
}

impl CollectionState {
    pub(crate) fn new(info: Collection) -> Self {
        Self { info, entries: HashMap::new(), next_sequence: 0, dropped: false }
    }

    /// Rebuild state from persisted documents.
    pub(crate) fn restore(info: Collection, documents: Vec<StoredDocument>) -> Result<Self> {
        let mut state = Self::new(info);
        for stored in documents {
            state.check_vector(&stored.document)?;
            state.next_sequence = state.next_sequence.max(stored.sequence + 1);
            state.entries.insert(stored.document.id.clone(), stored);
        }
        Ok(state)
    }

    /// Mark the collection deleted and release its documents.
    pub(crate) fn retire(&mut self) {
        self.dropped = true;
        self.entries.clear();
    }

    fn ensure_live(&self) -> Result<()> {
        if self.dropped {
            return Err(RagError::collection_not_found(&self.info.name));
        }
        Ok(())
    }

    pub(crate) fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.info.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.info.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    fn check_vector(&self, document: &Document) -> Result<()> {
        match &document.vector {
            Some(vector) => self.check_dimension(vector),
            None => Ok(()),
        }
    }

    fn assign_ids(documents: &mut [Document]) {
        for document in documents.iter_mut().filter(|d| d.id.is_empty()) {
            document.id = Uuid::new_v4().to_string();
        }
    }

    fn insert(&mut self, document: Document) {
        let sequence = match self.entries.get(&document.id) {
            Some(existing) => existing.sequence,
            None => {
                let sequence = self.next_sequence;
                self.next_sequence += 1;
                sequence
            }
        };
        self.entries.insert(document.id.clone(), StoredDocument { sequence, document });
    }

    pub(crate) fn add(&mut self, mut documents: Vec<Document>) -> Result<Vec<String>> {
        self.ensure_live()?;
        Self::assign_ids(&mut documents);

        let mut seen = std::collections::HashSet::new();
        for document in &documents {
            self.check_vector(document)?;
            if self.entries.contains_key(&document.id) || !seen.insert(document.id.as_str()) {
                return Err(RagError::AlreadyExists { kind: "document", name: document.id.clone() });
            }
        }

        let ids = documents.iter().map(|d| d.id.clone()).collect();
        documents.into_iter().for_each(|d| self.insert(d));
        Ok(ids)
    }

    pub(crate) fn upsert(&mut self, mut documents: Vec<Document>) -> Result<Vec<String>> {
        self.ensure_live()?;
        Self::assign_ids(&mut documents);
        for document in &documents {
            self.check_vector(document)?;
        }

        let ids = documents.iter().map(|d| d.id.clone()).collect();
        documents.into_iter().for_each(|d| self.insert(d));
        Ok(ids)
    }

    pub(crate) fn update(&mut self, documents: Vec<Document>) -> Result<()> {
        self.ensure_live()?;
        for document in &documents {
            self.check_vector(document)?;
            if !self.entries.contains_key(&document.id) {
                return Err(RagError::NotFound { kind: "document", name: document.id.clone() });
            }
        }

        for mut document in documents {
            if document.vector.is_none() {
                document.vector =
                    self.entries.get(&document.id).and_then(|e| e.document.vector.clone());
            }
            self.insert(document);
        }
        Ok(())
    }

    pub(crate) fn get(&self, ids: &[&str]) -> Result<Vec<Document>> {
        self.ensure_live()?;
        Ok(ids.iter().filter_map(|id| self.entries.get(*id)).map(|e| e.document.clone()).collect())
    }

    pub(crate) fn delete(&mut self, ids: &[&str]) -> Result<usize> {
        self.ensure_live()?;
        Ok(ids.iter().filter(|id| self.entries.remove(**id).is_some()).count())
    }

    pub(crate) fn clear(&mut self) -> Result<usize> {
        self.ensure_live()?;
        let removed = self.entries.len();
        self.entries.clear();
        Ok(removed)
    }

    pub(crate) fn count(&self) -> Result<usize> {
        self.ensure_live()?;
        Ok(self.entries.len())
    }

    /// Linear-scan similarity search.
    pub(crate) fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        self.ensure_live()?;
        self.check_dimension(&query.vector)?;
        if query.limit == 0 {
            return Ok(Vec::new());
        }

        let metric = self.info.metric;
        let mut scored: Vec<(&StoredDocument, f32)> = self
            .entries
            .values()
            .filter(|e| e.document.matches(&query.filter))
            .filter_map(|e| {
                e.document.vector.as_ref().map(|v| (e, metric.score(v, &query.vector)))
            })
            .filter(|(_, score)| !score.is_nan())
            .filter(|(_, score)| query.min_score.is_none_or(|min| *score >= min))
            .collect();

        scored.sort_by(|(a, sa), (b, sb)| sb.total_cmp(sa).then(a.sequence.cmp(&b.sequence)));
        scored.truncate(query.limit);

        Ok(scored.into_iter().map(|(e, score)| SearchResult::new(e.document.clone(), score)).collect())
    }

    /// Documents in insertion order.
    pub(crate) fn ordered(&self) -> Vec<&StoredDocument> {
        let mut stored: Vec<&StoredDocument> = self.entries.values().collect();
        stored.sort_by_key(|e| e.sequence);
        stored
    }
}

/// The registry of collections owned by a store.
#[derive(Debug, Default)]
pub(crate) struct Collections {
    inner: RwLock<HashMap<String, Arc<RwLock<CollectionState>>>>,
}

impl Collections {
    pub(crate) fn from_states(states: Vec<CollectionState>) -> Self {
        let map = states
            .into_iter()
            .map(|s| (s.info.name.clone(), Arc::new(RwLock::new(s))))
            .collect();
        Self { inner: RwLock::new(map) }
    }

    /// Look up a collection's state handle.
    pub(crate) async fn handle(&self, name: &str) -> Result<Arc<RwLock<CollectionState>>> {
        self.inner.read().await.get(name).cloned().ok_or_else(|| RagError::collection_not_found(name))
    }

    /// Create a collection, returning its handle if it was newly created.
    pub(crate) async fn create(&self, info: Collection) -> Result<Option<Arc<RwLock<CollectionState>>>> {
        if info.dimension == 0 {
            return Err(RagError::config(format!(
                "collection '{}' must have a dimension greater than zero",
                info.name
            )));
        }

        let mut map = self.inner.write().await;
        if let Some(existing) = map.get(&info.name) {
            if existing.read().await.info == info {
                return Ok(None);
            }
            return Err(RagError::AlreadyExists { kind: "collection", name: info.name });
        }

        let handle = Arc::new(RwLock::new(CollectionState::new(info.clone())));
        map.insert(info.name, handle.clone());
        Ok(Some(handle))
    }

    /// Remove a collection and mark its state as dropped.
    pub(crate) async fn remove(&self, name: &str) -> Result<()> {
        let handle = self.inner.write().await.remove(name).ok_or_else(|| RagError::collection_not_found(name))?;
        handle.write().await.retire();
        Ok(())
    }

    pub(crate) async fn info(&self, name: &str) -> Option<Collection> {
        let handle = self.inner.read().await.get(name).cloned()?;
        let state = handle.read().await;
        Some(state.info.clone())
    }

    pub(crate) async fn list(&self) -> Vec<Collection> {
        let handles: Vec<_> = self.inner.read().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(handles.len());
        for handle in handles {
            infos.push(handle.read().await.info.clone());
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }
}
