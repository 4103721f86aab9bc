//! Data types for chunks, documents, collections and search results.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::similarity::DistanceMetric;

/// Key-value metadata attached to chunks, documents and results.
pub type Metadata = HashMap<String, Value>;

/// A bounded span of source text.
///
/// `start_index` and `end_index` are byte offsets into the text the chunk
/// was split from, with `start_index < end_index`. Chunkers never emit an
/// empty chunk; [`Chunk::whole`] of an empty string is the one empty span.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// The text content of the chunk.
    pub text: String,
    /// Byte offset of the first character in the source text.
    pub start_index: usize,
    /// Byte offset one past the last character in the source text.
    pub end_index: usize,
    /// Metadata inherited from the caller plus chunk-specific fields.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Chunk {
    /// Create a chunk with empty metadata.
    pub fn new(text: impl Into<String>, start_index: usize, end_index: usize) -> Self {
        Self { text: text.into(), start_index, end_index, metadata: Metadata::new() }
    }

    /// Create a chunk spanning the whole of `text`.
    ///
    /// An empty `text` gives the empty span `0..0`.
    pub fn whole(text: impl Into<String>) -> Self {
        let text = text.into();
        let end = text.len();
        Self::new(text, 0, end)
    }
}

/// A stored unit of retrieval: ordered chunks plus an optional embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Identifier, unique within a collection. Empty ids are assigned on insert.
    pub id: String,
    /// The chunks that make up this document, in source order.
    pub chunks: Vec<Chunk>,
    /// The embedding vector. Documents without one are stored but not searchable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    /// Key-value metadata used for exact-match filtering.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    /// Create a document from chunks with no vector and no metadata.
    pub fn new(id: impl Into<String>, chunks: Vec<Chunk>) -> Self {
        Self { id: id.into(), chunks, vector: None, metadata: Metadata::new() }
    }

    /// Create a single-chunk document from plain text.
    ///
    /// Empty text gives a document with no chunks.
    pub fn from_text(id: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let chunks = if text.is_empty() { Vec::new() } else { vec![Chunk::whole(text)] };
        Self::new(id, chunks)
    }

    /// Attach an embedding vector.
    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = Some(vector);
        self
    }

    /// Insert a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The chunk texts joined with single spaces.
    pub fn text(&self) -> String {
        self.chunks.iter().map(|c| c.text.as_str()).collect::<Vec<_>>().join(" ")
    }

    /// Returns `true` if every filter entry is present with an equal value.
    pub fn matches(&self, filter: &Metadata) -> bool {
        filter.iter().all(|(key, value)| self.metadata.get(key) == Some(value))
    }
}

/// A named, dimension-typed grouping of documents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Collection {
    /// Collection name.
    pub name: String,
    /// Required length of every document and query vector.
    pub dimension: usize,
    /// The similarity metric used by search.
    pub metric: DistanceMetric,
}

impl Collection {
    /// Describe a collection.
    pub fn new(name: impl Into<String>, dimension: usize, metric: DistanceMetric) -> Self {
        Self { name: name.into(), dimension, metric }
    }
}

/// A retrieved [`Document`] paired with a relevance score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// The retrieved document.
    pub document: Document,
    /// The relevance score (higher is more relevant).
    pub score: f32,
    /// Per-result metadata such as `original_score` after reranking.
    #[serde(default)]
    pub metadata: Metadata,
}

impl SearchResult {
    /// Pair a document with a score.
    pub fn new(document: Document, score: f32) -> Self {
        Self { document, score, metadata: Metadata::new() }
    }
}
