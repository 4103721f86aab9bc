//! Error types for the `ragflow` crate.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The pipeline stage a [`RagError::PipelineStage`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Query embedding and vector search.
    Retrieval,
    /// Second-pass scoring of retrieved candidates.
    Reranking,
    /// Answer synthesis from the selected context.
    Generation,
}

impl Stage {
    /// The lowercase stage name used in logs and response metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Retrieval => "retrieval",
            Stage::Reranking => "reranking",
            Stage::Generation => "generation",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur in RAG operations.
#[derive(Debug, Error)]
pub enum RagError {
    /// Invalid construction parameters for a chunker, store, cache or pipeline.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A collection or document does not exist.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// What was looked up (`collection`, `document`).
        kind: &'static str,
        /// The missing name or id.
        name: String,
    },

    /// A collection or document with the same name already exists.
    #[error("{kind} '{name}' already exists")]
    AlreadyExists {
        /// What was being created (`collection`, `document`).
        kind: &'static str,
        /// The conflicting name or id.
        name: String,
    },

    /// A vector's length does not match the collection's declared dimension.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The declared dimension.
        expected: usize,
        /// The length of the offending vector.
        actual: usize,
    },

    /// A transient upstream failure. Retried with backoff by the caller.
    #[error("Retryable provider error ({provider}): {message}")]
    RetryableProvider {
        /// The provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// A permanent upstream failure such as rejected credentials. Never retried.
    #[error("Fatal provider error ({provider}): {message}")]
    FatalProvider {
        /// The provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// A configured pipeline stage failed and aborted the pipeline call.
    #[error("{stage} stage failed: {source}")]
    PipelineStage {
        /// The failing stage.
        stage: Stage,
        /// The underlying error.
        #[source]
        source: Box<RagError>,
    },

    /// The stream processor rejected or failed to handle an item.
    #[error("Processing error: {0}")]
    Processing(String),

    /// The operation was aborted through its cancellation token.
    #[error("Operation cancelled")]
    Cancelled,

    /// Reading or writing a persisted collection failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A persisted collection or configuration could not be (de)serialized.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl RagError {
    /// Wrap an error as a failure of the given pipeline stage.
    ///
    /// Errors that are already stage errors or cancellations pass through
    /// unchanged so the original stage is preserved.
    pub fn stage(stage: Stage, err: RagError) -> Self {
        match err {
            err @ (RagError::PipelineStage { .. } | RagError::Cancelled) => err,
            other => RagError::PipelineStage { stage, source: Box::new(other) },
        }
    }

    /// Returns `true` for transient provider failures worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RagError::RetryableProvider { .. })
    }

    /// The stage that failed, if this is a pipeline stage error.
    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            RagError::PipelineStage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        RagError::Configuration(message.into())
    }

    pub(crate) fn collection_not_found(name: &str) -> Self {
        RagError::NotFound { kind: "collection", name: name.to_string() }
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;
