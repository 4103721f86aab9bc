//! Embedding provider trait for generating vector embeddings from text.

use async_trait::async_trait;

use crate::error::Result;

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap a specific embedding backend behind a unified async
/// interface. Transient failures (timeouts, rate limits, 5xx) should be
/// reported as [`RagError::RetryableProvider`](crate::RagError::RetryableProvider)
/// and permanent ones (bad credentials, malformed input) as
/// [`RagError::FatalProvider`](crate::RagError::FatalProvider) so that
/// [`EmbeddingCache`](crate::EmbeddingCache) can retry only what is worth retrying.
///
/// # Example
///
/// ```rust,ignore
/// use ragflow::EmbeddingProvider;
///
/// let provider = MyEmbeddingProvider::new();
/// let vectors = provider.embed(&["hello world".to_string()]).await?;
/// assert_eq!(vectors[0].len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate one embedding per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// A short name used in logs and error messages.
    fn name(&self) -> &str {
        "embedding"
    }
}
