//! Offline providers used by the demos.

#![allow(dead_code)]

use async_trait::async_trait;
use ragflow::{
    EmbeddingProvider, Generation, GenerationProvider, GenerationRequest, RerankingProvider,
    Usage,
};

// ---------------------------------------------------------------------------
// MockEmbeddingProvider: deterministic bag-of-words hashing
// ---------------------------------------------------------------------------

pub struct MockEmbeddingProvider {
    dimensions: usize,
}

impl MockEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> ragflow::Result<Vec<Vec<f32>>> {
        // Each lowercase word adds weight to one bucket, so texts that share
        // words point in similar directions. The cache normalizes the result.
        Ok(texts
            .iter()
            .map(|text| {
                let mut emb = vec![0.0f32; self.dimensions];
                for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| w.len() > 2) {
                    let hash = word
                        .to_lowercase()
                        .bytes()
                        .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
                    emb[(hash % self.dimensions as u64) as usize] += 1.0;
                }
                emb
            })
            .collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "mock-embedding"
    }
}

// ---------------------------------------------------------------------------
// OverlapReranker: scores by shared words with the query
// ---------------------------------------------------------------------------

pub struct OverlapReranker;

#[async_trait]
impl RerankingProvider for OverlapReranker {
    async fn rerank(&self, query: &str, texts: &[String]) -> ragflow::Result<Vec<f32>> {
        let query_words: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        Ok(texts
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                let hits = query_words.iter().filter(|w| lower.contains(w.as_str())).count();
                hits as f32 / query_words.len().max(1) as f32
            })
            .collect())
    }

    fn name(&self) -> &str {
        "overlap-reranker"
    }
}

// ---------------------------------------------------------------------------
// ExtractiveGenerator: answers with the first sentence of the best document
// ---------------------------------------------------------------------------

pub struct ExtractiveGenerator;

#[async_trait]
impl GenerationProvider for ExtractiveGenerator {
    async fn generate(&self, request: &GenerationRequest) -> ragflow::Result<Generation> {
        let best = request
            .context
            .split("\n\n")
            .next()
            .and_then(|entry| entry.split_once("): ").map(|(_, text)| text))
            .unwrap_or("I could not find anything relevant.");
        let answer = best.split_inclusive('.').next().unwrap_or(best).trim().to_string();

        let prompt_tokens = (request.query.split_whitespace().count()
            + request.context.split_whitespace().count()) as u32;
        let completion_tokens = answer.split_whitespace().count() as u32;
        Ok(Generation {
            text: answer,
            usage: Usage::new(prompt_tokens, completion_tokens),
            model: "extractive".to_string(),
            finish_reason: Some("stop".to_string()),
        })
    }

    fn name(&self) -> &str {
        "extractive"
    }
}
