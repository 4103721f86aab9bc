//! Answer synthesis from the selected context.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, error};

use crate::config::GenerationConfig;
use crate::document::{Metadata, SearchResult};
use crate::error::Result;

/// Token accounting reported by a generation provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens consumed by the prompt and context.
    pub prompt_tokens: u32,
    /// Tokens generated.
    pub completion_tokens: u32,
    /// `prompt_tokens + completion_tokens`, saturating at `u32::MAX`.
    pub total_tokens: u32,
}

impl Usage {
    /// Build usage from prompt and completion counts.
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Everything a provider needs to answer one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    /// The user's query.
    pub query: String,
    /// The formatted context block.
    pub context: String,
    /// Model identifier from [`GenerationConfig::model`].
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling mass.
    pub top_p: f32,
    /// Context budget.
    pub max_input_tokens: usize,
    /// Generation limit.
    pub max_output_tokens: usize,
}

/// A provider's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    /// Generated text.
    pub text: String,
    /// Token accounting.
    pub usage: Usage,
    /// The model that actually served the request.
    pub model: String,
    /// Why generation stopped (`stop`, `length`, ...), if reported.
    pub finish_reason: Option<String>,
}

/// A language model that answers a query from a context block.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Generate an answer.
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation>;

    /// A short name used in logs and error messages.
    fn name(&self) -> &str {
        "generator"
    }
}

/// The output of the generation stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Generated text.
    pub response_text: String,
    /// Token accounting.
    pub usage: Usage,
    /// `model`, `documents_used`, `scores` and `finish_reason`.
    pub metadata: Metadata,
}

/// Formats results into a context block and calls a [`GenerationProvider`].
pub struct GenerationStage {
    config: GenerationConfig,
    provider: Arc<dyn GenerationProvider>,
}

impl GenerationStage {
    /// Create a generation stage.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`](crate::RagError::Configuration)
    /// if `config` is invalid.
    pub fn new(config: GenerationConfig, provider: Arc<dyn GenerationProvider>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, provider })
    }

    /// The stage configuration.
    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Build the context block for `results`.
    ///
    /// Each entry reads `Document i (Score: s): <text>`, optionally with the
    /// document's metadata in brackets before the text; entries are joined
    /// by blank lines. Entries stop once the word budget
    /// `max_input_tokens` would be exceeded. Returns the context and the
    /// number of results it includes.
    pub fn build_context(&self, results: &[SearchResult]) -> (String, usize) {
        let mut entries = Vec::with_capacity(results.len());
        let mut words = 0;

        for (i, result) in results.iter().enumerate() {
            let mut entry = format!("Document {} (Score: {:.4}): ", i + 1, result.score);
            if self.config.include_metadata && !result.document.metadata.is_empty() {
                entry.push_str(&format_metadata(&result.document.metadata));
                entry.push(' ');
            }
            entry.push_str(&result.document.text());

            let entry_words = entry.split_whitespace().count();
            if words + entry_words > self.config.max_input_tokens {
                debug!(
                    included = entries.len(),
                    skipped = results.len() - entries.len(),
                    budget = self.config.max_input_tokens,
                    "context budget reached"
                );
                break;
            }
            words += entry_words;
            entries.push(entry);
        }

        let used = entries.len();
        (entries.join("\n\n"), used)
    }

    /// Generate an answer to `query` grounded in `results`.
    pub async fn process(&self, query: &str, results: &[SearchResult]) -> Result<GenerationResponse> {
        let (context, used) = self.build_context(results);
        let request = GenerationRequest {
            query: query.to_string(),
            context,
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            max_input_tokens: self.config.max_input_tokens,
            max_output_tokens: self.config.max_output_tokens,
        };

        let generation = self
            .config
            .retry
            .run("generate", || self.provider.generate(&request))
            .await
            .map_err(|e| {
                error!(provider = self.provider.name(), error = %e, "generation failed");
                e
            })?;

        let model = if generation.model.is_empty() { self.config.model.clone() } else { generation.model };
        let scores: Vec<f32> = results[..used].iter().map(|r| r.score).collect();

        let mut metadata = Metadata::new();
        metadata.insert("model".to_string(), Value::from(model));
        metadata.insert("documents_used".to_string(), Value::from(used));
        metadata.insert("scores".to_string(), json!(scores));
        if let Some(reason) = generation.finish_reason {
            metadata.insert("finish_reason".to_string(), Value::from(reason));
        }

        debug!(
            provider = self.provider.name(),
            documents_used = used,
            total_tokens = generation.usage.total_tokens,
            "generation completed"
        );
        Ok(GenerationResponse { response_text: generation.text, usage: generation.usage, metadata })
    }
}

/// Render metadata as `[key=value, ...]` with keys sorted.
fn format_metadata(metadata: &Metadata) -> String {
    let mut pairs: Vec<(&String, &Value)> = metadata.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    let rendered: Vec<String> = pairs
        .into_iter()
        .map(|(k, v)| match v {
            Value::String(s) => format!("{k}={s}"),
            other => format!("{k}={other}"),
        })
        .collect();
    format!("[{}]", rendered.join(", "))
}
