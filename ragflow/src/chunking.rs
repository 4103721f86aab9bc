//! Text chunking strategies.
//!
//! This module provides the [`Chunker`] trait and three implementations that
//! share one sliding-window algorithm over a different unit of text:
//!
//! - [`FixedSizeChunker`]: whitespace-separated words (a token-count proxy)
//! - [`SentenceChunker`]: sentences ending in `.`, `!` or `?`
//! - [`ParagraphChunker`]: paragraphs separated by blank lines
//!
//! A window of `max_units` units becomes one chunk, and the window start
//! advances by `max_units - overlap_units`. Chunk text is the exact slice of
//! the input from the first unit's start to the last unit's end.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{Chunk, Metadata};
use crate::error::{RagError, Result};

/// A byte range `start..end` of one unit within the source text.
type Span = (usize, usize);

/// A strategy for splitting text into chunks.
pub trait Chunker: Send + Sync {
    /// Split text into ordered chunks.
    ///
    /// Each chunk carries `metadata` plus a `chunk_index` field. Returns an
    /// empty `Vec` if the text contains no units.
    fn split(&self, text: &str, metadata: &Metadata) -> Vec<Chunk>;

    /// The units this chunker windows over, in order.
    fn units<'a>(&self, text: &'a str) -> Vec<&'a str>;
}

/// Which unit of text a chunker windows over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// Whitespace-separated words.
    #[default]
    FixedSize,
    /// Sentences.
    Sentence,
    /// Blank-line separated paragraphs.
    Paragraph,
}

/// Serializable chunker parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkerConfig {
    /// The unit of text to window over.
    pub strategy: ChunkStrategy,
    /// Maximum units per chunk.
    pub max_units: usize,
    /// Units shared between consecutive chunks.
    pub overlap_units: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self { strategy: ChunkStrategy::FixedSize, max_units: 256, overlap_units: 32 }
    }
}

impl ChunkerConfig {
    /// Validate the parameters and construct the configured chunker.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if `max_units == 0` or
    /// `overlap_units >= max_units`.
    pub fn build(&self) -> Result<Box<dyn Chunker>> {
        let window = SlidingWindow::new(self.max_units, self.overlap_units)?;
        Ok(match self.strategy {
            ChunkStrategy::FixedSize => Box::new(FixedSizeChunker { window }),
            ChunkStrategy::Sentence => Box::new(SentenceChunker { window }),
            ChunkStrategy::Paragraph => Box::new(ParagraphChunker { window }),
        })
    }
}

/// Window size and overlap shared by every strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlidingWindow {
    max_units: usize,
    overlap_units: usize,
}

impl SlidingWindow {
    fn new(max_units: usize, overlap_units: usize) -> Result<Self> {
        if max_units == 0 {
            return Err(RagError::config("max_units must be at least 1"));
        }
        if overlap_units >= max_units {
            return Err(RagError::config(format!(
                "overlap_units ({overlap_units}) must be less than max_units ({max_units})"
            )));
        }
        Ok(Self { max_units, overlap_units })
    }

    /// Group unit spans into chunk spans.
    fn apply(&self, text: &str, units: &[Span], metadata: &Metadata) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let step = self.max_units.saturating_sub(self.overlap_units);
        let mut start = 0;

        while start < units.len() {
            let end = (start + self.max_units).min(units.len());
            let (from, _) = units[start];
            let (_, to) = units[end - 1];

            let mut chunk_metadata = metadata.clone();
            chunk_metadata.insert("chunk_index".to_string(), Value::from(chunks.len()));

            chunks.push(Chunk {
                text: text[from..to].to_string(),
                start_index: from,
                end_index: to,
                metadata: chunk_metadata,
            });

            if end == units.len() || step == 0 {
                break;
            }
            start += step;
        }

        chunks
    }
}

/// Splits text into windows of whitespace-separated words.
///
/// # Example
///
/// ```rust,ignore
/// use ragflow::{Chunker, FixedSizeChunker};
///
/// let chunker = FixedSizeChunker::new(3, 1)?;
/// let chunks = chunker.split("The quick brown fox", &Default::default());
/// assert_eq!(chunks[0].text, "The quick brown");
/// assert_eq!(chunks[1].text, "brown fox");
/// ```
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    window: SlidingWindow,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    ///
    /// # Arguments
    ///
    /// * `max_words`: maximum number of words per chunk
    /// * `overlap_words`: number of words shared by consecutive chunks
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if `max_words == 0` or
    /// `overlap_words >= max_words`.
    pub fn new(max_words: usize, overlap_words: usize) -> Result<Self> {
        Ok(Self { window: SlidingWindow::new(max_words, overlap_words)? })
    }
}

impl Chunker for FixedSizeChunker {
    fn split(&self, text: &str, metadata: &Metadata) -> Vec<Chunk> {
        self.window.apply(text, &word_spans(text), metadata)
    }

    fn units<'a>(&self, text: &'a str) -> Vec<&'a str> {
        slices(text, &word_spans(text))
    }
}

/// Splits text into windows of sentences.
///
/// A sentence ends at a run of `.`, `!` or `?` followed by whitespace or the
/// end of input. Trailing text without a terminator is its own sentence.
#[derive(Debug, Clone)]
pub struct SentenceChunker {
    window: SlidingWindow,
}

impl SentenceChunker {
    /// Create a new `SentenceChunker` with `max_sentences` per chunk.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] on invalid window parameters.
    pub fn new(max_sentences: usize, overlap_sentences: usize) -> Result<Self> {
        Ok(Self { window: SlidingWindow::new(max_sentences, overlap_sentences)? })
    }
}

impl Chunker for SentenceChunker {
    fn split(&self, text: &str, metadata: &Metadata) -> Vec<Chunk> {
        self.window.apply(text, &sentence_spans(text), metadata)
    }

    fn units<'a>(&self, text: &'a str) -> Vec<&'a str> {
        slices(text, &sentence_spans(text))
    }
}

/// Splits text into windows of paragraphs separated by blank lines.
#[derive(Debug, Clone)]
pub struct ParagraphChunker {
    window: SlidingWindow,
}

impl ParagraphChunker {
    /// Create a new `ParagraphChunker` with `max_paragraphs` per chunk.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] on invalid window parameters.
    pub fn new(max_paragraphs: usize, overlap_paragraphs: usize) -> Result<Self> {
        Ok(Self { window: SlidingWindow::new(max_paragraphs, overlap_paragraphs)? })
    }
}

impl Chunker for ParagraphChunker {
    fn split(&self, text: &str, metadata: &Metadata) -> Vec<Chunk> {
        self.window.apply(text, &paragraph_spans(text), metadata)
    }

    fn units<'a>(&self, text: &'a str) -> Vec<&'a str> {
        slices(text, &paragraph_spans(text))
    }
}

fn slices<'a>(text: &'a str, spans: &[Span]) -> Vec<&'a str> {
    spans.iter().map(|&(start, end)| &text[start..end]).collect()
}

fn word_spans(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut start = None;

    for (i, c) in text.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                spans.push((s, i));
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }

    spans
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn sentence_spans(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if start.is_none() {
            if c.is_whitespace() {
                continue;
            }
            start = Some(i);
        }

        if is_terminator(c) {
            // Absorb runs such as "?!" or "...".
            let mut end = i + c.len_utf8();
            while let Some(&(j, next)) = chars.peek() {
                if !is_terminator(next) {
                    break;
                }
                end = j + next.len_utf8();
                chars.next();
            }
            let at_boundary = chars.peek().is_none_or(|&(_, next)| next.is_whitespace());
            if at_boundary {
                if let Some(s) = start.take() {
                    spans.push((s, end));
                }
            }
        }
    }

    if let Some(s) = start {
        let end = s + text[s..].trim_end().len();
        if end > s {
            spans.push((s, end));
        }
    }

    spans
}

fn paragraph_spans(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut current: Option<Span> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        let content = line.trim();
        if content.is_empty() {
            if let Some(span) = current.take() {
                spans.push(span);
            }
            continue;
        }

        let leading = line.len() - line.trim_start().len();
        let content_start = line_start + leading;
        let content_end = content_start + content.len();
        current = Some(match current {
            Some((s, _)) => (s, content_end),
            None => (content_start, content_end),
        });
    }
    if let Some(span) = current {
        spans.push(span);
    }

    spans
}
