use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IngestError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Note,
    Pdf,
}

/// One ingested document or note. Chunks belong to exactly one source and
/// are deleted with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub source_id: Uuid,
    pub kind: SourceKind,
    pub raw_text: String,
    pub page_count: Option<u32>,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

/// A token-bounded span of a source's normalized text, the unit of
/// retrieval. Offsets are byte offsets into the normalized text and always
/// land on char boundaries, so `&normalized[start_offset..end_offset]`
/// reconstructs the chunk. Immutable once the chunker emits it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub chunk_id: Uuid,
    pub source_id: Uuid,
    pub ordinal: u32,
    pub token_count: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    pub text: String,
    pub section: Option<String>,
    pub page: Option<u32>,
    pub previous_chunk_id: Option<Uuid>,
    pub next_chunk_id: Option<Uuid>,
}

/// Supplied by the text-extraction side: page `number` starts at byte
/// `offset` of the raw text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageBoundary {
    pub number: u32,
    pub offset: usize,
}

/// Page start remapped into the normalized text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSpan {
    pub number: u32,
    pub start: usize,
}

/// Page covering `offset`, if a page table exists.
pub fn page_at(pages: &[PageSpan], offset: usize) -> Option<u32> {
    pages
        .iter()
        .take_while(|page| page.start <= offset)
        .last()
        .map(|page| page.number)
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub target_tokens: usize,
    pub overlap_tokens: usize,
    /// A trailing window smaller than this merges into its predecessor.
    pub min_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_tokens: 400,
            overlap_tokens: 50,
            min_tokens: 200,
        }
    }
}

impl ChunkerConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.target_tokens == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "target_tokens must be positive".to_string(),
            ));
        }

        if self.overlap_tokens >= self.target_tokens {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than target {}",
                self.overlap_tokens, self.target_tokens
            )));
        }

        if self.min_tokens > self.target_tokens {
            return Err(IngestError::InvalidChunkConfig(format!(
                "minimum {} must not exceed target {}",
                self.min_tokens, self.target_tokens
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RerankWeights {
    pub similarity: f64,
    pub context_coverage: f64,
    pub term_overlap: f64,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self {
            similarity: 0.6,
            context_coverage: 0.2,
            term_overlap: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetrievalConfig {
    /// Candidates fetched per requested hit, to give the reranker material.
    pub overfetch_factor: usize,
    /// Chunks pulled on each side of a hit when expanded context is
    /// requested.
    pub neighbor_radius: usize,
    pub weights: RerankWeights,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            overfetch_factor: 3,
            neighbor_radius: 1,
            weights: RerankWeights::default(),
        }
    }
}

/// A user question. Earlier revisions of this system carried tag filters
/// here; filtering is gone and retrieval is purely semantic.
#[derive(Debug, Clone)]
pub struct RetrievalQuery {
    pub text: String,
    pub top_k: usize,
    pub expand_context: bool,
}

impl RetrievalQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            top_k: 10,
            expand_context: false,
        }
    }
}

/// Per-signal scores for one ranked chunk. `similarity`,
/// `context_coverage`, and `term_overlap` are rescaled to [0,1] across the
/// candidate set; `raw_similarity` is the store's score untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub raw_similarity: f64,
    pub similarity: f64,
    pub context_coverage: f64,
    pub term_overlap: f64,
    pub combined: f64,
}

/// One ranked result. Built per query, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: TextChunk,
    pub scores: ScoreBreakdown,
    /// Neighbor chunks attached when the caller asked for expanded context.
    pub context: Vec<TextChunk>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub query: String,
    pub hits: Vec<ScoredChunk>,
}

impl RetrievalResult {
    /// An empty result is a valid outcome, not an error.
    pub fn no_results(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            hits: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}
