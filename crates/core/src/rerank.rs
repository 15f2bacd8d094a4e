use crate::models::{RerankWeights, ScoreBreakdown, ScoredChunk, TextChunk};
use crate::tokenize::{distinct_terms, folded_tokens};
use std::collections::BTreeSet;

/// A candidate entering the rerank stage: the chunk, its raw vector
/// similarity, and the text of its linked neighborhood (the chunk plus its
/// immediate siblings).
#[derive(Debug, Clone)]
pub struct RerankCandidate {
    pub chunk: TextChunk,
    pub similarity: f64,
    pub neighborhood: String,
}

/// Reorders similarity candidates with two extra signals: how much of the
/// query the chunk's neighborhood covers, and how many query terms the
/// chunk text itself matches.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reranker {
    weights: RerankWeights,
}

impl Reranker {
    pub fn new(weights: RerankWeights) -> Self {
        Self { weights }
    }

    /// Final ordering is combined score descending, then ordinal
    /// ascending, then chunk id, so repeated calls over the same
    /// candidates always agree.
    pub fn rerank(&self, query_text: &str, candidates: Vec<RerankCandidate>) -> Vec<ScoredChunk> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let query_terms = distinct_terms(query_text);

        let raw_similarity: Vec<f64> = candidates
            .iter()
            .map(|candidate| candidate.similarity)
            .collect();
        let coverage: Vec<f64> = candidates
            .iter()
            .map(|candidate| coverage_fraction(&query_terms, &candidate.neighborhood))
            .collect();
        let overlap: Vec<f64> = candidates
            .iter()
            .map(|candidate| matched_terms(&query_terms, &candidate.chunk.text) as f64)
            .collect();

        let similarity_scaled = min_max_scale(&raw_similarity);
        let coverage_scaled = min_max_scale(&coverage);
        let overlap_scaled = min_max_scale(&overlap);

        let mut scored: Vec<ScoredChunk> = candidates
            .into_iter()
            .enumerate()
            .map(|(index, candidate)| {
                let combined = self.weights.similarity * similarity_scaled[index]
                    + self.weights.context_coverage * coverage_scaled[index]
                    + self.weights.term_overlap * overlap_scaled[index];

                ScoredChunk {
                    chunk: candidate.chunk,
                    scores: ScoreBreakdown {
                        raw_similarity: raw_similarity[index],
                        similarity: similarity_scaled[index],
                        context_coverage: coverage_scaled[index],
                        term_overlap: overlap_scaled[index],
                        combined,
                    },
                    context: Vec::new(),
                }
            })
            .collect();

        scored.sort_by(|left, right| {
            right
                .scores
                .combined
                .total_cmp(&left.scores.combined)
                .then_with(|| left.chunk.ordinal.cmp(&right.chunk.ordinal))
                .then_with(|| left.chunk.chunk_id.cmp(&right.chunk.chunk_id))
        });

        scored
    }
}

/// Rescales to [0,1] across the candidate set. A signal on which every
/// candidate ties contributes its midpoint instead of dividing by zero.
fn min_max_scale(values: &[f64]) -> Vec<f64> {
    let Some(first) = values.first() else {
        return Vec::new();
    };

    let mut low = *first;
    let mut high = *first;
    for value in &values[1..] {
        low = low.min(*value);
        high = high.max(*value);
    }

    if (high - low).abs() < f64::EPSILON {
        return vec![0.5; values.len()];
    }

    values
        .iter()
        .map(|value| (value - low) / (high - low))
        .collect()
}

fn matched_terms(query_terms: &BTreeSet<String>, text: &str) -> usize {
    if query_terms.is_empty() {
        return 0;
    }
    let tokens = folded_tokens(text);
    query_terms
        .iter()
        .filter(|term| tokens.contains(term.as_str()))
        .count()
}

/// Fraction of the query's distinct terms found anywhere in the
/// neighborhood text.
fn coverage_fraction(query_terms: &BTreeSet<String>, neighborhood: &str) -> f64 {
    if query_terms.is_empty() {
        return 0.0;
    }
    matched_terms(query_terms, neighborhood) as f64 / query_terms.len() as f64
}
