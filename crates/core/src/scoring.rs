use crate::models::{normalize_query, Chunk, Query, ScoredChunk};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

pub const DEFAULT_LEXICAL_WEIGHT: f32 = 0.5;

/// Words that carry no retrieval signal on their own.
const STOP_WORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "by", "did", "do", "does", "for", "from",
    "how", "in", "is", "it", "its", "of", "on", "or", "that", "the", "this", "to", "was", "were",
    "what", "when", "where", "which", "who", "why", "with",
];

/// Maps a query/chunk pair to a relevance score in `[0, 1]`.
///
/// Implementations must be deterministic: the fallback decision is taken on
/// these scores, so the same inputs must always classify the same way.
pub trait RelevanceScorer: Send + Sync {
    fn score(&self, query: &Query, chunk: &Chunk) -> f32;

    fn score_all(&self, query: &Query, chunks: &[Arc<Chunk>]) -> Vec<ScoredChunk> {
        let mut scored = chunks
            .iter()
            .map(|chunk| ScoredChunk {
                score: self.score(query, chunk).clamp(0.0, 1.0),
                chunk: Arc::clone(chunk),
            })
            .collect::<Vec<_>>();
        sort_scored(&mut scored);
        scored
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CosineScorer;

impl RelevanceScorer for CosineScorer {
    fn score(&self, query: &Query, chunk: &Chunk) -> f32 {
        cosine_similarity(&query.embedding, &chunk.embedding).clamp(0.0, 1.0)
    }
}

/// Cosine similarity blended with exact term coverage.
///
/// Trigram cosine alone lets a row that repeats a query word outrank the row
/// holding the asked-for year, since "2022" and "2023" share most trigrams.
/// Coverage only credits whole terms, so years and figures must match exactly.
#[derive(Debug, Clone, Copy)]
pub struct BlendedScorer {
    lexical_weight: f32,
}

impl BlendedScorer {
    pub fn new(lexical_weight: f32) -> Self {
        Self {
            lexical_weight: lexical_weight.clamp(0.0, 1.0),
        }
    }
}

impl Default for BlendedScorer {
    fn default() -> Self {
        Self::new(DEFAULT_LEXICAL_WEIGHT)
    }
}

impl RelevanceScorer for BlendedScorer {
    fn score(&self, query: &Query, chunk: &Chunk) -> f32 {
        let semantic = CosineScorer.score(query, chunk);
        match term_coverage(&query.normalized_text, &chunk.text) {
            Some(coverage) => {
                let weight = self.lexical_weight;
                ((1.0 - weight) * semantic + weight * coverage).clamp(0.0, 1.0)
            }
            None => semantic,
        }
    }
}

/// Distinct normalized terms of `text`, minus stop words.
pub fn content_terms(text: &str) -> HashSet<String> {
    normalize_query(text)
        .split(' ')
        .filter(|term| !term.is_empty() && !STOP_WORDS.contains(term))
        .map(str::to_string)
        .collect()
}

/// Share of the query's content terms found in `text`. `None` when the query
/// is made only of stop words.
pub fn term_coverage(query_text: &str, text: &str) -> Option<f32> {
    let wanted = content_terms(query_text);
    if wanted.is_empty() {
        return None;
    }

    let present = content_terms(text);
    let matched = wanted.iter().filter(|term| present.contains(*term)).count();
    Some(matched as f32 / wanted.len() as f32)
}

/// Cosine similarity; zero for empty, mismatched or zero-magnitude vectors.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.is_empty() || left.len() != right.len() {
        return 0.0;
    }

    let dot = left
        .iter()
        .zip(right.iter())
        .map(|(l, r)| l * r)
        .sum::<f32>();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();
    let denom = left_norm * right_norm;
    if denom <= f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Descending by score, ties broken by dataset order.
pub fn sort_scored(scored: &mut [ScoredChunk]) {
    scored.sort_by(|left, right| {
        right
            .score
            .partial_cmp(&left.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| left.chunk.ordinal.cmp(&right.chunk.ordinal))
    });
}

pub fn max_score(scored: &[ScoredChunk]) -> f32 {
    scored
        .iter()
        .map(|item| item.score)
        .fold(0.0_f32, f32::max)
}
