use crate::embeddings::Embedder;
use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One unit of source content before chunking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    /// Human readable origin, e.g. `InflationRates.csv#row=12`.
    pub locator: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub source_locator: String,
    /// Position in dataset order; ties in similarity are broken on this.
    pub ordinal: u64,
    #[serde(skip)]
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct Query {
    pub raw_text: String,
    pub normalized_text: String,
    pub embedding: Vec<f32>,
}

impl Query {
    pub fn new(
        raw_text: impl Into<String>,
        embedder: &dyn Embedder,
    ) -> Result<Self, PipelineError> {
        let raw_text = raw_text.into();
        let normalized_text = normalize_query(&raw_text);
        if normalized_text.is_empty() {
            return Err(PipelineError::InvalidQuery("query is empty".to_string()));
        }

        let embedding = embedder.embed(&normalized_text);
        Ok(Self {
            raw_text,
            normalized_text,
            embedding,
        })
    }
}

pub fn normalize_query(raw: &str) -> String {
    let stripped: String = raw
        .to_lowercase()
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || matches!(ch, '%' | '.' | '-') {
                ch
            } else {
                ' '
            }
        })
        .collect();

    stripped
        .split_whitespace()
        .map(|token| token.trim_end_matches('.'))
        .filter(|token| !token.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Arc<Chunk>,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalResult {
    pub title: String,
    pub text: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerSource {
    Local,
    Fallback,
}

impl fmt::Display for AnswerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Fallback => f.write_str("fallback"),
        }
    }
}

/// The material an answer was grounded on.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "items", rename_all = "lowercase")]
pub enum Evidence {
    Local(Vec<ScoredChunk>),
    Fallback(Vec<ExternalResult>),
}

impl Evidence {
    pub fn source(&self) -> AnswerSource {
        match self {
            Self::Local(_) => AnswerSource::Local,
            Self::Fallback(_) => AnswerSource::Fallback,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Local(chunks) => chunks.is_empty(),
            Self::Fallback(results) => results.is_empty(),
        }
    }

    /// Locators for local chunks, URLs for external results.
    pub fn citations(&self) -> Vec<String> {
        let mut citations = Vec::new();
        match self {
            Self::Local(chunks) => {
                for scored in chunks {
                    if !citations.contains(&scored.chunk.source_locator) {
                        citations.push(scored.chunk.source_locator.clone());
                    }
                }
            }
            Self::Fallback(results) => {
                for result in results {
                    if !result.url.is_empty() && !citations.contains(&result.url) {
                        citations.push(result.url.clone());
                    }
                }
            }
        }
        citations
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Degradation {
    pub kind: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerResult {
    pub text: String,
    pub source: AnswerSource,
    pub evidence: Evidence,
    pub degraded: Option<Degradation>,
}

impl AnswerResult {
    pub fn grounded(text: impl Into<String>, evidence: Evidence) -> Self {
        Self {
            text: text.into(),
            source: evidence.source(),
            evidence,
            degraded: None,
        }
    }

    /// An answer that explains why nothing could be grounded.
    pub fn degraded(attempted: AnswerSource, error: &PipelineError) -> Self {
        let text = match attempted {
            AnswerSource::Local => {
                "I found relevant entries in the local dataset but could not compose an answer \
                 from them right now."
            }
            AnswerSource::Fallback => {
                "I could not find this in the local dataset and the web search fallback is \
                 unavailable, so I cannot give a grounded answer right now."
            }
        };
        let evidence = match attempted {
            AnswerSource::Local => Evidence::Local(Vec::new()),
            AnswerSource::Fallback => Evidence::Fallback(Vec::new()),
        };

        Self {
            text: text.to_string(),
            source: attempted,
            evidence,
            degraded: Some(Degradation {
                kind: error.kind(),
                reason: error.to_string(),
            }),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub chunk_count: usize,
    pub checksum: String,
    pub indexed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;

    #[test]
    fn query_normalization_keeps_numbers_and_percentages() {
        assert_eq!(
            normalize_query("  What was INFLATION in 2023?? (approx 4.1%)"),
            "what was inflation in 2023 approx 4.1%"
        );
    }

    #[test]
    fn blank_query_is_rejected() {
        let embedder = CharacterNgramEmbedder::default();
        let error = Query::new(" ?! ", &embedder).unwrap_err();
        assert!(matches!(error, PipelineError::InvalidQuery(_)));
    }

    #[test]
    fn answer_source_follows_evidence() {
        let answer = AnswerResult::grounded("x", Evidence::Fallback(Vec::new()));
        assert_eq!(answer.source, AnswerSource::Fallback);
        assert!(!answer.is_degraded());
    }

    #[test]
    fn degraded_answer_carries_error_kind() {
        let error = PipelineError::FallbackUnavailable("dns failure".to_string());
        let answer = AnswerResult::degraded(AnswerSource::Fallback, &error);
        assert_eq!(answer.source, AnswerSource::Fallback);
        assert_eq!(
            answer.degraded.as_ref().map(|d| d.kind),
            Some("fallback_unavailable")
        );
        assert!(answer.evidence.is_empty());
    }

    #[test]
    fn citations_are_deduplicated() {
        let evidence = Evidence::Fallback(vec![
            ExternalResult {
                title: "a".to_string(),
                text: "a".to_string(),
                url: "https://example.org/a".to_string(),
            },
            ExternalResult {
                title: "a again".to_string(),
                text: "a".to_string(),
                url: "https://example.org/a".to_string(),
            },
        ]);
        assert_eq!(evidence.citations(), vec!["https://example.org/a".to_string()]);
    }
}
