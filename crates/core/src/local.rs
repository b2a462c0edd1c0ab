use crate::models::{AnswerResult, Evidence, Query, ScoredChunk};
use crate::scoring::{max_score, sort_scored};
use crate::synthesis::AnswerSynthesizer;
use crate::PipelineError;
use std::sync::Arc;

/// Answers strictly from local chunks that clear the relevance gate.
pub struct LocalAnswerer {
    relevance_threshold: f32,
    inclusion_threshold: f32,
    synthesizer: Arc<AnswerSynthesizer>,
}

impl LocalAnswerer {
    pub fn new(
        relevance_threshold: f32,
        inclusion_threshold: f32,
        synthesizer: Arc<AnswerSynthesizer>,
    ) -> Self {
        Self {
            relevance_threshold,
            inclusion_threshold: inclusion_threshold.min(relevance_threshold),
            synthesizer,
        }
    }

    pub fn relevance_threshold(&self) -> f32 {
        self.relevance_threshold
    }

    pub fn is_sufficient(&self, scored: &[ScoredChunk]) -> bool {
        !scored.is_empty() && max_score(scored) >= self.relevance_threshold
    }

    /// Chunks allowed to ground the answer: everything at or above the
    /// inclusion threshold, best first. Fails with `InsufficientContext`
    /// when the best chunk is below the relevance threshold.
    pub fn select(&self, scored: &[ScoredChunk]) -> Result<Vec<ScoredChunk>, PipelineError> {
        let best = max_score(scored);
        if !self.is_sufficient(scored) {
            return Err(PipelineError::InsufficientContext {
                best,
                threshold: self.relevance_threshold,
            });
        }

        let mut selected = scored
            .iter()
            .filter(|item| item.score >= self.inclusion_threshold)
            .cloned()
            .collect::<Vec<_>>();
        sort_scored(&mut selected);
        Ok(selected)
    }

    pub async fn answer(
        &self,
        query: &Query,
        scored: &[ScoredChunk],
    ) -> Result<AnswerResult, PipelineError> {
        let selected = self.select(scored)?;
        self.answer_selected(query, selected).await
    }

    pub async fn answer_selected(
        &self,
        query: &Query,
        selected: Vec<ScoredChunk>,
    ) -> Result<AnswerResult, PipelineError> {
        self.synthesizer
            .synthesize(query, Evidence::Local(selected))
            .await
    }
}
