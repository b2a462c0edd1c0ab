use crate::config::{AppConfig, PipelineConfig, RetrievalConfig};
use crate::local::LocalAnswerer;
use crate::models::{AnswerResult, AnswerSource, Evidence, Query};
use crate::providers::{build_fallback, build_generator};
use crate::scoring::{max_score, BlendedScorer, RelevanceScorer};
use crate::state::{PipelineStage, StageTrace};
use crate::store::DocumentStore;
use crate::synthesis::AnswerSynthesizer;
use crate::traits::FallbackRetriever;
use crate::PipelineError;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Everything observed during one run, alongside its outcome.
#[derive(Debug)]
pub struct RunReport {
    pub request_id: Uuid,
    pub outcome: Result<AnswerResult, PipelineError>,
    pub trace: StageTrace,
    pub fallback_invoked: bool,
    pub best_score: Option<f32>,
    pub elapsed: Duration,
}

#[derive(Default)]
struct RunContext {
    trace: StageTrace,
    fallback_invoked: bool,
    best_score: Option<f32>,
}

/// Routes each query to the local dataset or the web fallback and enforces
/// the request deadline and stage budgets.
pub struct Orchestrator {
    store: Arc<DocumentStore>,
    scorer: Arc<dyn RelevanceScorer>,
    local: LocalAnswerer,
    synthesizer: Arc<AnswerSynthesizer>,
    fallback: Option<Arc<dyn FallbackRetriever>>,
    top_k: usize,
    budgets: PipelineConfig,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        store: Arc<DocumentStore>,
        synthesizer: Arc<AnswerSynthesizer>,
        fallback: Option<Arc<dyn FallbackRetriever>>,
        retrieval: &RetrievalConfig,
        budgets: PipelineConfig,
    ) -> Self {
        let local = LocalAnswerer::new(
            retrieval.relevance_threshold,
            retrieval.inclusion_threshold,
            Arc::clone(&synthesizer),
        );

        Self {
            store,
            scorer: Arc::new(BlendedScorer::new(retrieval.lexical_weight)),
            local,
            synthesizer,
            fallback,
            top_k: retrieval.top_k.max(1),
            budgets,
            shutdown: CancellationToken::new(),
        }
    }

    /// Wires the configured generator and fallback around an indexed store.
    pub fn from_config(
        store: Arc<DocumentStore>,
        config: &AppConfig,
    ) -> Result<Self, PipelineError> {
        let generator = build_generator(&config.generation)?;
        let synthesizer = Arc::new(AnswerSynthesizer::new(
            generator,
            config.generation.max_context_chars,
        ));
        let fallback = build_fallback(&config.fallback)?;

        tracing::info!(
            generator = synthesizer.generator_name(),
            fallback = fallback.as_ref().map_or("disabled", |retriever| retriever.name()),
            relevance_threshold = config.retrieval.relevance_threshold,
            "orchestrator configured"
        );

        Ok(Self::new(
            store,
            synthesizer,
            fallback,
            &config.retrieval,
            config.pipeline,
        ))
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn RelevanceScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn relevance_threshold(&self) -> f32 {
        self.local.relevance_threshold()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Cancels every in-flight run; new runs fail with `Cancelled`.
    pub fn shutdown(&self) {
        tracing::info!("cancelling in-flight answer runs");
        self.shutdown.cancel();
    }

    /// Releases the store once no other handle to it remains.
    pub fn into_store(self) -> Option<DocumentStore> {
        Arc::try_unwrap(self.store).ok()
    }

    pub async fn answer(&self, raw_query: &str) -> Result<AnswerResult, PipelineError> {
        self.run(raw_query).await.outcome
    }

    pub async fn run(&self, raw_query: &str) -> RunReport {
        let request_id = Uuid::new_v4();
        let started = Instant::now();
        let cancel = self.shutdown.child_token();
        let deadline_ms = self.budgets.request_deadline_ms;
        let mut context = RunContext::default();

        let span = tracing::info_span!("answer", %request_id);
        let outcome = if cancel.is_cancelled() {
            Ok(Err(PipelineError::Cancelled))
        } else {
            let run = self
                .execute(raw_query, &cancel, &mut context)
                .instrument(span.clone());
            tokio::time::timeout(Duration::from_millis(deadline_ms), run).await
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(_) => {
                cancel.cancel();
                Err(PipelineError::Timeout {
                    stage: context.trace.current().as_str(),
                    budget_ms: deadline_ms,
                })
            }
        };

        let finished = match &outcome {
            Ok(answer) if !answer.is_degraded() => PipelineStage::Done,
            _ => PipelineStage::Failed,
        };
        context.trace.advance(finished);

        let elapsed = started.elapsed();
        span.in_scope(|| match &outcome {
            Ok(answer) => tracing::info!(
                source = %answer.source,
                degraded = answer.is_degraded(),
                fallback_invoked = context.fallback_invoked,
                best_score = context.best_score.unwrap_or(0.0),
                elapsed_ms = elapsed.as_millis() as u64,
                "answer ready"
            ),
            Err(error) => tracing::warn!(
                kind = error.kind(),
                %error,
                fallback_invoked = context.fallback_invoked,
                elapsed_ms = elapsed.as_millis() as u64,
                "answer failed"
            ),
        });

        RunReport {
            request_id,
            outcome,
            trace: context.trace,
            fallback_invoked: context.fallback_invoked,
            best_score: context.best_score,
            elapsed,
        }
    }

    async fn execute(
        &self,
        raw_query: &str,
        cancel: &CancellationToken,
        context: &mut RunContext,
    ) -> Result<AnswerResult, PipelineError> {
        context.trace.advance(PipelineStage::RetrievingLocal);
        let query = self.store.query(raw_query)?;
        let candidates = self.store.retrieve(&query, self.top_k)?;
        let scored = self.scorer.score_all(&query, &candidates);
        let best = max_score(&scored);
        context.best_score = Some(best);

        match self.local.select(&scored) {
            Ok(selected) => {
                context.trace.advance(PipelineStage::LocalSufficient);
                tracing::debug!(
                    stage = "local_sufficient",
                    score = best,
                    chunks = selected.len(),
                    "answering from local dataset"
                );
                context.trace.advance(PipelineStage::AnsweringLocal);

                let answered = within_budget(
                    cancel,
                    "synthesis",
                    self.budgets.synthesis_budget_ms,
                    self.local.answer_selected(&query, selected),
                )
                .await;
                degrade_on_failure(answered, AnswerSource::Local)
            }
            Err(PipelineError::InsufficientContext { best, threshold }) => {
                context.trace.advance(PipelineStage::LocalInsufficient);
                tracing::info!(
                    stage = "local_insufficient",
                    score = best,
                    threshold,
                    "local context insufficient"
                );
                self.answer_from_fallback(&query, cancel, context).await
            }
            Err(other) => Err(other),
        }
    }

    async fn answer_from_fallback(
        &self,
        query: &Query,
        cancel: &CancellationToken,
        context: &mut RunContext,
    ) -> Result<AnswerResult, PipelineError> {
        let Some(fallback) = &self.fallback else {
            let error = PipelineError::FallbackUnavailable("web fallback is disabled".to_string());
            return Ok(AnswerResult::degraded(AnswerSource::Fallback, &error));
        };

        context.trace.advance(PipelineStage::RetrievingFallback);
        context.fallback_invoked = true;
        let searched = within_budget(
            cancel,
            "fallback",
            self.budgets.fallback_budget_ms,
            fallback.search(query, cancel),
        )
        .await;

        let results = match searched {
            Ok(results) => results,
            Err(error) if error.is_degradable() => {
                tracing::warn!(
                    stage = "retrieving_fallback",
                    %error,
                    "fallback failed, returning degraded answer"
                );
                return Ok(AnswerResult::degraded(AnswerSource::Fallback, &error));
            }
            Err(error) => return Err(error),
        };

        context.trace.advance(PipelineStage::AnsweringFallback);
        tracing::debug!(
            stage = "answering_fallback",
            results = results.len(),
            "answering from web results"
        );

        let answered = within_budget(
            cancel,
            "synthesis",
            self.budgets.synthesis_budget_ms,
            self.synthesizer.synthesize(query, Evidence::Fallback(results)),
        )
        .await;
        degrade_on_failure(answered, AnswerSource::Fallback)
    }
}

/// Runs `work` under a stage budget. Exceeding the budget cancels the run's
/// token so nested network calls are abandoned.
async fn within_budget<T, F>(
    cancel: &CancellationToken,
    stage: &'static str,
    budget_ms: u64,
    work: F,
) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        outcome = tokio::time::timeout(Duration::from_millis(budget_ms), work) => match outcome {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                Err(PipelineError::Timeout { stage, budget_ms })
            }
        },
    }
}

fn degrade_on_failure(
    answered: Result<AnswerResult, PipelineError>,
    attempted: AnswerSource,
) -> Result<AnswerResult, PipelineError> {
    match answered {
        Err(error) if error.is_degradable() => {
            tracing::warn!(
                %error,
                source = %attempted,
                "synthesis failed, returning degraded answer"
            );
            Ok(AnswerResult::degraded(attempted, &error))
        }
        other => other,
    }
}
