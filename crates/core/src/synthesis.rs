use crate::models::{AnswerResult, AnswerSource, Evidence, Query};
use crate::traits::Generator;
use crate::PipelineError;
use serde::Serialize;
use std::sync::Arc;

const LOCAL_SYSTEM_PROMPT: &str = "You answer questions using only the dataset excerpts \
    provided. Quote figures exactly as they appear. If the excerpts do not contain the answer, \
    say so.";

const FALLBACK_SYSTEM_PROMPT: &str = "You answer questions using only the web search results \
    provided. Mention which result supports the answer. If the results do not contain the \
    answer, say so.";

/// One piece of grounding context handed to a generator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Passage {
    pub citation: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub question: String,
    pub source: AnswerSource,
    pub passages: Vec<Passage>,
}

impl GenerationRequest {
    pub fn system_prompt(&self) -> &'static str {
        match self.source {
            AnswerSource::Local => LOCAL_SYSTEM_PROMPT,
            AnswerSource::Fallback => FALLBACK_SYSTEM_PROMPT,
        }
    }

    pub fn user_prompt(&self) -> String {
        let context = self
            .passages
            .iter()
            .enumerate()
            .map(|(index, passage)| {
                format!("[{}] ({}) {}", index + 1, passage.citation, passage.text)
            })
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "Context:\n==================\n{context}\n\nQuestion:\n==================\n{}",
            self.question
        )
    }
}

/// Turns grounded context into the final answer, tagged with its source.
pub struct AnswerSynthesizer {
    generator: Arc<dyn Generator>,
    max_context_chars: usize,
}

impl AnswerSynthesizer {
    pub fn new(generator: Arc<dyn Generator>, max_context_chars: usize) -> Self {
        Self {
            generator,
            max_context_chars: max_context_chars.max(1),
        }
    }

    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    /// Passages in evidence order, stopping once the context budget is spent.
    /// The first passage is always kept, truncated if needed.
    pub fn build_request(&self, query: &Query, evidence: &Evidence) -> GenerationRequest {
        let candidates: Vec<Passage> = match evidence {
            Evidence::Local(chunks) => chunks
                .iter()
                .map(|scored| Passage {
                    citation: scored.chunk.source_locator.clone(),
                    text: scored.chunk.text.clone(),
                })
                .collect(),
            Evidence::Fallback(results) => results
                .iter()
                .map(|result| Passage {
                    citation: if result.url.is_empty() {
                        result.title.clone()
                    } else {
                        result.url.clone()
                    },
                    text: result.text.clone(),
                })
                .collect(),
        };

        let mut budget = self.max_context_chars;
        let mut passages = Vec::new();
        for passage in candidates {
            let length = passage.text.chars().count();
            if length <= budget {
                budget -= length;
                passages.push(passage);
            } else if passages.is_empty() {
                passages.push(Passage {
                    text: passage.text.chars().take(budget).collect(),
                    citation: passage.citation,
                });
                break;
            } else {
                break;
            }
        }

        GenerationRequest {
            question: query.raw_text.trim().to_string(),
            source: evidence.source(),
            passages,
        }
    }

    pub async fn synthesize(
        &self,
        query: &Query,
        evidence: Evidence,
    ) -> Result<AnswerResult, PipelineError> {
        if evidence.is_empty() {
            return Err(PipelineError::Synthesis(format!(
                "no {} context to answer from",
                evidence.source()
            )));
        }

        let request = self.build_request(query, &evidence);
        tracing::debug!(
            generator = self.generator.name(),
            source = %request.source,
            passages = request.passages.len(),
            "synthesizing answer"
        );

        let text = match self.generator.generate(&request).await {
            Ok(text) => text,
            Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(PipelineError::Synthesis(details)) => return Err(PipelineError::Synthesis(details)),
            Err(other) => return Err(PipelineError::Synthesis(other.to_string())),
        };

        let text = text.trim();
        if text.is_empty() {
            return Err(PipelineError::Synthesis(format!(
                "{} returned an empty answer",
                self.generator.name()
            )));
        }

        Ok(AnswerResult::grounded(text, evidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::models::{Chunk, ExternalResult, ScoredChunk};
    use async_trait::async_trait;

    struct EchoGenerator;

    #[async_trait]
    impl Generator for EchoGenerator {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<String, PipelineError> {
            Ok(request
                .passages
                .first()
                .map(|passage| passage.text.clone())
                .unwrap_or_default())
        }
    }

    struct BrokenGenerator;

    #[async_trait]
    impl Generator for BrokenGenerator {
        fn name(&self) -> &str {
            "broken"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<String, PipelineError> {
            Err(PipelineError::FallbackUnavailable("connection refused".to_string()))
        }
    }

    fn query(text: &str) -> Query {
        Query::new(text, &CharacterNgramEmbedder::default()).unwrap()
    }

    fn local_evidence(texts: &[&str]) -> Evidence {
        Evidence::Local(
            texts
                .iter()
                .enumerate()
                .map(|(index, text)| ScoredChunk {
                    chunk: Arc::new(Chunk {
                        id: index.to_string(),
                        text: text.to_string(),
                        source_locator: format!("rates.csv#row={}", index + 1),
                        ordinal: index as u64,
                        embedding: Vec::new(),
                    }),
                    score: 0.9,
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn local_answer_is_tagged_local() {
        let synthesizer = AnswerSynthesizer::new(Arc::new(EchoGenerator), 1_000);
        let evidence = local_evidence(&["Inflation rate in 2023 was 4.1%"]);
        let answer = synthesizer
            .synthesize(&query("inflation 2023"), evidence)
            .await
            .unwrap();
        assert_eq!(answer.source, AnswerSource::Local);
        assert!(answer.text.contains("4.1%"));
    }

    #[tokio::test]
    async fn fallback_answer_is_tagged_fallback() {
        let synthesizer = AnswerSynthesizer::new(Arc::new(EchoGenerator), 1_000);
        let evidence = Evidence::Fallback(vec![ExternalResult {
            title: "Mars".to_string(),
            text: "Mars has no capital.".to_string(),
            url: "https://example.org/mars".to_string(),
        }]);
        let answer = synthesizer.synthesize(&query("capital of mars"), evidence).await.unwrap();
        assert_eq!(answer.source, AnswerSource::Fallback);
        assert_eq!(answer.evidence.citations(), vec!["https://example.org/mars".to_string()]);
    }

    #[tokio::test]
    async fn generator_failures_surface_as_synthesis_errors() {
        let synthesizer = AnswerSynthesizer::new(Arc::new(BrokenGenerator), 1_000);
        let evidence = local_evidence(&["Inflation rate in 2023 was 4.1%"]);
        let error = synthesizer
            .synthesize(&query("inflation"), evidence)
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            PipelineError::Synthesis(details) if details.contains("connection refused")
        ));
    }

    #[tokio::test]
    async fn empty_evidence_is_rejected() {
        let synthesizer = AnswerSynthesizer::new(Arc::new(EchoGenerator), 1_000);
        let error = synthesizer
            .synthesize(&query("inflation"), Evidence::Fallback(Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(error, PipelineError::Synthesis(_)));
    }

    #[test]
    fn context_budget_limits_passages() {
        let synthesizer = AnswerSynthesizer::new(Arc::new(EchoGenerator), 12);
        let request = synthesizer.build_request(
            &query("inflation"),
            &local_evidence(&["0123456789abcdef", "second passage"]),
        );
        assert_eq!(request.passages.len(), 1);
        assert_eq!(request.passages[0].text, "0123456789ab");
        assert!(request.user_prompt().contains("[1] (rates.csv#row=1)"));
    }
}
