use crate::models::AnswerSource;
use crate::synthesis::GenerationRequest;
use crate::traits::Generator;
use crate::PipelineError;
use async_trait::async_trait;

/// Offline generator that answers with the grounding passages verbatim.
#[derive(Debug, Clone, Copy)]
pub struct ExtractiveGenerator {
    pub max_passages: usize,
}

impl Default for ExtractiveGenerator {
    fn default() -> Self {
        Self { max_passages: 2 }
    }
}

#[async_trait]
impl Generator for ExtractiveGenerator {
    fn name(&self) -> &str {
        "extractive"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, PipelineError> {
        let mut passages = request.passages.iter().take(self.max_passages.max(1));
        let first = passages
            .next()
            .ok_or_else(|| PipelineError::Synthesis("no passages to extract from".to_string()))?;

        let origin = match request.source {
            AnswerSource::Local => "the local dataset",
            AnswerSource::Fallback => "web search",
        };

        let mut answer = format!("According to {origin} ({}): {}", first.citation, first.text);
        for passage in passages {
            answer.push_str(&format!("\nAlso relevant ({}): {}", passage.citation, passage.text));
        }

        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthesis::Passage;

    fn request(source: AnswerSource, count: usize) -> GenerationRequest {
        GenerationRequest {
            question: "What was inflation in 2023?".to_string(),
            source,
            passages: (0..count)
                .map(|index| Passage {
                    citation: format!("source-{index}"),
                    text: format!("passage {index}"),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn quotes_best_passage_with_origin() {
        let answer = ExtractiveGenerator::default()
            .generate(&request(AnswerSource::Local, 1))
            .await
            .unwrap();
        assert_eq!(answer, "According to the local dataset (source-0): passage 0");
    }

    #[tokio::test]
    async fn caps_number_of_passages() {
        let answer = ExtractiveGenerator { max_passages: 2 }
            .generate(&request(AnswerSource::Fallback, 5))
            .await
            .unwrap();
        assert!(answer.starts_with("According to web search"));
        assert_eq!(answer.lines().count(), 2);
    }

    #[tokio::test]
    async fn no_passages_is_a_synthesis_error() {
        let error = ExtractiveGenerator::default()
            .generate(&request(AnswerSource::Local, 0))
            .await
            .unwrap_err();
        assert!(matches!(error, PipelineError::Synthesis(_)));
    }
}
