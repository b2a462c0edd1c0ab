use crate::models::{ExternalResult, Query};
use crate::synthesis::GenerationRequest;
use crate::PipelineError;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// External knowledge source consulted when local relevance is too low.
#[async_trait]
pub trait FallbackRetriever: Send + Sync {
    fn name(&self) -> &str;

    /// Must return promptly with `PipelineError::Cancelled` once `cancel`
    /// fires, abandoning any in-flight network call.
    async fn search(
        &self,
        query: &Query,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExternalResult>, PipelineError>;
}

/// Text generation backend used by the answer synthesizer.
#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String, PipelineError>;
}
