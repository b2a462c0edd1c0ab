pub mod extractive;
pub mod openai;
pub mod web_search;

pub use extractive::ExtractiveGenerator;
pub use openai::OpenAiCompatibleGenerator;
pub use web_search::WebSearchRetriever;

use crate::config::{FallbackConfig, GenerationConfig, GeneratorKind};
use crate::traits::{FallbackRetriever, Generator};
use crate::PipelineError;
use std::sync::Arc;
use std::time::Duration;

pub fn build_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>, PipelineError> {
    let generator: Arc<dyn Generator> = match config.provider {
        GeneratorKind::Extractive => Arc::new(ExtractiveGenerator {
            max_passages: config.max_passages,
        }),
        GeneratorKind::Openai => Arc::new(OpenAiCompatibleGenerator::new(
            config.base_url.clone(),
            config.model.clone(),
            config.api_key.clone(),
            config.temperature,
            config.max_tokens,
            Duration::from_millis(config.timeout_ms),
        )?),
    };
    Ok(generator)
}

/// `None` when the fallback is disabled.
pub fn build_fallback(
    config: &FallbackConfig,
) -> Result<Option<Arc<dyn FallbackRetriever>>, PipelineError> {
    if !config.enabled {
        return Ok(None);
    }
    Ok(Some(Arc::new(WebSearchRetriever::new(config)?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_follows_configured_provider() {
        let mut config = GenerationConfig::default();
        assert_eq!(build_generator(&config).unwrap().name(), "extractive");

        config.provider = GeneratorKind::Openai;
        assert_eq!(build_generator(&config).unwrap().name(), "openai");
    }

    #[test]
    fn disabled_fallback_builds_nothing() {
        let config = FallbackConfig {
            enabled: false,
            ..FallbackConfig::default()
        };
        assert!(build_fallback(&config).unwrap().is_none());
        assert!(build_fallback(&FallbackConfig::default()).unwrap().is_some());
    }
}
