//! Layered service configuration.
//!
//! Defaults, then an optional TOML file, then `FALLBACK_RAG_*` environment
//! variables (`__` separates sections, e.g. `FALLBACK_RAG_RETRIEVAL__TOP_K`).

use crate::chunking::ChunkingConfig;
use crate::embeddings::DEFAULT_EMBEDDING_DIMENSIONS;
use crate::error::ConfigError;
use crate::scoring::DEFAULT_LEXICAL_WEIGHT;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "fallback-rag.toml";
pub const ENV_PREFIX: &str = "FALLBACK_RAG_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub dataset: DatasetConfig,
    pub retrieval: RetrievalConfig,
    pub fallback: FallbackConfig,
    pub generation: GenerationConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            static_dir: PathBuf::from("static"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub path: PathBuf,
    pub chunking: ChunkingConfig,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data"),
            chunking: ChunkingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Minimum best-chunk score for answering locally (τ).
    pub relevance_threshold: f32,
    /// Minimum score for a chunk to be used as grounding once τ is met.
    pub inclusion_threshold: f32,
    /// Share of the score taken from exact query-term coverage; the rest is
    /// embedding cosine.
    pub lexical_weight: f32,
    pub embedding_dimensions: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            relevance_threshold: 0.5,
            inclusion_threshold: 0.35,
            lexical_weight: DEFAULT_LEXICAL_WEIGHT,
            embedding_dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub enabled: bool,
    pub max_results: usize,
    pub attempt_timeout_ms: u64,
    pub retry_delay_ms: u64,
    pub duckduckgo_endpoint: String,
    pub google_endpoint: String,
    pub google_api_key: Option<String>,
    pub google_engine_id: Option<String>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_results: 5,
            attempt_timeout_ms: 5_000,
            retry_delay_ms: 250,
            duckduckgo_endpoint: "https://api.duckduckgo.com/".to_string(),
            google_endpoint: "https://www.googleapis.com/customsearch/v1".to_string(),
            google_api_key: None,
            google_engine_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorKind {
    #[default]
    Extractive,
    Openai,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub provider: GeneratorKind,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_ms: u64,
    pub max_context_chars: usize,
    pub max_passages: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: GeneratorKind::Extractive,
            base_url: "http://localhost:1234".to_string(),
            model: "qwen2.5-1.5b-instruct".to_string(),
            api_key: None,
            temperature: 0.1,
            max_tokens: 512,
            timeout_ms: 20_000,
            max_context_chars: 4_000,
            max_passages: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub request_deadline_ms: u64,
    pub fallback_budget_ms: u64,
    pub synthesis_budget_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            request_deadline_ms: 30_000,
            fallback_budget_ms: 12_000,
            synthesis_budget_ms: 20_000,
        }
    }
}

impl AppConfig {
    /// Loads configuration. An explicit `path` must exist; without one,
    /// `fallback-rag.toml` in the working directory is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(path, ENV_PREFIX)?)
    }

    fn figment(path: Option<&Path>, env_prefix: &str) -> Result<Figment, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

        match path {
            Some(path) if !path.is_file() => {
                return Err(ConfigError::Invalid {
                    key: "config",
                    details: format!("{} does not exist", path.display()),
                });
            }
            Some(path) => figment = figment.merge(Toml::file(path)),
            None => figment = figment.merge(Toml::file(DEFAULT_CONFIG_FILE)),
        }

        Ok(figment.merge(Env::prefixed(env_prefix).split("__")))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let retrieval = &self.retrieval;
        check_unit("retrieval.relevance_threshold", retrieval.relevance_threshold)?;
        check_unit("retrieval.inclusion_threshold", retrieval.inclusion_threshold)?;
        check_unit("retrieval.lexical_weight", retrieval.lexical_weight)?;
        if retrieval.inclusion_threshold > retrieval.relevance_threshold {
            return Err(ConfigError::Invalid {
                key: "retrieval.inclusion_threshold",
                details: format!(
                    "{} is above the relevance threshold {}",
                    retrieval.inclusion_threshold, retrieval.relevance_threshold
                ),
            });
        }
        check_positive("retrieval.top_k", retrieval.top_k as u64)?;
        check_positive("retrieval.embedding_dimensions", retrieval.embedding_dimensions as u64)?;
        check_positive("fallback.max_results", self.fallback.max_results as u64)?;
        check_positive("fallback.attempt_timeout_ms", self.fallback.attempt_timeout_ms)?;
        check_positive("generation.timeout_ms", self.generation.timeout_ms)?;
        check_positive("generation.max_context_chars", self.generation.max_context_chars as u64)?;
        check_positive("pipeline.request_deadline_ms", self.pipeline.request_deadline_ms)?;
        check_positive("pipeline.fallback_budget_ms", self.pipeline.fallback_budget_ms)?;
        check_positive("pipeline.synthesis_budget_ms", self.pipeline.synthesis_budget_ms)?;

        self.dataset
            .chunking
            .validate()
            .map_err(|error| ConfigError::Invalid {
                key: "dataset.chunking",
                details: error.to_string(),
            })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn check_unit(key: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            key,
            details: format!("{value} is outside [0, 1]"),
        })
    }
}

fn check_positive(key: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::Invalid {
            key,
            details: "must be greater than zero".to_string(),
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retrieval.embedding_dimensions, 256);
        assert_eq!(config.generation.provider, GeneratorKind::Extractive);
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[retrieval]\nrelevance_threshold = 0.7\n\n\
             [generation]\nprovider = \"openai\"\nmodel = \"llama3\""
        )
        .unwrap();

        let figment = AppConfig::figment(Some(file.path()), "FALLBACK_RAG_TOML_TEST_").unwrap();
        let config = AppConfig::from_figment(figment).unwrap();
        assert_eq!(config.retrieval.relevance_threshold, 0.7);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.generation.provider, GeneratorKind::Openai);
        assert_eq!(config.generation.model, "llama3");
    }

    #[test]
    fn environment_overrides_nested_keys() {
        std::env::set_var("FALLBACK_RAG_ENV_TEST_RETRIEVAL__TOP_K", "9");
        std::env::set_var("FALLBACK_RAG_ENV_TEST_FALLBACK__ENABLED", "false");
        let figment = AppConfig::figment(None, "FALLBACK_RAG_ENV_TEST_").unwrap();
        let config = AppConfig::from_figment(figment).unwrap();
        std::env::remove_var("FALLBACK_RAG_ENV_TEST_RETRIEVAL__TOP_K");
        std::env::remove_var("FALLBACK_RAG_ENV_TEST_FALLBACK__ENABLED");

        assert_eq!(config.retrieval.top_k, 9);
        assert!(!config.fallback.enabled);
    }

    #[test]
    fn missing_explicit_file_is_rejected() {
        let error = AppConfig::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(error, ConfigError::Invalid { key: "config", .. }));
    }

    #[test]
    fn thresholds_are_validated() {
        let mut config = AppConfig::default();
        config.retrieval.relevance_threshold = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "retrieval.relevance_threshold", .. })
        ));

        let mut config = AppConfig::default();
        config.retrieval.inclusion_threshold = 0.9;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "retrieval.inclusion_threshold", .. })
        ));

        let mut config = AppConfig::default();
        config.retrieval.lexical_weight = -0.1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "retrieval.lexical_weight", .. })
        ));

        let mut config = AppConfig::default();
        config.pipeline.request_deadline_ms = 0;
        assert!(config.validate().is_err());
    }
}
