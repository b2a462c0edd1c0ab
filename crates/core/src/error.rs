use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error in {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("json error in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("unsupported dataset format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Failures of a single answering run.
///
/// `InsufficientContext` is the expected signal that local data is not
/// relevant enough; the orchestrator recovers from it by falling back.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("document index is not available")]
    IndexUnavailable,

    #[error("no local chunk cleared the relevance threshold {threshold:.2} (best {best:.2})")]
    InsufficientContext { best: f32, threshold: f32 },

    #[error("fallback retrieval unavailable: {0}")]
    FallbackUnavailable(String),

    #[error("answer synthesis failed: {0}")]
    Synthesis(String),

    #[error("{stage} exceeded its time budget of {budget_ms}ms")]
    Timeout { stage: &'static str, budget_ms: u64 },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("request was cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Machine-readable kind, used for degraded responses and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::IndexUnavailable => "index_unavailable",
            Self::InsufficientContext { .. } => "insufficient_context",
            Self::FallbackUnavailable(_) => "fallback_unavailable",
            Self::Synthesis(_) => "synthesis_error",
            Self::Timeout { .. } => "timeout",
            Self::InvalidQuery(_) => "invalid_query",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the failure should become a degraded 200 answer instead of an
    /// error response.
    pub fn is_degradable(&self) -> bool {
        matches!(self, Self::FallbackUnavailable(_) | Self::Synthesis(_))
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(error: reqwest::Error) -> Self {
        Self::FallbackUnavailable(error.to_string())
    }
}

impl From<url::ParseError> for PipelineError {
    fn from(error: url::ParseError) -> Self {
        Self::FallbackUnavailable(format!("url parse error: {error}"))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config extraction failed: {0}")]
    Extract(#[from] Box<figment::Error>),

    #[error("invalid config value for {key}: {details}")]
    Invalid { key: &'static str, details: String },
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
