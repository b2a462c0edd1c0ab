pub mod chunking;
pub mod config;
pub mod dataset;
pub mod embeddings;
pub mod error;
pub mod local;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod scoring;
pub mod state;
pub mod store;
pub mod synthesis;
pub mod traits;

pub use chunking::{build_chunks, chunk_by_paragraph, normalize_whitespace, ChunkingConfig};
pub use config::{
    AppConfig, DatasetConfig, FallbackConfig, GenerationConfig, GeneratorKind, PipelineConfig,
    RetrievalConfig, ServerConfig,
};
pub use dataset::{load_dataset, load_dataset_best_effort, Dataset, DatasetReport, SkippedFile};
pub use embeddings::{CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{ConfigError, IngestError, PipelineError};
pub use local::LocalAnswerer;
pub use models::{
    AnswerResult, AnswerSource, Chunk, DatasetRecord, Degradation, Evidence, ExternalResult,
    IndexStats, Query, ScoredChunk,
};
pub use orchestrator::{Orchestrator, RunReport};
pub use providers::{ExtractiveGenerator, OpenAiCompatibleGenerator, WebSearchRetriever};
pub use scoring::{BlendedScorer, CosineScorer, RelevanceScorer, DEFAULT_LEXICAL_WEIGHT};
pub use state::{PipelineStage, StageTrace};
pub use store::DocumentStore;
pub use synthesis::{AnswerSynthesizer, GenerationRequest, Passage};
pub use traits::{FallbackRetriever, Generator};
