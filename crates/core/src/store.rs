use crate::chunking::build_chunks;
use crate::dataset::Dataset;
use crate::embeddings::Embedder;
use crate::error::PipelineError;
use crate::models::{Chunk, IndexStats, Query};
use crate::scoring::cosine_similarity;
use chrono::Utc;
use std::cmp::Ordering;
use std::sync::Arc;

/// In-memory chunk index over the local dataset.
///
/// Indexing takes `&mut self`; once the store is wrapped in an `Arc` and
/// handed to the orchestrator it can only be read, so the chunk set cannot
/// change underneath a running request.
pub struct DocumentStore {
    embedder: Arc<dyn Embedder>,
    index: Option<Index>,
}

struct Index {
    chunks: Vec<Arc<Chunk>>,
    stats: IndexStats,
}

impl DocumentStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            index: None,
        }
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// Builds (or rebuilds) the index from a dataset snapshot.
    pub fn index(&mut self, dataset: &Dataset) -> IndexStats {
        let chunks = build_chunks(&dataset.records, self.embedder.as_ref())
            .into_iter()
            .map(Arc::new)
            .collect::<Vec<_>>();

        if chunks.is_empty() {
            tracing::warn!("dataset produced no chunks; every query will use the fallback");
        }

        let stats = IndexStats {
            chunk_count: chunks.len(),
            checksum: dataset.checksum.clone(),
            indexed_at: Utc::now(),
        };
        tracing::info!(
            chunk_count = stats.chunk_count,
            checksum = %stats.checksum,
            dimensions = self.embedder.dimensions(),
            "document index ready"
        );

        self.index = Some(Index {
            chunks,
            stats: stats.clone(),
        });
        stats
    }

    pub fn is_ready(&self) -> bool {
        self.index.is_some()
    }

    pub fn stats(&self) -> Option<&IndexStats> {
        self.index.as_ref().map(|index| &index.stats)
    }

    pub fn len(&self) -> usize {
        self.index.as_ref().map_or(0, |index| index.chunks.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn query(&self, raw_text: &str) -> Result<Query, PipelineError> {
        Query::new(raw_text, self.embedder.as_ref())
    }

    /// Top-`k` chunks by cosine similarity, ties broken by dataset order.
    pub fn retrieve(&self, query: &Query, k: usize) -> Result<Vec<Arc<Chunk>>, PipelineError> {
        let index = self.index.as_ref().ok_or(PipelineError::IndexUnavailable)?;

        let mut ranked = index
            .chunks
            .iter()
            .map(|chunk| (cosine_similarity(&query.embedding, &chunk.embedding), chunk))
            .collect::<Vec<_>>();

        ranked.sort_by(|left, right| {
            right
                .0
                .partial_cmp(&left.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| left.1.ordinal.cmp(&right.1.ordinal))
        });

        Ok(ranked
            .into_iter()
            .take(k)
            .map(|(_, chunk)| Arc::clone(chunk))
            .collect())
    }

    /// Drops the index; the store reports `IndexUnavailable` afterwards.
    pub fn shutdown(&mut self) {
        if let Some(index) = self.index.take() {
            tracing::info!(chunk_count = index.chunks.len(), "document index released");
        }
    }
}
