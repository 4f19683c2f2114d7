//! Storage abstraction for the persisted vector index.
//!
//! The index holds one table of chunk records per corpus. Retrieval and
//! ingestion only see the [`VectorStore`] trait; [`sqlite_store`] provides the
//! SQLite-backed implementation and [`flat_index`] the in-memory cosine index
//! it searches with.
//!
//! ## Architecture
//!
//! ```text
//! IngestionPipeline ── rebuild ─┐
//!                               ├─ VectorStore ── SqliteVectorStore ── FlatIndex snapshot
//! Retriever ────────── search ──┘
//! ```

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coach_rag_context::Chunk;
use serde::Serialize;

pub mod flat_index;
pub mod sqlite_store;

pub use flat_index::FlatIndex;
pub use sqlite_store::{SqliteVectorStore, StoreConfig};

/// Similarity metric recorded in the index metadata.
pub const METRIC_COSINE: &str = "cosine";

/// A chunk together with its embedding, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkRecord {
    #[serde(flatten)]
    pub chunk: Chunk,
    #[serde(skip)]
    pub vector: Vec<f32>,
}

impl ChunkRecord {
    pub fn new(chunk: Chunk, vector: Vec<f32>) -> Self {
        Self { chunk, vector }
    }
}

/// A search hit: a chunk, its vector and its cosine score against the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    #[serde(skip)]
    pub vector: Vec<f32>,
    pub score: f32,
}

/// Facts about how the current index was built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildMeta {
    pub model_id: String,
    pub dimension: usize,
    pub source: String,
    /// Hex blake3 hash of the source document bytes
    pub source_hash: String,
}

/// Metadata stored next to an index table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexInfo {
    pub table: String,
    pub model_id: String,
    pub dimension: usize,
    pub metric: String,
    pub chunk_count: usize,
    pub source: String,
    pub source_hash: String,
    pub built_at: DateTime<Utc>,
}

/// Persisted chunk index with cosine search.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Name of the table this store reads and writes
    fn table(&self) -> &str;

    /// Replace every row of the table with `records`.
    ///
    /// Either the new table is fully in place when this returns `Ok`, or the
    /// previous table is left untouched.
    async fn rebuild(
        &self,
        records: Vec<ChunkRecord>,
        meta: RebuildMeta,
    ) -> Result<IndexInfo, StoreError>;

    /// Up to `limit` rows by descending cosine similarity to `query`.
    ///
    /// Fails with [`StoreError::NotReady`] when the table was never built; an
    /// empty table yields an empty result.
    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<ScoredChunk>, StoreError>;

    /// Metadata of the last rebuild, if any
    async fn info(&self) -> Result<Option<IndexInfo>, StoreError>;

    /// Number of rows, or `None` when the table does not exist
    async fn row_count(&self) -> Result<Option<usize>, StoreError>;

    /// Up to `n` rows spread evenly over the table, in sequence order
    async fn sample(&self, n: usize) -> Result<Vec<Chunk>, StoreError>;

    /// Whether the table exists and holds at least one row
    async fn is_populated(&self) -> Result<bool, StoreError> {
        Ok(self.row_count().await?.is_some_and(|n| n > 0))
    }
}

/// Cosine similarity of two vectors; 0 when either has zero length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = [1.0, 0.0, 0.0];
        let b = [1.0, 0.0, 0.0];
        let c = [0.0, 1.0, 0.0];
        let d = [-1.0, 0.0, 0.0];

        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &c).abs() < 1e-6);
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[3.0, 4.0], &[6.0, 8.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }
}
