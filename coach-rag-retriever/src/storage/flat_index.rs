//! In-memory exact cosine index.
//!
//! Corpora here are a single book, a few hundred to a few thousand chunks, so
//! an exhaustive scan over contiguous `f32` vectors answers a query in well
//! under a millisecond and returns exact rather than approximate neighbours.

use super::{ChunkRecord, ScoredChunk, cosine_similarity};
use crate::error::StoreError;
use coach_rag_context::Chunk;

/// Immutable snapshot of an index table, ordered by chunk sequence.
#[derive(Debug, Clone, Default)]
pub struct FlatIndex {
    chunks: Vec<Chunk>,
    /// Row-major, `chunks.len() * dimension` values
    vectors: Vec<f32>,
    dimension: usize,
}

impl FlatIndex {
    /// Build from records that all share one dimension.
    pub fn new(mut records: Vec<ChunkRecord>) -> Result<Self, StoreError> {
        records.sort_by_key(|r| r.chunk.seq);
        let dimension = records.first().map(|r| r.vector.len()).unwrap_or(0);

        let mut chunks = Vec::with_capacity(records.len());
        let mut vectors = Vec::with_capacity(records.len() * dimension);
        for record in records {
            if record.vector.len() != dimension {
                return Err(StoreError::DimensionMismatch {
                    expected: dimension,
                    actual: record.vector.len(),
                });
            }
            vectors.extend_from_slice(&record.vector);
            chunks.push(record.chunk);
        }

        Ok(Self {
            chunks,
            vectors,
            dimension,
        })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    fn vector(&self, row: usize) -> &[f32] {
        &self.vectors[row * self.dimension..(row + 1) * self.dimension]
    }

    /// Top `limit` rows by cosine similarity, ties broken by sequence.
    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<ScoredChunk>, StoreError> {
        if self.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = (0..self.len())
            .map(|row| (row, cosine_similarity(query, self.vector(row))))
            .collect();

        // Rows are in sequence order, so the row index is the tie-break
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(row, score)| ScoredChunk {
                chunk: self.chunks[row].clone(),
                vector: self.vector(row).to_vec(),
                score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(seq: usize, vector: Vec<f32>) -> ChunkRecord {
        ChunkRecord::new(
            Chunk {
                id: Chunk::make_id("doc", 1, seq),
                seq,
                source: "doc".to_string(),
                page: 1,
                chapter: None,
                section: None,
                text: format!("chunk {seq}"),
            },
            vector,
        )
    }

    #[test]
    fn test_search_orders_by_score() {
        let index = FlatIndex::new(vec![
            record(1, vec![0.0, 1.0]),
            record(2, vec![1.0, 0.0]),
            record(3, vec![0.6, 0.8]),
        ])
        .unwrap();

        let hits = index.search(&[1.0, 0.0], 10).unwrap();
        let seqs: Vec<usize> = hits.iter().map(|h| h.chunk.seq).collect();
        assert_eq!(seqs, vec![2, 3, 1]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!((hits[1].score - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_ties_keep_sequence_order() {
        let index = FlatIndex::new(vec![
            record(3, vec![1.0, 0.0]),
            record(1, vec![1.0, 0.0]),
            record(2, vec![1.0, 0.0]),
        ])
        .unwrap();
        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        let seqs: Vec<usize> = hits.iter().map(|h| h.chunk.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn test_limit_edge_cases() {
        let index = FlatIndex::new(vec![record(1, vec![1.0]), record(2, vec![1.0])]).unwrap();
        assert_eq!(index.search(&[1.0], 50).unwrap().len(), 2);
        assert!(index.search(&[1.0], 0).unwrap().is_empty());
        assert!(FlatIndex::default().search(&[1.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_dimension_checks() {
        assert!(matches!(
            FlatIndex::new(vec![record(1, vec![1.0, 0.0]), record(2, vec![1.0])]),
            Err(StoreError::DimensionMismatch { .. })
        ));

        let index = FlatIndex::new(vec![record(1, vec![1.0, 0.0])]).unwrap();
        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], 1),
            Err(StoreError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }
}
