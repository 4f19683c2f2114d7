//! Offline ingestion: document file to a rebuilt vector index.
//!
//! ```text
//! read bytes → blake3 → Document (PDF or text) → Chunker → batched embedding → VectorStore::rebuild
//! ```
//!
//! Every failure happens before the rebuild transaction commits, so a failed
//! run leaves the previous index in place.

use crate::error::IngestionError;
use crate::storage::{ChunkRecord, RebuildMeta, VectorStore};
use coach_rag_context::{Chunk, ChunkError, Chunker, Document, DocumentFormat};
use coach_rag_embed::EmbeddingProvider;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Outcome of one ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionSummary {
    /// Rows in the index after the run
    pub chunk_count: usize,
    pub duration: Duration,
    /// True when the index was already populated and left alone
    pub skipped: bool,
    /// Hex blake3 hash of the document, empty when skipped
    pub source_hash: String,
}

/// Chunks, embeds and indexes documents.
#[derive(Clone)]
pub struct IngestionPipeline {
    chunker: Arc<Chunker>,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    batch_size: usize,
    workers: usize,
}

impl std::fmt::Debug for IngestionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionPipeline")
            .field("chunker", &self.chunker)
            .field("model_id", &self.embedder.model_id())
            .field("table", &self.store.table())
            .field("batch_size", &self.batch_size)
            .field("workers", &self.workers)
            .finish()
    }
}

impl IngestionPipeline {
    pub fn new(
        chunker: Chunker,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            chunker: Arc::new(chunker),
            embedder,
            store,
            batch_size: 32,
            workers: 2,
        }
    }

    /// Texts per embedding call; zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Embedding calls in flight at once; zero is treated as one.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Index the document at `path` under `source_id`.
    ///
    /// Without `force`, an already populated index is left alone and the run
    /// reports `skipped`.
    pub async fn run(
        &self,
        path: &Path,
        source_id: &str,
        force: bool,
    ) -> Result<IngestionSummary, IngestionError> {
        let started = Instant::now();

        if !force {
            if let Some(count) = self.store.row_count().await?.filter(|n| *n > 0) {
                info!(
                    "Table '{}' already holds {} chunks; skipping ingestion",
                    self.store.table(),
                    count
                );
                return Ok(IngestionSummary {
                    chunk_count: count,
                    duration: started.elapsed(),
                    skipped: true,
                    source_hash: String::new(),
                });
            }
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| IngestionError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let source_hash = hex::encode(blake3::hash(&bytes).as_bytes());
        info!(
            "Ingesting {} ({} bytes, blake3 {})",
            path.display(),
            bytes.len(),
            &source_hash[..12]
        );

        let chunker = Arc::clone(&self.chunker);
        let source = source_id.to_string();
        let format = DocumentFormat::from_path(path);
        let chunked = tokio::task::spawn_blocking(move || -> Result<_, IngestionError> {
            let document = Document::parse(&bytes, format)?;
            debug!("Document has {} pages ({:?})", document.page_count(), format);
            Ok(chunker.chunk_document(&document, &source))
        })
        .await??;

        let chunks = match chunked {
            Ok(chunks) if !chunks.is_empty() => chunks,
            Ok(_) | Err(ChunkError::EmptyDocument) => {
                return Err(IngestionError::EmptyDocument {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        info!("Chunked {} into {} chunks", source_id, chunks.len());

        let vectors = self.embed_all(&chunks).await?;
        if vectors.len() != chunks.len() {
            return Err(IngestionError::CountMismatch {
                expected: chunks.len(),
                actual: vectors.len(),
            });
        }

        let records: Vec<ChunkRecord> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| ChunkRecord::new(chunk, vector))
            .collect();
        let meta = RebuildMeta {
            model_id: self.embedder.model_id().to_string(),
            dimension: self.embedder.embedding_dimension(),
            source: source_id.to_string(),
            source_hash: source_hash.clone(),
        };
        let index = self.store.rebuild(records, meta).await?;

        let summary = IngestionSummary {
            chunk_count: index.chunk_count,
            duration: started.elapsed(),
            skipped: false,
            source_hash,
        };
        info!(
            "Indexed {} chunks into '{}' in {:.2?}",
            summary.chunk_count,
            self.store.table(),
            summary.duration
        );
        Ok(summary)
    }

    /// Embed chunk texts in batches, keeping input order.
    async fn embed_all(
        &self,
        chunks: &[Chunk],
    ) -> Result<Vec<Vec<f32>>, IngestionError> {
        let batches: Vec<Vec<String>> = chunks
            .chunks(self.batch_size)
            .map(|batch| batch.iter().map(|c| c.text.clone()).collect())
            .collect();
        let total = batches.len();

        let results: Vec<Vec<Vec<f32>>> = stream::iter(batches.into_iter().enumerate())
            .map(|(i, texts)| {
                let embedder = Arc::clone(&self.embedder);
                async move {
                    let result = embedder.embed_batch(&texts).await?;
                    if result.len() != texts.len() {
                        return Err(IngestionError::CountMismatch {
                            expected: texts.len(),
                            actual: result.len(),
                        });
                    }
                    debug!("Embedded batch {}/{}", i + 1, total);
                    Ok(result.embeddings)
                }
            })
            .buffered(self.workers)
            .try_collect()
            .await?;

        Ok(results.into_iter().flatten().collect())
    }
}
