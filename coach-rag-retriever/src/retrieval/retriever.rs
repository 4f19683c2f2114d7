//! Query-time retrieval: embed, search, filter, dedupe, MMR.

use super::mmr::{dedupe, mmr_select};
use crate::error::RetrievalError;
use crate::storage::VectorStore;
use coach_rag_context::Chunk;
use coach_rag_embed::EmbeddingProvider;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Context snippets longer than this many characters are shortened.
pub const SNIPPET_MAX_CHARS: usize = 400;
/// Characters kept when a snippet is shortened.
pub const SNIPPET_KEEP_CHARS: usize = 380;

/// Retrieval defaults and tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalConfig {
    pub k: usize,
    pub min_score: f32,
    pub lambda: f32,
    /// Candidates fetched per requested result
    pub pool_multiplier: usize,
    /// Cosine similarity above which two candidates count as duplicates
    pub duplicate_threshold: f32,
    /// Budget for each of the metadata, embedding and search stages
    pub timeout: Duration,
    pub debug: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: 4,
            min_score: 0.25,
            lambda: 0.65,
            pool_multiplier: 8,
            duplicate_threshold: 0.97,
            timeout: Duration::from_millis(2000),
            debug: false,
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            k: self.k,
            min_score: self.min_score,
            lambda: self.lambda,
        }
    }
}

/// Per-call retrieval knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalParams {
    pub k: usize,
    pub min_score: f32,
    pub lambda: f32,
}

impl RetrievalParams {
    fn validate(&self) -> Result<(), RetrievalError> {
        if !(0.0..=1.0).contains(&self.lambda) {
            return Err(RetrievalError::invalid_request(format!(
                "lambda must be between 0 and 1, got {}",
                self.lambda
            )));
        }
        if !self.min_score.is_finite() {
            return Err(RetrievalError::invalid_request(format!(
                "min_score must be finite, got {}",
                self.min_score
            )));
        }
        Ok(())
    }
}

/// One selected chunk with its score and citation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedSnippet {
    #[serde(flatten)]
    pub chunk: Chunk,
    /// Cosine similarity to the query
    pub score: f32,
    /// 1-based MMR selection rank
    pub rank: usize,
    pub citation: String,
}

/// Human-readable location of a chunk, e.g. `chapter 3 page 12`.
pub fn citation(chunk: &Chunk) -> String {
    match &chunk.chapter {
        Some(chapter) => format!("chapter {} page {}", chapter, chunk.page),
        None => format!("page {}", chunk.page),
    }
}

/// `text` trimmed, and shortened with an ellipsis when it is long.
pub fn snippet(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= SNIPPET_MAX_CHARS {
        return text.to_string();
    }
    let kept: String = text.chars().take(SNIPPET_KEEP_CHARS).collect();
    format!("{} …", kept.trim_end())
}

/// Snippets in MMR selection order; empty when nothing was relevant.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub snippets: Vec<RetrievedSnippet>,
}

impl RetrievalResult {
    pub fn len(&self) -> usize {
        self.snippets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

    /// Sorted, distinct pages cited by the snippets.
    pub fn pages(&self) -> Vec<usize> {
        let mut pages: Vec<usize> = self.snippets.iter().map(|s| s.chunk.page).collect();
        pages.sort_unstable();
        pages.dedup();
        pages
    }

    /// One `- (citation) snippet` line per non-blank snippet, for prompting.
    pub fn context_lines(&self) -> Vec<String> {
        self.snippets
            .iter()
            .filter(|s| !s.chunk.text.trim().is_empty())
            .map(|s| format!("- ({}) {}", s.citation, snippet(&s.chunk.text)))
            .collect()
    }

    /// The context lines under a `RAG CONTEXT:` header, or an empty string.
    pub fn context_block(&self) -> String {
        let lines = self.context_lines();
        if lines.is_empty() {
            return String::new();
        }
        format!("RAG CONTEXT:\n{}", lines.join("\n"))
    }
}

/// Answers queries against one vector store with one embedding model.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    config: RetrievalConfig,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("model_id", &self.embedder.model_id())
            .field("table", &self.store.table())
            .field("config", &self.config)
            .finish()
    }
}

async fn with_timeout<T, E, F>(
    stage: &'static str,
    timeout: Duration,
    future: F,
) -> Result<T, RetrievalError>
where
    F: Future<Output = Result<T, E>>,
    RetrievalError: From<E>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(RetrievalError::Timeout { stage, timeout }),
    }
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieve with the configured defaults.
    pub async fn retrieve_default(&self, query: &str) -> Result<RetrievalResult, RetrievalError> {
        self.retrieve(query, &self.config.params()).await
    }

    /// Retrieve up to `params.k` relevant, mutually diverse chunks for `query`.
    pub async fn retrieve(
        &self,
        query: &str,
        params: &RetrievalParams,
    ) -> Result<RetrievalResult, RetrievalError> {
        params.validate()?;
        if query.trim().is_empty() {
            return Err(RetrievalError::invalid_request("query is empty"));
        }
        if params.k == 0 {
            return Ok(RetrievalResult::default());
        }

        let timeout = self.config.timeout;
        self.check_model(timeout).await?;

        let query_vector = with_timeout("embedding", timeout, self.embedder.embed(query)).await?;

        let pool_size = params.k.saturating_mul(self.config.pool_multiplier.max(1));
        let candidates =
            with_timeout("search", timeout, self.store.search(&query_vector, pool_size)).await?;
        let fetched = candidates.len();

        let relevant: Vec<_> = candidates
            .into_iter()
            .filter(|c| c.score >= params.min_score)
            .collect();
        let relevant_count = relevant.len();

        let unique = dedupe(relevant, self.config.duplicate_threshold);
        let order = mmr_select(&unique, params.k, params.lambda);

        let mut slots: Vec<Option<_>> = unique.into_iter().map(Some).collect();
        let snippets: Vec<RetrievedSnippet> = order
            .into_iter()
            .enumerate()
            .filter_map(|(rank, i)| {
                slots[i].take().map(|c| RetrievedSnippet {
                    citation: citation(&c.chunk),
                    chunk: c.chunk,
                    score: c.score,
                    rank: rank + 1,
                })
            })
            .collect();

        debug!(
            "Retrieval: fetched {} candidates (pool {}), {} above {:.2}, {} selected",
            fetched,
            pool_size,
            relevant_count,
            params.min_score,
            snippets.len()
        );
        if self.config.debug {
            info!("RAG query: {:?}", query);
            info!(
                "RAG stages: fetched={} relevant={} selected={}",
                fetched,
                relevant_count,
                snippets.len()
            );
            for s in &snippets {
                info!(
                    "RAG pick #{} {} score={:.3} ({})",
                    s.rank, s.chunk.id, s.score, s.citation
                );
            }
        }

        Ok(RetrievalResult { snippets })
    }

    async fn check_model(&self, timeout: Duration) -> Result<(), RetrievalError> {
        let Some(info) = with_timeout("metadata", timeout, self.store.info()).await? else {
            return Ok(());
        };
        if info.model_id != self.embedder.model_id() {
            return Err(RetrievalError::ModelMismatch {
                index_model: info.model_id,
                query_model: self.embedder.model_id().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ChunkRecord, RebuildMeta, SqliteVectorStore};
    use coach_rag_embed::HashEmbedProvider;
    use tracing_test::traced_test;

    fn chunk(seq: usize, page: usize, chapter: Option<&str>, text: &str) -> Chunk {
        Chunk {
            id: Chunk::make_id("book.txt", page, seq),
            seq,
            source: "book.txt".to_string(),
            page,
            chapter: chapter.map(String::from),
            section: None,
            text: text.to_string(),
        }
    }

    async fn build(texts: &[(usize, Option<&str>, &str)]) -> anyhow::Result<Retriever> {
        let embedder = Arc::new(HashEmbedProvider::new(512));
        let store = Arc::new(SqliteVectorStore::open_memory("chunks").await?);
        let records = texts
            .iter()
            .enumerate()
            .map(|(i, (page, chapter, text))| {
                ChunkRecord::new(chunk(i + 1, *page, *chapter, text), embedder.embed_one(text))
            })
            .collect();
        store
            .rebuild(
                records,
                RebuildMeta {
                    model_id: "hash-512".to_string(),
                    dimension: 512,
                    source: "book.txt".to_string(),
                    source_hash: "00".to_string(),
                },
            )
            .await?;
        Ok(Retriever::new(embedder, store, RetrievalConfig::default()))
    }

    #[test]
    fn test_citation_and_snippet() {
        assert_eq!(citation(&chunk(1, 12, Some("3"), "x")), "chapter 3 page 12");
        assert_eq!(citation(&chunk(1, 7, None, "x")), "page 7");

        assert_eq!(snippet("  short text "), "short text");
        let long = "word ".repeat(100);
        let cut = snippet(&long);
        assert!(cut.ends_with(" …"));
        assert_eq!(cut.chars().count(), "word ".repeat(76).trim_end().len() + 2);
    }

    #[test]
    fn test_result_helpers() {
        let result = RetrievalResult {
            snippets: vec![
                RetrievedSnippet {
                    chunk: chunk(1, 9, Some("2"), "Deload every fourth week."),
                    score: 0.8,
                    rank: 1,
                    citation: "chapter 2 page 9".to_string(),
                },
                RetrievedSnippet {
                    chunk: chunk(2, 4, None, "Sleep matters."),
                    score: 0.6,
                    rank: 2,
                    citation: "page 4".to_string(),
                },
                RetrievedSnippet {
                    chunk: chunk(3, 9, Some("2"), "More on deloads."),
                    score: 0.5,
                    rank: 3,
                    citation: "chapter 2 page 9".to_string(),
                },
            ],
        };
        assert_eq!(result.pages(), vec![4, 9]);
        assert_eq!(
            result.context_lines()[0],
            "- (chapter 2 page 9) Deload every fourth week."
        );
        assert!(result.context_block().starts_with("RAG CONTEXT:\n- (chapter 2"));
        assert_eq!(RetrievalResult::default().context_block(), "");
    }

    #[tokio::test]
    async fn test_retrieve_ranks_relevant_chunk_first() -> anyhow::Result<()> {
        let retriever = build(&[
            (1, None, "Sleep hygiene and caffeine timing for recovery"),
            (2, Some("3"), "Progressive overload means adding load or reps over time"),
            (3, None, "Mobility drills for the hips and ankles"),
        ])
        .await?;

        let result = retriever
            .retrieve(
                "progressive overload",
                &RetrievalParams {
                    k: 2,
                    min_score: 0.0,
                    lambda: 0.65,
                },
            )
            .await?;
        assert!(!result.is_empty());
        let top = &result.snippets[0];
        assert_eq!(top.rank, 1);
        assert_eq!(top.chunk.chapter.as_deref(), Some("3"));
        assert_eq!(top.citation, "chapter 3 page 2");
        assert!(result.len() <= 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_near_duplicates_do_not_crowd_out_diversity() -> anyhow::Result<()> {
        let retriever = build(&[
            (1, None, "Deload every fourth week to shed accumulated fatigue"),
            (2, None, "Deload every fourth week, to shed accumulated fatigue!"),
            (3, None, "Tempo runs build aerobic capacity"),
        ])
        .await?;

        for lambda in [1.0, 0.65] {
            let result = retriever
                .retrieve(
                    "deload fatigue week",
                    &RetrievalParams {
                        k: 2,
                        min_score: -1.0,
                        lambda,
                    },
                )
                .await?;
            assert_eq!(result.len(), 2, "lambda {lambda}");
            assert!(result.snippets[0].chunk.text.starts_with("Deload"));
            assert_eq!(result.snippets[1].chunk.page, 3, "lambda {lambda}");
        }
        Ok(())
    }

    #[traced_test]
    #[tokio::test]
    async fn test_debug_logs_each_pick() -> anyhow::Result<()> {
        let base = build(&[
            (1, None, "Deload weeks reduce accumulated fatigue"),
            (2, None, "Tempo runs build aerobic capacity"),
        ])
        .await?;
        let retriever = Retriever::new(
            Arc::clone(&base.embedder),
            Arc::clone(&base.store),
            RetrievalConfig {
                debug: true,
                min_score: -1.0,
                ..RetrievalConfig::default()
            },
        );

        let result = retriever.retrieve_default("deload fatigue").await?;
        assert_eq!(result.len(), 2);
        assert!(logs_contain("RAG stages: fetched=2 relevant=2 selected=2"));
        assert!(logs_contain("RAG pick #1 book.txt:p1:c1"));
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_requests() -> anyhow::Result<()> {
        let retriever = build(&[(1, None, "anything at all")]).await?;
        let params = retriever.config().params();

        let bad_lambda = RetrievalParams {
            lambda: 1.5,
            ..params
        };
        let bad_score = RetrievalParams {
            min_score: f32::NAN,
            ..params
        };
        assert!(matches!(
            retriever.retrieve("q", &bad_lambda).await,
            Err(RetrievalError::InvalidRequest { .. })
        ));
        assert!(matches!(
            retriever.retrieve("q", &bad_score).await,
            Err(RetrievalError::InvalidRequest { .. })
        ));
        assert!(matches!(
            retriever.retrieve("   ", &params).await,
            Err(RetrievalError::InvalidRequest { .. })
        ));

        let zero = RetrievalParams { k: 0, ..params };
        assert!(retriever.retrieve("anything", &zero).await?.is_empty());
        Ok(())
    }

    struct SlowEmbedder(HashEmbedProvider);

    #[async_trait::async_trait]
    impl EmbeddingProvider for SlowEmbedder {
        async fn embed_batch(
            &self,
            texts: &[String],
        ) -> coach_rag_embed::Result<coach_rag_embed::EmbeddingResult> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            self.0.embed_batch(texts).await
        }

        fn embedding_dimension(&self) -> usize {
            self.0.embedding_dimension()
        }

        fn provider_name(&self) -> &str {
            "slow"
        }

        fn model_id(&self) -> &str {
            self.0.model_id()
        }
    }

    #[tokio::test]
    async fn test_slow_embedding_times_out() -> anyhow::Result<()> {
        let base = build(&[(1, None, "anything at all")]).await?;
        let retriever = Retriever::new(
            Arc::new(SlowEmbedder(HashEmbedProvider::new(512))),
            Arc::clone(&base.store),
            RetrievalConfig {
                timeout: Duration::from_millis(20),
                ..RetrievalConfig::default()
            },
        );

        let err = retriever.retrieve_default("anything").await.unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::Timeout {
                stage: "embedding",
                ..
            }
        ));
        Ok(())
    }

    /// Delegates to an inner store but takes seconds to read metadata.
    struct SlowMetadataStore(Arc<dyn VectorStore>);

    #[async_trait::async_trait]
    impl VectorStore for SlowMetadataStore {
        fn table(&self) -> &str {
            self.0.table()
        }

        async fn rebuild(
            &self,
            records: Vec<ChunkRecord>,
            meta: RebuildMeta,
        ) -> Result<crate::storage::IndexInfo, crate::error::StoreError> {
            self.0.rebuild(records, meta).await
        }

        async fn search(
            &self,
            query: &[f32],
            limit: usize,
        ) -> Result<Vec<crate::storage::ScoredChunk>, crate::error::StoreError> {
            self.0.search(query, limit).await
        }

        async fn info(
            &self,
        ) -> Result<Option<crate::storage::IndexInfo>, crate::error::StoreError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            self.0.info().await
        }

        async fn row_count(&self) -> Result<Option<usize>, crate::error::StoreError> {
            self.0.row_count().await
        }

        async fn sample(&self, n: usize) -> Result<Vec<Chunk>, crate::error::StoreError> {
            self.0.sample(n).await
        }
    }

    #[tokio::test]
    async fn test_slow_metadata_read_times_out() -> anyhow::Result<()> {
        let base = build(&[(1, None, "anything at all")]).await?;
        let retriever = Retriever::new(
            Arc::clone(&base.embedder),
            Arc::new(SlowMetadataStore(Arc::clone(&base.store))),
            RetrievalConfig {
                timeout: Duration::from_millis(50),
                ..RetrievalConfig::default()
            },
        );

        let started = std::time::Instant::now();
        let err = retriever.retrieve_default("anything").await.unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::Timeout {
                stage: "metadata",
                ..
            }
        ));
        assert!(started.elapsed() < Duration::from_secs(2));
        Ok(())
    }

    #[tokio::test]
    async fn test_model_mismatch_is_reported() -> anyhow::Result<()> {
        let retriever = build(&[(1, None, "anything at all")]).await?;
        let other = Retriever::new(
            Arc::new(HashEmbedProvider::new(64)),
            Arc::clone(&retriever.store),
            RetrievalConfig::default(),
        );
        let err = other.retrieve_default("anything").await.unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::ModelMismatch { ref index_model, ref query_model }
                if index_model == "hash-512" && query_model == "hash-64"
        ));
        Ok(())
    }
}
