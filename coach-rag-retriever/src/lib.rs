//! coach-rag-retriever: grounding context for a coaching assistant
//!
//! Indexes one source document (a training book) into a SQLite-backed vector
//! index and answers per-turn queries with a small set of relevant, mutually
//! diverse snippets that carry chapter and page citations.
//!
//! ## Key Modules
//!
//! - **[`retrieval`]**: the [`Retriever`](retrieval::Retriever) with MMR
//!   re-ranking and the [`IngestionPipeline`](retrieval::IngestionPipeline)
//! - **[`storage`]**: the [`VectorStore`](storage::VectorStore) trait and its
//!   SQLite implementation
//! - **[`config`]**: environment configuration and logging setup
//! - **[`error`]**: typed errors for every stage
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use coach_rag_retriever::config::RagConfig;
//! use coach_rag_retriever::retrieval::Retriever;
//! use coach_rag_retriever::storage::SqliteVectorStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = RagConfig::from_env()?;
//! let embedder = coach_rag_embed::create_provider(&config.embed_config()).await?;
//! let store = Arc::new(SqliteVectorStore::open(&config.store_config()).await?);
//! let retriever = Retriever::new(embedder, store, config.retrieval_config());
//!
//! let result = retriever.retrieve_default("how does progressive overload work").await?;
//! println!("{}", result.context_block());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Document → Chunker → Embedder → VectorStore::rebuild          (ingestion)
//! Query → Embedder → VectorStore::search → filter → dedupe → MMR (retrieval)
//! ```

pub mod config;
pub mod error;
pub mod retrieval;
pub mod storage;
