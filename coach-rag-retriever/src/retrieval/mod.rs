//! Query-time retrieval and offline ingestion.
//!
//! - [`retriever`]: embeds a query, searches the index and selects diverse
//!   snippets with [`mmr`].
//! - [`ingest`]: chunks, embeds and indexes a document.

pub mod ingest;
pub mod mmr;
pub mod retriever;

pub use ingest::{IngestionPipeline, IngestionSummary};
pub use retriever::{
    RetrievalConfig, RetrievalParams, RetrievalResult, RetrievedSnippet, Retriever,
};
