//! Error types for indexing, retrieval and ingestion.
//!
//! Library code returns these typed errors; the binary and tests wrap them in
//! `anyhow` at the edges.

use coach_rag_context::{ChunkError, DocumentError};
use coach_rag_embed::EmbedError;
use std::path::PathBuf;
use std::time::Duration;

/// Failures of the persisted vector index.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The index table has never been built
    #[error("Index table '{table}' has not been built yet")]
    NotReady { table: String },

    #[error("Invalid table name '{name}': use letters, digits and underscores")]
    InvalidTableName { name: String },

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Chunk '{id}' has an empty vector")]
    EmptyVector { id: String },

    /// A stored row could not be decoded
    #[error("Corrupt row '{id}': {message}")]
    Corrupt { id: String, message: String },

    #[error("Database error: {source}")]
    Database {
        #[from]
        source: sqlx::Error,
    },

    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Async task join errors
    #[error("Async task failed: {source}")]
    Task {
        #[from]
        source: tokio::task::JoinError,
    },
}

/// Failures of a live retrieval call.
///
/// None of these mean "the document has nothing relevant"; that case is an
/// empty result, not an error.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// Querying before the index was built
    #[error("Index table '{table}' has not been built yet; run ingestion first")]
    StoreNotReady { table: String },

    #[error("Invalid retrieval request: {message}")]
    InvalidRequest { message: String },

    #[error("Query embedding failed: {source}")]
    Embedding {
        #[source]
        source: EmbedError,
    },

    #[error("Index search failed: {source}")]
    Search {
        #[source]
        source: StoreError,
    },

    #[error("Retrieval {stage} timed out after {timeout:?}")]
    Timeout {
        stage: &'static str,
        timeout: Duration,
    },

    /// The index was built with a different embedding model than the query
    #[error("Index was built with model '{index_model}' but queries use '{query_model}'")]
    ModelMismatch {
        index_model: String,
        query_model: String,
    },
}

impl RetrievalError {
    pub fn invalid_request<S: Into<String>>(message: S) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn is_store_not_ready(&self) -> bool {
        matches!(self, Self::StoreNotReady { .. })
    }
}

impl From<StoreError> for RetrievalError {
    fn from(source: StoreError) -> Self {
        match source {
            StoreError::NotReady { table } => Self::StoreNotReady { table },
            source => Self::Search { source },
        }
    }
}

impl From<EmbedError> for RetrievalError {
    fn from(source: EmbedError) -> Self {
        Self::Embedding { source }
    }
}

/// Failures of an ingestion run. Any of these leaves the prior index untouched.
#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error("Failed to read document {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load document: {source}")]
    Document {
        #[from]
        source: DocumentError,
    },

    /// The document produced no chunks at all
    #[error("Document {} yielded no chunks", path.display())]
    EmptyDocument { path: PathBuf },

    #[error("Chunking failed: {source}")]
    Chunking {
        #[from]
        source: ChunkError,
    },

    #[error("Embedding failed: {source}")]
    Embedding {
        #[from]
        source: EmbedError,
    },

    #[error("Index rebuild failed: {source}")]
    Rebuild {
        #[from]
        source: StoreError,
    },

    #[error("Expected {expected} embeddings, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Ingestion task failed: {source}")]
    Task {
        #[from]
        source: tokio::task::JoinError,
    },
}

/// A configuration value that could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid(key: &str, value: impl ToString, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}
