//! # coach-rag-embed
//!
//! Text embeddings for retrieval, behind one async trait.
//!
//! Ingestion and querying must embed with the same model, so everything that
//! needs vectors goes through an [`EmbeddingProvider`] built by
//! [`create_provider`] from a single [`EmbedConfig`].
//!
//! ## Providers
//!
//! - [`FastEmbedProvider`]: local ONNX sentence-embedding models via fastembed
//!   (default `BAAI/bge-small-en-v1.5`). Model files are downloaded on first
//!   use into the configured cache directory.
//! - [`HashEmbedProvider`]: deterministic feature hashing, selected with the
//!   model id `hash` or `hash-<dimension>`. Needs no model files.
//!
//! All providers return L2-normalized `f32` vectors, so a dot product is a
//! cosine similarity.
//!
//! ## Quick Start
//!
//! ```no_run
//! use coach_rag_embed::{EmbedConfig, create_provider};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let provider = create_provider(&EmbedConfig::default()).await?;
//! let vector = provider.embed("how does progressive overload work").await?;
//! assert_eq!(vector.len(), provider.embedding_dimension());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod hashing;
pub mod provider;

// Re-export main types for easy access
pub use config::{DEFAULT_MODEL_ID, EmbedConfig, ModelBackend};
pub use error::{EmbedError, Result};
pub use hashing::HashEmbedProvider;
pub use provider::{EmbeddingProvider, EmbeddingResult, FastEmbedProvider, l2_normalize};

use std::sync::Arc;

/// Build the provider selected by `config.model_id`.
pub async fn create_provider(config: &EmbedConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    config.validate()?;
    match config.backend()? {
        ModelBackend::Hash { dimension } => {
            tracing::info!("Using hashing embedder with dimension {}", dimension);
            Ok(Arc::new(HashEmbedProvider::new(dimension)))
        }
        ModelBackend::FastEmbed => Ok(Arc::new(FastEmbedProvider::create(config.clone()).await?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_hash_provider() -> Result<()> {
        let provider = create_provider(&EmbedConfig::hashing(48)).await?;
        assert_eq!(provider.provider_name(), "hash");
        assert_eq!(provider.embedding_dimension(), 48);
        assert_eq!(provider.model_id(), "hash-48");
        Ok(())
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_model() {
        let result = create_provider(&EmbedConfig::new("acme/not-a-model")).await;
        assert!(matches!(result, Err(EmbedError::UnknownModel { .. })));
    }
}
