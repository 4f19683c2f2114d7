//! Configuration for embedding models

use crate::error::{EmbedError, Result};
use derive_builder::Builder;
use std::path::{Path, PathBuf};

/// Model used when nothing else is configured.
pub const DEFAULT_MODEL_ID: &str = "BAAI/bge-small-en-v1.5";

/// Dimension of the hashing embedder when the id is just `hash`.
pub const DEFAULT_HASH_DIMENSION: usize = 384;

/// Which implementation a model id selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelBackend {
    /// Local ONNX model run through fastembed
    FastEmbed,
    /// Deterministic feature hashing, no model files
    Hash { dimension: usize },
}

/// Configuration for embedding models
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
#[builder(setter(into))]
pub struct EmbedConfig {
    /// Model identifier, e.g. `BAAI/bge-small-en-v1.5` or `hash-256`
    #[builder(default = "DEFAULT_MODEL_ID.to_string()")]
    pub model_id: String,
    /// Directory where downloaded model files are cached
    #[builder(default = r#"PathBuf::from("data/models")"#)]
    pub cache_dir: PathBuf,
    /// Maximum batch size for embedding generation
    #[builder(default = "32")]
    pub batch_size: usize,
    /// Show a progress bar while model files download
    #[builder(default = "false")]
    pub show_download_progress: bool,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            cache_dir: PathBuf::from("data/models"),
            batch_size: 32,
            show_download_progress: false,
        }
    }
}

impl EmbedConfig {
    /// Create a new embedding configuration using the builder
    pub fn builder() -> EmbedConfigBuilder {
        EmbedConfigBuilder::default()
    }

    /// Configuration for `model_id` with default settings otherwise
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            ..Self::default()
        }
    }

    /// Configuration for the hashing embedder with the given dimension
    pub fn hashing(dimension: usize) -> Self {
        Self::new(format!("hash-{dimension}"))
    }

    /// Set the model cache directory (builder style)
    pub fn with_cache_dir<P: AsRef<Path>>(self, cache_dir: P) -> Self {
        Self {
            cache_dir: cache_dir.as_ref().to_path_buf(),
            ..self
        }
    }

    /// Set the batch size for embedding generation (builder style)
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    /// Set download progress display (builder style)
    pub fn with_show_download_progress(self, show_download_progress: bool) -> Self {
        Self {
            show_download_progress,
            ..self
        }
    }

    /// Work out which backend the model id refers to.
    pub fn backend(&self) -> Result<ModelBackend> {
        let id = self.model_id.trim();
        if id.eq_ignore_ascii_case("hash") {
            return Ok(ModelBackend::Hash {
                dimension: DEFAULT_HASH_DIMENSION,
            });
        }
        if let Some(dim) = id.strip_prefix("hash-") {
            let dimension = dim.parse::<usize>().map_err(|_| {
                EmbedError::invalid_config(format!("invalid hash embedder dimension: {dim}"))
            })?;
            if dimension == 0 {
                return Err(EmbedError::invalid_config(
                    "hash embedder dimension must be positive",
                ));
            }
            return Ok(ModelBackend::Hash { dimension });
        }
        Ok(ModelBackend::FastEmbed)
    }

    /// Validate settings that do not need the model itself
    pub fn validate(&self) -> Result<()> {
        if self.model_id.trim().is_empty() {
            tracing::error!("Embedding model id is empty");
            return Err(EmbedError::invalid_config("model id must not be empty"));
        }
        if self.batch_size == 0 {
            tracing::error!("Embedding batch size is zero");
            return Err(EmbedError::invalid_config("batch_size must be positive"));
        }
        self.backend()?;

        tracing::debug!("Embedding configuration valid for: {}", self.model_id);
        Ok(())
    }
}
