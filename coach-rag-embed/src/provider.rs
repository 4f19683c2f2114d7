//! Embedding provider implementations

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Arc, Mutex};

/// Result of embedding generation
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text
    pub embeddings: Vec<Vec<f32>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a new embedding result.
    ///
    /// The dimension is inferred from the first vector and is 0 when there
    /// are no vectors.
    pub fn new(embeddings: Vec<Vec<f32>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    /// Returns the number of embedding vectors in this result.
    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    /// Returns `true` if this result contains no embedding vectors.
    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Scale `vector` to unit L2 norm in place. All-zero vectors are left alone.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Trait for embedding providers that can generate embeddings from text.
///
/// Every vector returned is L2-normalized and has
/// [`EmbeddingProvider::embedding_dimension`] entries, so the dot product of
/// two outputs is their cosine similarity. Ingestion and querying must use the
/// same provider and model for scores to mean anything.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate the embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let result = self.embed_batch(&[text.to_string()]).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or(EmbedError::CountMismatch {
                expected: 1,
                actual: 0,
            })
    }

    /// Generate embeddings for multiple texts, in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Get the dimension of embeddings produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;

    /// Identifier of the model, recorded alongside persisted vectors
    fn model_id(&self) -> &str;
}

/// Find the fastembed model for a configured model id.
///
/// Accepts fastembed's own model codes (`Xenova/bge-small-en-v1.5`), the
/// upstream repository names they mirror (`BAAI/bge-small-en-v1.5`) and bare
/// model names (`bge-small-en-v1.5`), all case-insensitively.
pub fn resolve_model(model_id: &str) -> Result<(EmbeddingModel, usize)> {
    let wanted = model_id.trim().to_lowercase();
    let wanted_name = wanted.rsplit('/').next().unwrap_or(&wanted).to_string();
    let models = TextEmbedding::list_supported_models();

    let exact = models
        .iter()
        .find(|info| info.model_code.to_lowercase() == wanted);
    let by_name = || {
        models.iter().find(|info| {
            let code = info.model_code.to_lowercase();
            code.rsplit('/').next() == Some(wanted_name.as_str())
        })
    };

    exact
        .or_else(by_name)
        .map(|info| (info.model.clone(), info.dim))
        .ok_or_else(|| EmbedError::UnknownModel {
            model_id: model_id.to_string(),
        })
}

/// FastEmbed-based embedding provider using local ONNX models.
///
/// Each provider owns its model session. Inference runs on the blocking
/// thread pool, one batch at a time.
#[derive(Clone)]
pub struct FastEmbedProvider {
    config: EmbedConfig,
    model: Arc<Mutex<TextEmbedding>>,
    dimension: usize,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("config", &self.config)
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastEmbedProvider {
    /// Download (if needed) and load the configured model.
    pub async fn create(config: EmbedConfig) -> Result<Self> {
        config.validate()?;
        let (model_kind, expected_dimension) = resolve_model(&config.model_id)?;

        tracing::info!(
            "Initializing FastEmbed provider for model: {}",
            config.model_id
        );
        tokio::fs::create_dir_all(&config.cache_dir).await?;

        let load_config = config.clone();
        let (model, dimension) =
            tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
                tracing::info!("Loading embedding model: {}", load_config.model_id);

                let init_options = InitOptions::new(model_kind)
                    .with_cache_dir(load_config.cache_dir.clone())
                    .with_show_download_progress(load_config.show_download_progress);

                let mut model =
                    TextEmbedding::try_new(init_options).map_err(EmbedError::model_init)?;

                // Confirm the dimension with a real embedding
                let test_embeddings = model
                    .embed(vec!["test".to_string()], None)
                    .map_err(EmbedError::model_init)?;
                let dimension = test_embeddings
                    .first()
                    .map(|emb| emb.len())
                    .unwrap_or(expected_dimension);

                tracing::info!("Model loaded successfully. Dimension: {}", dimension);
                Ok((model, dimension))
            })
            .await??;

        if dimension == 0 {
            return Err(EmbedError::invalid_config(
                "Model validation failed: empty embedding",
            ));
        }

        Ok(Self {
            config,
            model: Arc::new(Mutex::new(model)),
            dimension,
        })
    }

    pub fn config(&self) -> &EmbedConfig {
        &self.config
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        tracing::debug!("Generating embeddings for {} texts", texts.len());

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.config.batch_size.max(1)) {
            let chunk = chunk.to_vec();
            let model = Arc::clone(&self.model);

            let batch_embeddings = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                tracing::debug!("Processing batch of {} texts", chunk.len());

                let mut model_guard = model.lock().unwrap_or_else(|e| e.into_inner());
                model_guard
                    .embed(chunk, None)
                    .map_err(EmbedError::embedding_gen)
            })
            .await??;

            for mut embedding in batch_embeddings {
                if embedding.iter().any(|v| !v.is_finite()) {
                    return Err(EmbedError::invalid_config(
                        "model produced non-finite values",
                    ));
                }
                l2_normalize(&mut embedding);
                all_embeddings.push(embedding);
            }
        }

        if all_embeddings.len() != texts.len() {
            return Err(EmbedError::CountMismatch {
                expected: texts.len(),
                actual: all_embeddings.len(),
            });
        }

        tracing::debug!("Generated {} embeddings", all_embeddings.len());
        Ok(EmbeddingResult::new(all_embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }

    fn model_id(&self) -> &str {
        &self.config.model_id
    }
}
