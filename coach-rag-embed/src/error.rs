//! Error types for the embedding system

/// Result type for embedding operations.
///
/// This is a convenience type alias that uses [`EmbedError`] as the error type.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Error type for all embedding operations.
///
/// Covers configuration problems (unknown model ids, bad settings), failures
/// while loading a model, and failures during inference. Underlying causes are
/// kept as error sources so callers can walk the chain.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// The configured model id does not name any supported model
    #[error("Unknown embedding model: {model_id}")]
    UnknownModel { model_id: String },

    /// Error when model configuration is invalid
    #[error("Invalid model configuration: {message}")]
    InvalidConfig { message: String },

    /// Error while downloading, loading or warming up a model
    #[error("Model initialization failed: {source}")]
    ModelInitialization {
        #[source]
        source: anyhow::Error,
    },

    /// Error during inference
    #[error("Embedding generation failed: {source}")]
    EmbeddingGeneration {
        #[source]
        source: anyhow::Error,
    },

    /// The model returned a different number of vectors than texts it was given
    #[error("Expected {expected} embeddings, model returned {actual}")]
    CountMismatch { expected: usize, actual: usize },

    /// IO errors when preparing the model cache
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Async task join errors
    #[error("Async task failed: {source}")]
    AsyncTask {
        #[from]
        source: tokio::task::JoinError,
    },
}

impl EmbedError {
    /// Wrap any error raised while loading a model.
    pub fn model_init<E: Into<anyhow::Error>>(source: E) -> Self {
        Self::ModelInitialization {
            source: source.into(),
        }
    }

    /// Wrap any error raised while generating embeddings.
    pub fn embedding_gen<E: Into<anyhow::Error>>(source: E) -> Self {
        Self::EmbeddingGeneration {
            source: source.into(),
        }
    }

    /// Create an invalid configuration error with a custom message.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
