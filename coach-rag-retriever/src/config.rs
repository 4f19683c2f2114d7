//! Environment configuration and logging setup.
//!
//! Every knob has a default, so an empty environment yields a working
//! configuration. Values are parsed and validated once at startup; a bad value
//! is reported as a [`ConfigError`] naming the variable.

use crate::error::ConfigError;
use crate::retrieval::RetrievalConfig;
use crate::storage::StoreConfig;
use coach_rag_context::ChunkerConfig;
use coach_rag_embed::{DEFAULT_MODEL_ID, EmbedConfig};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DB_DIR: &str = "./data/index";
pub const DEFAULT_TABLE: &str = "document_chunks";
pub const DEFAULT_MODEL_CACHE_DIR: &str = "./data/models";

/// All runtime settings, usually read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct RagConfig {
    pub db_dir: PathBuf,
    pub table: String,
    pub embed_model: String,
    pub model_cache_dir: PathBuf,
    pub embed_batch_size: usize,
    pub embed_workers: usize,

    pub k: usize,
    pub min_score: f32,
    pub lambda: f32,
    pub pool_multiplier: usize,
    pub duplicate_threshold: f32,
    pub timeout: Duration,
    pub debug: bool,

    pub chunk_words: usize,
    pub chunk_overlap: usize,
    pub min_chunk_words: usize,
    pub include_section: bool,
    pub section_titles: Vec<String>,
    pub min_running_pages: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        let chunker = ChunkerConfig::default();
        let retrieval = RetrievalConfig::default();
        Self {
            db_dir: PathBuf::from(DEFAULT_DB_DIR),
            table: DEFAULT_TABLE.to_string(),
            embed_model: DEFAULT_MODEL_ID.to_string(),
            model_cache_dir: PathBuf::from(DEFAULT_MODEL_CACHE_DIR),
            embed_batch_size: 32,
            embed_workers: 2,
            k: retrieval.k,
            min_score: retrieval.min_score,
            lambda: retrieval.lambda,
            pool_multiplier: retrieval.pool_multiplier,
            duplicate_threshold: retrieval.duplicate_threshold,
            timeout: retrieval.timeout,
            debug: retrieval.debug,
            chunk_words: chunker.chunk_words,
            chunk_overlap: chunker.chunk_overlap,
            min_chunk_words: chunker.min_chunk_words,
            include_section: chunker.include_section,
            section_titles: chunker.section_titles,
            min_running_pages: chunker.min_running_pages,
        }
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str, expected: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::invalid(key, raw, format!("expected {expected}")))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::invalid(key, raw, "expected true or false")),
    }
}

impl RagConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, which returns a variable's value if set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("DB_DIR") {
            config.db_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("TABLE") {
            config.table = v.trim().to_string();
        }
        if let Some(v) = lookup("EMBED_MODEL") {
            config.embed_model = v.trim().to_string();
        }
        if let Some(v) = lookup("MODEL_CACHE_DIR") {
            config.model_cache_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("EMBED_BATCH_SIZE") {
            config.embed_batch_size = parse_value("EMBED_BATCH_SIZE", &v, "a positive integer")?;
        }
        if let Some(v) = lookup("EMBED_WORKERS") {
            config.embed_workers = parse_value("EMBED_WORKERS", &v, "a positive integer")?;
        }

        if let Some(v) = lookup("RAG_K") {
            config.k = parse_value("RAG_K", &v, "a non-negative integer")?;
        }
        if let Some(v) = lookup("RAG_MIN_SCORE") {
            config.min_score = parse_value("RAG_MIN_SCORE", &v, "a number")?;
        }
        if let Some(v) = lookup("RAG_LAMBDA") {
            config.lambda = parse_value("RAG_LAMBDA", &v, "a number between 0 and 1")?;
        }
        if let Some(v) = lookup("RAG_POOL_MULTIPLIER") {
            config.pool_multiplier = parse_value("RAG_POOL_MULTIPLIER", &v, "a positive integer")?;
        }
        if let Some(v) = lookup("RAG_DUP_THRESHOLD") {
            config.duplicate_threshold = parse_value("RAG_DUP_THRESHOLD", &v, "a number")?;
        }
        if let Some(v) = lookup("RAG_TIMEOUT_MS") {
            let ms: u64 = parse_value("RAG_TIMEOUT_MS", &v, "milliseconds")?;
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(v) = lookup("RAG_DEBUG") {
            config.debug = parse_bool("RAG_DEBUG", &v)?;
        }

        if let Some(v) = lookup("CHUNK_WORDS") {
            config.chunk_words = parse_value("CHUNK_WORDS", &v, "a positive integer")?;
        }
        if let Some(v) = lookup("CHUNK_OVERLAP") {
            config.chunk_overlap = parse_value("CHUNK_OVERLAP", &v, "a non-negative integer")?;
        }
        if let Some(v) = lookup("MIN_CHUNK_WORDS") {
            config.min_chunk_words = parse_value("MIN_CHUNK_WORDS", &v, "a positive integer")?;
        }
        if let Some(v) = lookup("INCLUDE_SECTION") {
            config.include_section = parse_bool("INCLUDE_SECTION", &v)?;
        }
        if let Some(v) = lookup("MIN_RUNNING_PAGES") {
            config.min_running_pages = parse_value("MIN_RUNNING_PAGES", &v, "an integer >= 2")?;
        }
        if let Some(v) = lookup("SECTION_TITLES") {
            config.section_titles = v
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
        }

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that parsing alone cannot catch.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Err(e) = crate::storage::sqlite_store::validate_table_name(&self.table) {
            return Err(ConfigError::invalid("TABLE", &self.table, e.to_string()));
        }
        if self.embed_model.is_empty() {
            return Err(ConfigError::invalid("EMBED_MODEL", "", "must not be empty"));
        }
        if self.embed_batch_size == 0 {
            return Err(ConfigError::invalid("EMBED_BATCH_SIZE", 0, "must be at least 1"));
        }
        if self.embed_workers == 0 {
            return Err(ConfigError::invalid("EMBED_WORKERS", 0, "must be at least 1"));
        }
        if !self.min_score.is_finite() {
            return Err(ConfigError::invalid(
                "RAG_MIN_SCORE",
                self.min_score,
                "must be finite",
            ));
        }
        if !(0.0..=1.0).contains(&self.lambda) {
            return Err(ConfigError::invalid(
                "RAG_LAMBDA",
                self.lambda,
                "must be between 0 and 1",
            ));
        }
        if self.pool_multiplier == 0 {
            return Err(ConfigError::invalid(
                "RAG_POOL_MULTIPLIER",
                0,
                "must be at least 1",
            ));
        }
        if !(self.duplicate_threshold > 0.0 && self.duplicate_threshold <= 1.0) {
            return Err(ConfigError::invalid(
                "RAG_DUP_THRESHOLD",
                self.duplicate_threshold,
                "must be in (0, 1]",
            ));
        }
        if self.min_running_pages < 2 {
            return Err(ConfigError::invalid(
                "MIN_RUNNING_PAGES",
                self.min_running_pages,
                "must be at least 2",
            ));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid("RAG_TIMEOUT_MS", 0, "must be positive"));
        }
        if let Err(e) = self.chunker_config().validate() {
            return Err(ConfigError::invalid(
                "CHUNK_WORDS",
                format!(
                    "{}/{}/{}",
                    self.chunk_words, self.chunk_overlap, self.min_chunk_words
                ),
                e.to_string(),
            ));
        }
        Ok(())
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(&self.db_dir, self.table.clone())
    }

    pub fn embed_config(&self) -> EmbedConfig {
        EmbedConfig::new(self.embed_model.clone())
            .with_cache_dir(&self.model_cache_dir)
            .with_batch_size(self.embed_batch_size)
    }

    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig::new()
            .with_chunk_words(self.chunk_words)
            .with_chunk_overlap(self.chunk_overlap)
            .with_min_chunk_words(self.min_chunk_words)
            .with_include_section(self.include_section)
            .with_section_titles(self.section_titles.clone())
            .with_min_running_pages(self.min_running_pages)
    }

    pub fn retrieval_config(&self) -> RetrievalConfig {
        RetrievalConfig {
            k: self.k,
            min_score: self.min_score,
            lambda: self.lambda,
            pool_multiplier: self.pool_multiplier,
            duplicate_threshold: self.duplicate_threshold,
            timeout: self.timeout,
            debug: self.debug,
        }
    }
}

/// Install the fmt subscriber used by the binaries.
///
/// Only the first call in a process takes effect.
pub fn init_tracing(debug: bool) {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init();
}
