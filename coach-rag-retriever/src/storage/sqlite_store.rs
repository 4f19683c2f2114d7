//! SQLite-backed [`VectorStore`].
//!
//! ## Database Schema
//!
//! ```sql
//! -- One table per corpus, named by configuration
//! CREATE TABLE "<table>" (
//!     id TEXT PRIMARY KEY,      -- "{source}:p{page}:c{seq}"
//!     seq INTEGER NOT NULL,     -- position in the document
//!     source TEXT NOT NULL,
//!     page INTEGER NOT NULL,
//!     chapter TEXT,
//!     section TEXT,
//!     text TEXT NOT NULL,
//!     vector BLOB NOT NULL      -- f16 embedding
//! );
//!
//! -- How each table was built
//! CREATE TABLE rag_index_meta (
//!     table_name TEXT PRIMARY KEY,
//!     model_id TEXT NOT NULL,
//!     dimension INTEGER NOT NULL,
//!     metric TEXT NOT NULL,
//!     chunk_count INTEGER NOT NULL,
//!     source TEXT NOT NULL,
//!     source_hash TEXT NOT NULL,
//!     built_at INTEGER NOT NULL
//! );
//! ```
//!
//! Rebuilds write a staging table and swap it in inside one transaction, so a
//! failed rebuild leaves the previous table as it was. Searches run against a
//! [`FlatIndex`] snapshot loaded on first use and replaced after each rebuild;
//! concurrent searches share the snapshot through an `Arc`.
//!
//! Each search first reads the table's metadata row. When it no longer
//! matches the build the snapshot was loaded from (another process rebuilt
//! the table), the snapshot is reloaded before searching.

use super::{
    ChunkRecord, FlatIndex, IndexInfo, METRIC_COSINE, RebuildMeta, ScoredChunk, VectorStore,
};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coach_rag_context::Chunk;
use half::f16;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Database file created inside the configured directory.
pub const DEFAULT_DB_FILE: &str = "coach-rag.db";

const META_TABLE: &str = "rag_index_meta";

/// Identifies one build of a table, as recorded in its metadata row.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BuildStamp {
    built_at: i64,
    chunk_count: i64,
    model_id: String,
    source_hash: String,
}

/// In-memory search index plus the build it was loaded from.
#[derive(Debug)]
struct Snapshot {
    stamp: Option<BuildStamp>,
    index: Arc<FlatIndex>,
}

/// Where the index lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub db_dir: PathBuf,
    pub table: String,
    pub db_file: String,
}

impl StoreConfig {
    pub fn new<P: AsRef<Path>>(db_dir: P, table: impl Into<String>) -> Self {
        Self {
            db_dir: db_dir.as_ref().to_path_buf(),
            table: table.into(),
            db_file: DEFAULT_DB_FILE.to_string(),
        }
    }

    pub fn with_db_file(self, db_file: impl Into<String>) -> Self {
        Self {
            db_file: db_file.into(),
            ..self
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_dir.join(&self.db_file)
    }
}

/// Check that `name` can be used as a bare SQLite table name.
pub fn validate_table_name(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    let reserved = name.to_ascii_lowercase().starts_with("sqlite_")
        || name.eq_ignore_ascii_case(META_TABLE)
        || name.ends_with("__staging");

    if valid_start && valid_rest && name.len() <= 64 && !reserved {
        Ok(())
    } else {
        Err(StoreError::InvalidTableName {
            name: name.to_string(),
        })
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let halves: Vec<f16> = vector.iter().map(|v| f16::from_f32(*v)).collect();
    bytemuck::cast_slice::<f16, u8>(&halves).to_vec()
}

fn decode_vector(id: &str, blob: &[u8]) -> Result<Vec<f32>, StoreError> {
    if blob.len() % 2 != 0 {
        return Err(StoreError::Corrupt {
            id: id.to_string(),
            message: format!("vector blob has odd length {}", blob.len()),
        });
    }
    // Blobs read from SQLite are not guaranteed to be 2-byte aligned
    let vector = match bytemuck::try_cast_slice::<u8, f16>(blob) {
        Ok(halves) => halves.iter().map(|h| h.to_f32()).collect(),
        Err(_) => blob
            .chunks_exact(2)
            .map(|b| f16::from_ne_bytes([b[0], b[1]]).to_f32())
            .collect(),
    };
    Ok(vector)
}

/// Vector as it reads back from storage.
fn quantize(vector: &[f32]) -> Vec<f32> {
    vector.iter().map(|v| f16::from_f32(*v).to_f32()).collect()
}

fn chunk_from_row(row: &SqliteRow) -> Result<Chunk, StoreError> {
    let seq: i64 = row.try_get("seq")?;
    let page: i64 = row.try_get("page")?;
    Ok(Chunk {
        id: row.try_get("id")?,
        seq: seq.max(0) as usize,
        source: row.try_get("source")?,
        page: page.max(0) as usize,
        chapter: row.try_get("chapter")?,
        section: row.try_get("section")?,
        text: row.try_get("text")?,
    })
}

/// Vector index persisted in a SQLite database file.
#[derive(Clone)]
pub struct SqliteVectorStore {
    pool: SqlitePool,
    table: String,
    snapshot: Arc<RwLock<Option<Snapshot>>>,
}

impl std::fmt::Debug for SqliteVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteVectorStore")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl SqliteVectorStore {
    /// Open (creating if needed) the database described by `config`.
    pub async fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        validate_table_name(&config.table)?;
        tokio::fs::create_dir_all(&config.db_dir).await?;
        let db_path = config.db_path();
        info!(
            "Opening vector index at {} (table '{}')",
            db_path.display(),
            config.table
        );

        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .create_if_missing(true)
                .auto_vacuum(sqlx::sqlite::SqliteAutoVacuum::Full)
                .page_size(1 << 16)
                .optimize_on_close(true, 1 << 10),
        )
        .await?;

        Self::new_with_pool(pool, &config.table).await
    }

    /// Open a throwaway in-memory index, mainly for tests.
    pub async fn open_memory(table: &str) -> Result<Self, StoreError> {
        validate_table_name(table)?;
        // Every connection to :memory: is a separate database, so keep exactly one
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::new_with_pool(pool, table).await
    }

    async fn new_with_pool(pool: SqlitePool, table: &str) -> Result<Self, StoreError> {
        Self::create_tables(&pool).await?;
        Ok(Self {
            pool,
            table: table.to_string(),
            snapshot: Arc::new(RwLock::new(None)),
        })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rag_index_meta (
                table_name TEXT PRIMARY KEY,
                model_id TEXT NOT NULL,
                dimension INTEGER NOT NULL,
                metric TEXT NOT NULL,
                chunk_count INTEGER NOT NULL,
                source TEXT NOT NULL,
                source_hash TEXT NOT NULL,
                built_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Close all pooled connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn table_exists(&self) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(&self.table)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn load_index(&self) -> Result<Option<FlatIndex>, StoreError> {
        if !self.table_exists().await? {
            return Ok(None);
        }

        let rows = sqlx::query(&format!(
            r#"SELECT id, seq, source, page, chapter, section, text, vector FROM "{}" ORDER BY seq"#,
            self.table
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let chunk = chunk_from_row(row)?;
            let blob: Vec<u8> = row.try_get("vector")?;
            let vector = decode_vector(&chunk.id, &blob)?;
            records.push(ChunkRecord::new(chunk, vector));
        }

        debug!(
            "Loaded {} rows from table '{}' into memory",
            records.len(),
            self.table
        );
        Ok(Some(FlatIndex::new(records)?))
    }

    async fn build_stamp(&self) -> Result<Option<BuildStamp>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT built_at, chunk_count, model_id, source_hash
            FROM rag_index_meta WHERE table_name = ?
            "#,
        )
        .bind(&self.table)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<BuildStamp, StoreError> {
            Ok(BuildStamp {
                built_at: row.try_get("built_at")?,
                chunk_count: row.try_get("chunk_count")?,
                model_id: row.try_get("model_id")?,
                source_hash: row.try_get("source_hash")?,
            })
        })
        .transpose()
    }

    /// The current search snapshot, (re)loading it when the table's build changed.
    async fn snapshot(&self) -> Result<Arc<FlatIndex>, StoreError> {
        let stamp = self.build_stamp().await?;
        if let Some(current) = self.snapshot.read().await.as_ref() {
            if current.stamp == stamp {
                return Ok(Arc::clone(&current.index));
            }
        }

        let mut slot = self.snapshot.write().await;
        if let Some(current) = slot.as_ref() {
            if current.stamp == stamp {
                return Ok(Arc::clone(&current.index));
            }
            info!(
                "Table '{}' was rebuilt elsewhere; reloading search snapshot",
                self.table
            );
        }
        let index = self
            .load_index()
            .await?
            .ok_or_else(|| StoreError::NotReady {
                table: self.table.clone(),
            })?;
        let index = Arc::new(index);
        *slot = Some(Snapshot {
            stamp,
            index: Arc::clone(&index),
        });
        Ok(index)
    }

    fn validate_records(records: &[ChunkRecord], dimension: usize) -> Result<(), StoreError> {
        for record in records {
            if record.vector.is_empty() {
                return Err(StoreError::EmptyVector {
                    id: record.chunk.id.clone(),
                });
            }
            if record.vector.len() != dimension {
                return Err(StoreError::DimensionMismatch {
                    expected: dimension,
                    actual: record.vector.len(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn table(&self) -> &str {
        &self.table
    }

    async fn rebuild(
        &self,
        records: Vec<ChunkRecord>,
        meta: RebuildMeta,
    ) -> Result<IndexInfo, StoreError> {
        Self::validate_records(&records, meta.dimension)?;
        let staging = format!("{}__staging", self.table);
        info!(
            "Rebuilding table '{}' with {} chunks",
            self.table,
            records.len()
        );

        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(r#"DROP TABLE IF EXISTS "{staging}""#))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            r#"
            CREATE TABLE "{staging}" (
                id TEXT PRIMARY KEY,
                seq INTEGER NOT NULL,
                source TEXT NOT NULL,
                page INTEGER NOT NULL,
                chapter TEXT,
                section TEXT,
                text TEXT NOT NULL,
                vector BLOB NOT NULL
            )
            "#
        ))
        .execute(&mut *tx)
        .await?;

        let insert = format!(
            r#"INSERT INTO "{staging}" (id, seq, source, page, chapter, section, text, vector)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#
        );
        for record in &records {
            let chunk = &record.chunk;
            sqlx::query(&insert)
                .bind(&chunk.id)
                .bind(chunk.seq as i64)
                .bind(&chunk.source)
                .bind(chunk.page as i64)
                .bind(&chunk.chapter)
                .bind(&chunk.section)
                .bind(&chunk.text)
                .bind(encode_vector(&record.vector))
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(&format!(r#"DROP TABLE IF EXISTS "{}""#, self.table))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            r#"ALTER TABLE "{staging}" RENAME TO "{}""#,
            self.table
        ))
        .execute(&mut *tx)
        .await?;

        let built_at = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO rag_index_meta
                (table_name, model_id, dimension, metric, chunk_count, source, source_hash, built_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(table_name) DO UPDATE SET
                model_id = excluded.model_id,
                dimension = excluded.dimension,
                metric = excluded.metric,
                chunk_count = excluded.chunk_count,
                source = excluded.source,
                source_hash = excluded.source_hash,
                built_at = excluded.built_at
            "#,
        )
        .bind(&self.table)
        .bind(&meta.model_id)
        .bind(meta.dimension as i64)
        .bind(METRIC_COSINE)
        .bind(records.len() as i64)
        .bind(&meta.source)
        .bind(&meta.source_hash)
        .bind(built_at.timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let chunk_count = records.len();
        let quantized = records
            .into_iter()
            .map(|r| ChunkRecord::new(r.chunk, quantize(&r.vector)))
            .collect();
        let index = FlatIndex::new(quantized)?;
        *self.snapshot.write().await = Some(Snapshot {
            stamp: Some(BuildStamp {
                built_at: built_at.timestamp(),
                chunk_count: chunk_count as i64,
                model_id: meta.model_id.clone(),
                source_hash: meta.source_hash.clone(),
            }),
            index: Arc::new(index),
        });

        info!("Table '{}' rebuilt with {} chunks", self.table, chunk_count);
        Ok(IndexInfo {
            table: self.table.clone(),
            model_id: meta.model_id,
            dimension: meta.dimension,
            metric: METRIC_COSINE.to_string(),
            chunk_count,
            source: meta.source,
            source_hash: meta.source_hash,
            built_at: DateTime::from_timestamp(built_at.timestamp(), 0).unwrap_or(built_at),
        })
    }

    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<ScoredChunk>, StoreError> {
        let index = self.snapshot().await?;
        let query = query.to_vec();
        let hits = tokio::task::spawn_blocking(move || index.search(&query, limit)).await??;
        debug!(
            "Search on '{}' returned {} of {} requested rows",
            self.table,
            hits.len(),
            limit
        );
        Ok(hits)
    }

    async fn info(&self) -> Result<Option<IndexInfo>, StoreError> {
        if !self.table_exists().await? {
            return Ok(None);
        }
        let row = sqlx::query(
            r#"
            SELECT model_id, dimension, metric, chunk_count, source, source_hash, built_at
            FROM rag_index_meta WHERE table_name = ?
            "#,
        )
        .bind(&self.table)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let dimension: i64 = row.try_get("dimension")?;
        let chunk_count: i64 = row.try_get("chunk_count")?;
        let built_at: i64 = row.try_get("built_at")?;

        Ok(Some(IndexInfo {
            table: self.table.clone(),
            model_id: row.try_get("model_id")?,
            dimension: dimension.max(0) as usize,
            metric: row.try_get("metric")?,
            chunk_count: chunk_count.max(0) as usize,
            source: row.try_get("source")?,
            source_hash: row.try_get("source_hash")?,
            built_at: DateTime::from_timestamp(built_at, 0).unwrap_or_default(),
        }))
    }

    async fn row_count(&self) -> Result<Option<usize>, StoreError> {
        if !self.table_exists().await? {
            return Ok(None);
        }
        let count: i64 = sqlx::query_scalar(&format!(r#"SELECT COUNT(*) FROM "{}""#, self.table))
            .fetch_one(&self.pool)
            .await?;
        Ok(Some(count.max(0) as usize))
    }

    async fn sample(&self, n: usize) -> Result<Vec<Chunk>, StoreError> {
        let index = self.snapshot().await?;
        let total = index.len();
        if n == 0 || total == 0 {
            return Ok(Vec::new());
        }

        let take = n.min(total);
        let mut picked: Vec<usize> = (0..take).map(|i| i * total / take).collect();
        picked.dedup();
        Ok(picked
            .into_iter()
            .map(|row| index.chunks()[row].clone())
            .collect())
    }
}
