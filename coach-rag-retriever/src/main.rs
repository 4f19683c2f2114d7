use clap::{Parser, Subcommand};
use coach_rag_context::Chunker;
use coach_rag_retriever::{
    config::{RagConfig, init_tracing},
    retrieval::{IngestionPipeline, RetrievalParams, Retriever},
    storage::{SqliteVectorStore, VectorStore},
};
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// Build and query the coach-rag document index.
///
/// Settings come from the environment (DB_DIR, TABLE, EMBED_MODEL, RAG_K, ...);
/// flags override them.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the index database
    #[arg(long, global = true)]
    db_dir: Option<PathBuf>,

    /// Index table name
    #[arg(long, global = true)]
    table: Option<String>,

    /// Log every retrieval stage
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Chunk, embed and index a document
    Ingest {
        /// Document to index: a `.pdf`, or plain text with pages separated by form feeds
        document: PathBuf,
        /// Source id stored with each chunk (defaults to the file name)
        #[arg(long)]
        source: Option<String>,
        /// Rebuild even if the index is already populated
        #[arg(long)]
        force: bool,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Retrieve snippets for a query
    Search {
        query: String,
        /// Number of snippets to return
        #[arg(short, long)]
        k: Option<usize>,
        /// Minimum cosine similarity
        #[arg(long)]
        min_score: Option<f32>,
        /// MMR trade-off between relevance (1.0) and diversity (0.0)
        #[arg(long)]
        lambda: Option<f32>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show how the index was built
    Stats {
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show a few chunks spread over the index
    Peek {
        /// Number of chunks to show
        #[arg(short, long, default_value_t = 5)]
        count: usize,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Full,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "full" => Ok(OutputFormat::Full),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[derive(Serialize)]
struct IngestOutput<'a> {
    table: &'a str,
    chunk_count: usize,
    duration_ms: u128,
    skipped: bool,
    source_hash: &'a str,
}

fn preview(text: &str, chars: usize) -> String {
    let mut out: String = text.chars().take(chars).collect();
    if text.chars().count() > chars {
        out.push('…');
    }
    out
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = RagConfig::from_env()?;
    if let Some(db_dir) = args.db_dir {
        config.db_dir = db_dir;
    }
    if let Some(table) = args.table {
        config.table = table;
    }
    config.debug |= args.debug;
    config.validate()?;
    init_tracing(config.debug);

    let store = Arc::new(SqliteVectorStore::open(&config.store_config()).await?);

    let outcome = match args.command {
        Commands::Ingest {
            document,
            source,
            force,
            format,
        } => ingest(&config, Arc::clone(&store), document, source, force, format).await,
        Commands::Search {
            query,
            k,
            min_score,
            lambda,
            format,
        } => {
            let defaults = config.retrieval_config().params();
            let params = RetrievalParams {
                k: k.unwrap_or(defaults.k),
                min_score: min_score.unwrap_or(defaults.min_score),
                lambda: lambda.unwrap_or(defaults.lambda),
            };
            search(&config, Arc::clone(&store), &query, &params, format).await
        }
        Commands::Stats { format } => stats(&store, format).await,
        Commands::Peek { count, format } => peek(&store, count, format).await,
    };

    store.close().await;
    outcome
}

async fn ingest(
    config: &RagConfig,
    store: Arc<SqliteVectorStore>,
    document: PathBuf,
    source: Option<String>,
    force: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let source = match source {
        Some(source) => source,
        None => document
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                anyhow::anyhow!("Cannot derive a source id from {}", document.display())
            })?,
    };

    let chunker = Chunker::new(config.chunker_config())?;
    let embedder = coach_rag_embed::create_provider(&config.embed_config()).await?;
    let pipeline = IngestionPipeline::new(chunker, embedder, store)
        .with_batch_size(config.embed_batch_size)
        .with_workers(config.embed_workers);

    let summary = pipeline.run(&document, &source, force).await?;
    let output = IngestOutput {
        table: &config.table,
        chunk_count: summary.chunk_count,
        duration_ms: summary.duration.as_millis(),
        skipped: summary.skipped,
        source_hash: &summary.source_hash,
    };

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Summary | OutputFormat::Full if output.skipped => {
            println!(
                "Table '{}' already holds {} chunks; use --force to rebuild",
                output.table, output.chunk_count
            );
        }
        OutputFormat::Summary | OutputFormat::Full => {
            println!(
                "Indexed {} chunks from {} into '{}' in {} ms",
                output.chunk_count,
                document.display(),
                output.table,
                output.duration_ms
            );
            println!("Source hash: {}", output.source_hash);
        }
    }
    Ok(())
}

async fn search(
    config: &RagConfig,
    store: Arc<SqliteVectorStore>,
    query: &str,
    params: &RetrievalParams,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let embedder = coach_rag_embed::create_provider(&config.embed_config()).await?;
    let retriever = Retriever::new(embedder, store, config.retrieval_config());
    let result = retriever.retrieve(query, params).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Summary => {
            println!("Found {} snippets:", result.len());
            for s in &result.snippets {
                println!(
                    "  #{} | Score: {:.3} | {} | {}",
                    s.rank,
                    s.score,
                    s.citation,
                    preview(&s.chunk.text, 80)
                );
            }
            if !result.is_empty() {
                let pages: Vec<String> = result.pages().iter().map(|p| p.to_string()).collect();
                println!("Pages: {}", pages.join(", "));
            }
        }
        OutputFormat::Full => {
            println!("{}", result.context_block());
        }
    }
    Ok(())
}

async fn stats(store: &SqliteVectorStore, format: OutputFormat) -> anyhow::Result<()> {
    let info = store.info().await?;
    let rows = store.row_count().await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        OutputFormat::Summary | OutputFormat::Full => match info {
            Some(info) => {
                println!("Index Statistics:");
                println!("  Table: {}", info.table);
                println!("  Chunks: {}", rows.unwrap_or(info.chunk_count));
                println!("  Source: {}", info.source);
                println!("  Source hash: {}", info.source_hash);
                println!("  Model: {} ({} dimensions)", info.model_id, info.dimension);
                println!("  Metric: {}", info.metric);
                println!("  Built at: {}", info.built_at.to_rfc3339());
            }
            None => {
                println!(
                    "Table '{}' has not been built yet; run `coach-rag ingest` first",
                    store.table()
                );
            }
        },
    }
    Ok(())
}

async fn peek(store: &SqliteVectorStore, count: usize, format: OutputFormat) -> anyhow::Result<()> {
    let chunks = store.sample(count).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&chunks)?);
        }
        OutputFormat::Summary => {
            for chunk in &chunks {
                println!(
                    "  {} | Page: {} | Chapter: {} | Section: {} | Words: {}",
                    chunk.id,
                    chunk.page,
                    chunk.chapter.as_deref().unwrap_or("-"),
                    chunk.section.as_deref().unwrap_or("-"),
                    chunk.word_count()
                );
                println!("    {}", preview(&chunk.text, 160));
            }
        }
        OutputFormat::Full => {
            for chunk in &chunks {
                println!("Chunk ID: {}", chunk.id);
                println!("Page: {}", chunk.page);
                if let Some(chapter) = &chunk.chapter {
                    println!("Chapter: {chapter}");
                }
                if let Some(section) = &chunk.section {
                    println!("Section: {section}");
                }
                println!("Content:\n{}", chunk.text);
                println!("---");
            }
        }
    }
    Ok(())
}
