use clap::Parser;
use coach_rag_context::{Chunker, ChunkerConfig, Document, DocumentFormat};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};

/// Chunk a PDF or form-feed separated text document and print the chunks as JSON.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input file (`.pdf` or text). If not provided, reads text from stdin.
    #[arg(short, long)]
    input: Option<String>,

    /// Source identifier used in chunk ids. Defaults to the input file name.
    #[arg(short, long)]
    source: Option<String>,

    /// Words per chunk window.
    #[arg(long, default_value_t = 900)]
    chunk_words: usize,

    /// Words shared by consecutive windows.
    #[arg(long, default_value_t = 150)]
    chunk_overlap: usize,

    /// Windows shorter than this are dropped.
    #[arg(long, default_value_t = 40)]
    min_chunk_words: usize,

    /// Pages an edge line must repeat on to be dropped as a running header.
    #[arg(long, default_value_t = 3)]
    min_running_pages: usize,

    /// Comma-separated list of known section titles.
    #[arg(long, value_delimiter = ',')]
    section_titles: Vec<String>,
}

#[derive(Serialize)]
struct ChunkOutput<'a> {
    id: &'a str,
    page: usize,
    chapter: Option<&'a str>,
    section: Option<&'a str>,
    words: usize,
    text: &'a str,
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let (bytes, default_source) = if let Some(input_path) = &args.input {
        let name = std::path::Path::new(input_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| input_path.clone());
        (fs::read(input_path)?, name)
    } else {
        let mut buffer = Vec::new();
        io::stdin().read_to_end(&mut buffer)?;
        (buffer, "stdin".to_string())
    };
    let source = args.source.unwrap_or(default_source);

    let config = ChunkerConfig::new()
        .with_chunk_words(args.chunk_words)
        .with_chunk_overlap(args.chunk_overlap)
        .with_min_chunk_words(args.min_chunk_words)
        .with_min_running_pages(args.min_running_pages)
        .with_section_titles(args.section_titles);
    let chunker = Chunker::new(config).map_err(io::Error::other)?;

    let format = args
        .input
        .as_deref()
        .map_or(DocumentFormat::Text, |p| DocumentFormat::from_path(std::path::Path::new(p)));
    let document = Document::parse(&bytes, format).map_err(io::Error::other)?;
    let chunks = chunker
        .chunk_document(&document, &source)
        .map_err(io::Error::other)?;

    let output: Vec<ChunkOutput> = chunks
        .iter()
        .map(|c| ChunkOutput {
            id: &c.id,
            page: c.page,
            chapter: c.chapter.as_deref(),
            section: c.section.as_deref(),
            words: c.word_count(),
            text: &c.text,
        })
        .collect();

    let json_output = serde_json::to_string_pretty(&output)?;
    println!("{}", json_output);

    Ok(())
}
