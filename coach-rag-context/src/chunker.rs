//! Overlapping word-window chunking of paged documents.
//!
//! The chunker turns a [`Document`] into a sequence of [`Chunk`]s:
//!
//! 1. Chapter and section headings are read from each raw page first, since
//!    heading lines are usually removed as running headers afterwards. Labels
//!    carry forward across pages and a new chapter clears the section.
//! 2. Each page is cleaned (see [`crate::clean`]).
//! 3. The cleaned words of the whole document are cut into windows of
//!    `chunk_words` words, starting a new window every
//!    `chunk_words - chunk_overlap` words. Windows shorter than
//!    `min_chunk_words` are dropped.
//!
//! A chunk is attributed to the page holding its first word, and carries the
//! chapter/section in effect on that page.
//!
//! ```
//! use coach_rag_context::chunker::{Chunker, ChunkerConfig};
//!
//! let config = ChunkerConfig::new()
//!     .with_chunk_words(6)
//!     .with_chunk_overlap(2)
//!     .with_min_chunk_words(2);
//! let chunker = Chunker::new(config).unwrap();
//!
//! let chunks = chunker
//!     .chunk("Chapter 1\none two three four five\x0csix seven eight nine ten", "book.txt")
//!     .unwrap();
//! assert_eq!(chunks[0].id, "book.txt:p1:c1");
//! assert_eq!(chunks[0].chapter.as_deref(), Some("1"));
//! assert_eq!(chunks[1].text, "five six seven eight nine ten");
//! assert_eq!(chunks[1].page, 1);
//! ```

use crate::clean::{DEFAULT_MIN_RUNNING_PAGES, HeaderFilter, join_hyphenated, normalize_whitespace};
use crate::document::Document;
use crate::heading::{HeadingExtractor, PatternHeadingExtractor};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Errors raised while chunking a document.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    /// The document had no extractable words at all
    #[error("Document yielded no extractable text")]
    EmptyDocument,

    #[error("Invalid chunker configuration: {message}")]
    InvalidConfig { message: String },

    /// A caller-supplied header pattern failed to compile
    #[error("Invalid header pattern: {source}")]
    InvalidPattern {
        #[from]
        source: regex::Error,
    },
}

impl ChunkError {
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

/// A contiguous window of cleaned document text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// `{source}:p{page}:c{seq}`
    pub id: String,
    /// 1-based position of the chunk in its document
    pub seq: usize,
    pub source: String,
    /// 1-based page holding the first word of the chunk
    pub page: usize,
    pub chapter: Option<String>,
    pub section: Option<String>,
    pub text: String,
}

impl Chunk {
    pub fn make_id(source: &str, page: usize, seq: usize) -> String {
        format!("{source}:p{page}:c{seq}")
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Window sizes and cleanup options for [`Chunker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkerConfig {
    pub chunk_words: usize,
    pub chunk_overlap: usize,
    pub min_chunk_words: usize,
    /// Attach section labels to chunks
    pub include_section: bool,
    /// Known section titles recognised as headings
    pub section_titles: Vec<String>,
    /// Extra regex patterns for lines to strip as headers/footers
    pub header_patterns: Vec<String>,
    /// Pages an edge line must recur on to be dropped as a running header
    pub min_running_pages: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_words: 900,
            chunk_overlap: 150,
            min_chunk_words: 40,
            include_section: true,
            section_titles: Vec::new(),
            header_patterns: Vec::new(),
            min_running_pages: DEFAULT_MIN_RUNNING_PAGES,
        }
    }
}

impl ChunkerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_words(mut self, chunk_words: usize) -> Self {
        self.chunk_words = chunk_words;
        self
    }

    pub fn with_chunk_overlap(mut self, chunk_overlap: usize) -> Self {
        self.chunk_overlap = chunk_overlap;
        self
    }

    pub fn with_min_chunk_words(mut self, min_chunk_words: usize) -> Self {
        self.min_chunk_words = min_chunk_words;
        self
    }

    pub fn with_include_section(mut self, include_section: bool) -> Self {
        self.include_section = include_section;
        self
    }

    pub fn with_section_titles(mut self, titles: Vec<String>) -> Self {
        self.section_titles = titles;
        self
    }

    pub fn with_header_patterns(mut self, patterns: Vec<String>) -> Self {
        self.header_patterns = patterns;
        self
    }

    pub fn with_min_running_pages(mut self, min_running_pages: usize) -> Self {
        self.min_running_pages = min_running_pages;
        self
    }

    /// Distance in words between the starts of two consecutive windows.
    pub fn step(&self) -> usize {
        self.chunk_words.saturating_sub(self.chunk_overlap)
    }

    pub fn validate(&self) -> Result<(), ChunkError> {
        if self.chunk_words == 0 {
            return Err(ChunkError::invalid_config("chunk_words must be positive"));
        }
        if self.chunk_overlap >= self.chunk_words {
            return Err(ChunkError::invalid_config(format!(
                "chunk_overlap ({}) must be smaller than chunk_words ({})",
                self.chunk_overlap, self.chunk_words
            )));
        }
        if self.min_chunk_words == 0 || self.min_chunk_words > self.chunk_words {
            return Err(ChunkError::invalid_config(format!(
                "min_chunk_words ({}) must be between 1 and chunk_words ({})",
                self.min_chunk_words, self.chunk_words
            )));
        }
        Ok(())
    }
}

/// Where a cleaned page starts in the document word list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSpan {
    pub page: usize,
    pub first_word: usize,
    pub chapter: Option<String>,
    pub section: Option<String>,
}

/// Document text after cleanup, as a flat word list with page boundaries.
#[derive(Debug, Clone, Default)]
pub struct CleanedDocument {
    pub words: Vec<String>,
    pub spans: Vec<PageSpan>,
}

impl CleanedDocument {
    /// The page span containing word `index`.
    pub fn span_at(&self, index: usize) -> Option<&PageSpan> {
        let after = self.spans.partition_point(|s| s.first_word <= index);
        after.checked_sub(1).and_then(|i| self.spans.get(i))
    }
}

/// Splits documents into overlapping word windows.
pub struct Chunker {
    config: ChunkerConfig,
    headings: Box<dyn HeadingExtractor>,
    headers: HeaderFilter,
}

impl std::fmt::Debug for Chunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Result<Self, ChunkError> {
        config.validate()?;
        let headers = HeaderFilter::new(&config.header_patterns)?
            .with_min_running_pages(config.min_running_pages);
        let headings =
            PatternHeadingExtractor::new().with_section_titles(config.section_titles.iter());
        Ok(Self {
            config,
            headings: Box::new(headings),
            headers,
        })
    }

    /// Replace the default pattern-based heading extractor.
    pub fn with_heading_extractor<H: HeadingExtractor + 'static>(self, extractor: H) -> Self {
        Self {
            headings: Box::new(extractor),
            ..self
        }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunk form-feed separated document text.
    pub fn chunk(&self, document_text: &str, source: &str) -> Result<Vec<Chunk>, ChunkError> {
        self.chunk_document(&Document::from_text(document_text), source)
    }

    /// Clean every page and flatten the result into one word list.
    pub fn clean(&self, document: &Document, source: &str) -> CleanedDocument {
        let running = self
            .headers
            .detect_running_lines(document.extractable_pages().map(|(_, text)| text));
        if !running.is_empty() {
            debug!(
                "Detected {} running header lines in {}",
                running.len(),
                source
            );
        }

        let mut cleaned = CleanedDocument::default();
        let mut chapter: Option<String> = None;
        let mut section: Option<String> = None;

        for page in document.pages() {
            let Some(raw) = page.text.as_deref() else {
                warn!(
                    "Skipping page {} of {}: text could not be extracted",
                    page.number, source
                );
                continue;
            };

            let found = self.headings.extract(raw);
            if found.chapter.is_some() {
                chapter = found.chapter;
                section = None;
            }
            if found.section.is_some() && self.config.include_section {
                section = found.section;
            }

            let text = normalize_whitespace(&join_hyphenated(&self.headers.strip(raw, &running)));
            if text.is_empty() {
                debug!("Page {} of {} has no text after cleanup", page.number, source);
                continue;
            }

            cleaned.spans.push(PageSpan {
                page: page.number,
                first_word: cleaned.words.len(),
                chapter: chapter.clone(),
                section: section.clone(),
            });
            cleaned
                .words
                .extend(text.split(' ').map(str::to_owned));
        }

        cleaned
    }

    /// Chunk an already paged document.
    pub fn chunk_document(
        &self,
        document: &Document,
        source: &str,
    ) -> Result<Vec<Chunk>, ChunkError> {
        let cleaned = self.clean(document, source);
        let words = &cleaned.words;
        if words.is_empty() {
            return Err(ChunkError::EmptyDocument);
        }

        let ChunkerConfig {
            chunk_words,
            min_chunk_words,
            ..
        } = self.config;
        let step = self.config.step();

        let mut chunks = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + chunk_words).min(words.len());
            if end - start >= min_chunk_words {
                if let Some(span) = cleaned.span_at(start) {
                    let seq = chunks.len() + 1;
                    chunks.push(Chunk {
                        id: Chunk::make_id(source, span.page, seq),
                        seq,
                        source: source.to_string(),
                        page: span.page,
                        chapter: span.chapter.clone(),
                        section: span.section.clone(),
                        text: words[start..end].join(" "),
                    });
                }
            }
            if end >= words.len() {
                break;
            }
            start += step;
        }

        debug!(
            "Chunked {} into {} chunks from {} words over {} pages",
            source,
            chunks.len(),
            words.len(),
            cleaned.spans.len()
        );
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heading::PageHeadings;
    use tracing_test::traced_test;

    fn words(prefix: &str, n: usize) -> String {
        (0..n)
            .map(|i| format!("{prefix}{i}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn small_chunker() -> Chunker {
        Chunker::new(
            ChunkerConfig::new()
                .with_chunk_words(50)
                .with_chunk_overlap(10)
                .with_min_chunk_words(5),
        )
        .unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(ChunkerConfig::default().validate().is_ok());
        assert!(
            ChunkerConfig::new()
                .with_chunk_overlap(900)
                .validate()
                .is_err()
        );
        assert!(
            ChunkerConfig::new()
                .with_min_chunk_words(0)
                .validate()
                .is_err()
        );
        assert!(
            ChunkerConfig::new()
                .with_chunk_words(30)
                .with_chunk_overlap(5)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_empty_document() {
        let chunker = small_chunker();
        assert!(matches!(
            chunker.chunk("", "empty"),
            Err(ChunkError::EmptyDocument)
        ));
        assert!(matches!(
            chunker.chunk(" \n\x0c 12 \n\x0c", "empty"),
            Err(ChunkError::EmptyDocument)
        ));
    }

    #[test]
    fn test_short_document_yields_no_chunks() {
        let chunks = small_chunker().chunk("just four words here", "s").unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_chunking_is_idempotent() {
        let text = format!("Chapter 2\n{}\x0c{}", words("a", 70), words("b", 70));
        let chunker = small_chunker();
        let first = chunker.chunk(&text, "doc").unwrap();
        let second = chunker.chunk(&text, "doc").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_windows_cover_the_cleaned_text() {
        let text = format!("{}\x0c{}", words("a", 60), words("b", 77));
        let chunker = small_chunker();
        let doc = Document::from_text(&text);
        let cleaned = chunker.clean(&doc, "doc");
        let chunks = chunker.chunk_document(&doc, "doc").unwrap();
        assert_eq!(chunks.len(), 4);

        let mut rebuilt: Vec<String> = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let skip = if i == 0 { 0 } else { 10 };
            rebuilt.extend(chunk.text.split(' ').skip(skip).map(str::to_owned));
        }
        assert_eq!(rebuilt, cleaned.words);
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let chunks = small_chunker().chunk(&words("w", 200), "doc").unwrap();
        for pair in chunks.windows(2) {
            let a: Vec<&str> = pair[0].text.split(' ').collect();
            let b: Vec<&str> = pair[1].text.split(' ').collect();
            assert_eq!(&a[a.len() - 10..], &b[..10]);
        }
    }

    #[test]
    fn test_minimum_length_invariant() {
        let config = ChunkerConfig::new()
            .with_chunk_words(50)
            .with_chunk_overlap(10)
            .with_min_chunk_words(30);
        let chunker = Chunker::new(config).unwrap();
        // windows start at 0, 40 and 80; the last one holds 15 words
        let chunks = chunker.chunk(&words("w", 95), "doc").unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.word_count() >= 30));
    }

    #[test]
    fn test_page_and_headings_follow_first_word() {
        let text = format!(
            "{}\x0cC H A P T E R  T H R E E\n{}\x0cSection 3.2 Deloads\n{}",
            words("a", 45),
            words("b", 40),
            words("c", 40)
        );
        let chunks = small_chunker().chunk(&text, "book").unwrap();

        assert_eq!(chunks[0].page, 1);
        assert_eq!(chunks[0].chapter, None);

        // starts at word 40, still on page 1
        assert_eq!(chunks[1].page, 1);

        // starts at word 80, on page 2
        assert_eq!(chunks[2].page, 2);
        assert_eq!(chunks[2].chapter.as_deref(), Some("3"));
        assert_eq!(chunks[2].section, None);
        assert_eq!(chunks[2].id, "book:p2:c3");

        // starts at word 120, on page 3
        assert_eq!(chunks[3].page, 3);
        assert_eq!(chunks[3].chapter.as_deref(), Some("3"));
        assert_eq!(chunks[3].section.as_deref(), Some("3.2 Deloads"));
    }

    #[test]
    fn test_heading_lines_are_not_chunk_text() {
        let text = format!("Chapter 4\n{}", words("w", 20));
        let chunks = small_chunker().chunk(&text, "doc").unwrap();
        assert_eq!(chunks[0].chapter.as_deref(), Some("4"));
        assert!(!chunks[0].text.contains("Chapter"));
    }

    #[test]
    fn test_sections_can_be_disabled() {
        let chunker = Chunker::new(
            ChunkerConfig::new()
                .with_chunk_words(50)
                .with_chunk_overlap(10)
                .with_min_chunk_words(5)
                .with_include_section(false),
        )
        .unwrap();
        let chunks = chunker
            .chunk(&format!("Section 1\n{}", words("w", 20)), "doc")
            .unwrap();
        assert_eq!(chunks[0].section, None);
    }

    #[test]
    fn test_hyphenation_is_rejoined_across_lines() {
        let text = format!("{} perio-\ndization works", words("w", 10));
        let chunks = small_chunker().chunk(&text, "doc").unwrap();
        assert!(chunks[0].text.ends_with("periodization works"));
    }

    #[traced_test]
    #[test]
    fn test_unextractable_page_is_skipped_with_warning() {
        let mut bytes = words("a", 20).into_bytes();
        bytes.push(0x0c);
        bytes.extend_from_slice(&[0xff, 0xfe, 0xfd]);
        bytes.push(0x0c);
        bytes.extend_from_slice(words("c", 20).as_bytes());

        let doc = Document::from_bytes(&bytes);
        let chunks = small_chunker().chunk_document(&doc, "doc").unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("c19"));
        assert!(logs_contain("Skipping page 2 of doc"));
    }

    struct FixedChapter;

    impl HeadingExtractor for FixedChapter {
        fn extract(&self, _page_text: &str) -> PageHeadings {
            PageHeadings {
                chapter: Some("Prologue".to_string()),
                section: None,
            }
        }
    }

    #[test]
    fn test_custom_heading_extractor() {
        let chunker = small_chunker().with_heading_extractor(FixedChapter);
        let chunks = chunker.chunk(&words("w", 20), "doc").unwrap();
        assert_eq!(chunks[0].chapter.as_deref(), Some("Prologue"));
    }
}
