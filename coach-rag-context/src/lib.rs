//! # coach-rag-context
//!
//! Turns a paged reference document into overlapping text chunks ready for
//! embedding. No model or storage is involved here: this crate only knows
//! about pages, headings and words.
//!
//! - [`document`]: paged documents (form-feed separated text dumps)
//! - [`pdf`]: page-wise text extraction from PDF files
//! - [`heading`]: tolerant chapter/section heading detection
//! - [`clean`]: running header removal, hyphenation repair, whitespace cleanup
//! - [`chunker`]: word-window chunking with page/chapter metadata

pub mod chunker;
pub mod clean;
pub mod document;
pub mod heading;
pub mod pdf;

pub use chunker::{Chunk, ChunkError, Chunker, ChunkerConfig};
pub use document::{Document, DocumentError, DocumentFormat, Page};
pub use heading::{HeadingExtractor, PageHeadings, PatternHeadingExtractor};
