//! Paged source documents.
//!
//! A [`Document`] is the text of a single reference book split into pages. The
//! on-disk format is the one produced by `pdftotext`: pages are separated by a
//! form feed (`\x0c`) and the file usually ends with one trailing form feed.
//!
//! PDF files are read directly as well (see [`crate::pdf`]); pick the loader
//! with [`DocumentFormat::from_path`] and [`Document::parse`].
//!
//! Pages are decoded independently so that one page with broken text does not
//! take the rest of the document down with it; such a page is kept as
//! unextractable and the chunker skips it.
//!
//! ```
//! use coach_rag_context::document::Document;
//!
//! let doc = Document::from_bytes(b"first page\x0csecond page\x0c");
//! assert_eq!(doc.page_count(), 2);
//! assert_eq!(doc.pages()[1].number, 2);
//! assert_eq!(doc.pages()[1].text.as_deref(), Some("second page"));
//! ```

use std::path::Path;

/// Byte separating two pages in a text dump.
pub const PAGE_SEPARATOR: u8 = 0x0c;

/// Errors raised while loading a whole document.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Failed to parse PDF: {source}")]
    Pdf {
        #[from]
        source: lopdf::Error,
    },
}

/// On-disk layout of a source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// Form-feed separated text, as written by `pdftotext`
    Text,
    Pdf,
}

impl DocumentFormat {
    /// `.pdf` files (any case) are PDFs, everything else is a text dump.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("pdf") => Self::Pdf,
            _ => Self::Text,
        }
    }
}

/// One page of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// 1-based page number.
    pub number: usize,
    /// Decoded page text, `None` when the page could not be decoded.
    pub text: Option<String>,
}

impl Page {
    pub fn is_extractable(&self) -> bool {
        self.text.is_some()
    }
}

/// A source document as an ordered list of pages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pages: Vec<Page>,
}

impl Document {
    /// Load `bytes` with the loader for `format`.
    pub fn parse(bytes: &[u8], format: DocumentFormat) -> Result<Self, DocumentError> {
        match format {
            DocumentFormat::Text => Ok(Self::from_bytes(bytes)),
            DocumentFormat::Pdf => crate::pdf::load_pdf(bytes),
        }
    }

    /// Split raw bytes on form feeds and decode each page as UTF-8.
    ///
    /// A trailing empty page after the final separator is dropped. A page that
    /// is not valid UTF-8 is kept with `text == None` so page numbering of the
    /// following pages stays correct.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut raw: Vec<&[u8]> = bytes.split(|b| *b == PAGE_SEPARATOR).collect();
        if raw.len() > 1 && raw.last().is_some_and(|p| p.is_empty()) {
            raw.pop();
        }

        let pages = raw
            .into_iter()
            .enumerate()
            .map(|(i, bytes)| Page {
                number: i + 1,
                text: std::str::from_utf8(bytes).ok().map(str::to_owned),
            })
            .collect();

        Self { pages }
    }

    /// Same as [`Document::from_bytes`] for text that is already decoded.
    pub fn from_text(text: &str) -> Self {
        Self::from_bytes(text.as_bytes())
    }

    /// Build a document from already separated page texts.
    pub fn from_pages<I, S>(pages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pages = pages
            .into_iter()
            .enumerate()
            .map(|(i, text)| Page {
                number: i + 1,
                text: Some(text.into()),
            })
            .collect();
        Self { pages }
    }

    /// Build a document from per-page extraction results.
    ///
    /// `None` marks a page whose text could not be extracted.
    pub fn from_extracted<I>(pages: I) -> Self
    where
        I: IntoIterator<Item = Option<String>>,
    {
        let pages = pages
            .into_iter()
            .enumerate()
            .map(|(i, text)| Page {
                number: i + 1,
                text,
            })
            .collect();
        Self { pages }
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Texts of the decodable pages, paired with their page numbers.
    pub fn extractable_pages(&self) -> impl Iterator<Item = (usize, &str)> {
        self.pages
            .iter()
            .filter_map(|p| p.text.as_deref().map(|t| (p.number, t)))
    }
}
