//! PDF loading.
//!
//! Text is pulled one page at a time with `lopdf`. A page whose content
//! cannot be decoded becomes an unextractable [`crate::Page`] so the rest of
//! the book still loads with correct page numbers.

use crate::document::{Document, DocumentError};
use tracing::{debug, warn};

/// Parse PDF `bytes` into a paged [`Document`].
pub fn load_pdf(bytes: &[u8]) -> Result<Document, DocumentError> {
    let pdf = lopdf::Document::load_mem(bytes)?;
    let numbers: Vec<u32> = pdf.get_pages().into_keys().collect();
    debug!("PDF has {} pages", numbers.len());

    let pages = numbers.into_iter().map(|number| match pdf.extract_text(&[number]) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("Could not extract text from PDF page {}: {}", number, e);
            None
        }
    });
    Ok(Document::from_extracted(pages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Chunker, ChunkerConfig};
    use lopdf::content::{Content, Operation};
    use lopdf::{Object, Stream, dictionary};

    /// A PDF with one page per entry, each line drawn in its own text object.
    fn build_pdf(pages: &[&[&str]]) -> Vec<u8> {
        let mut doc = lopdf::Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for lines in pages {
            let mut operations = Vec::new();
            for (i, line) in lines.iter().enumerate() {
                let y = 760 - 20 * i as i64;
                operations.push(Operation::new("BT", vec![]));
                operations.push(Operation::new("Tf", vec!["F1".into(), 12.into()]));
                operations.push(Operation::new("Td", vec![72.into(), y.into()]));
                operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
                operations.push(Operation::new("ET", vec![]));
            }
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_pages_are_numbered_in_order() {
        let bytes = build_pdf(&[
            &["Sleep drives recovery"],
            &[],
            &["Progressive overload adds load"],
        ]);
        let doc = load_pdf(&bytes).unwrap();
        assert_eq!(doc.page_count(), 3);

        let texts: Vec<(usize, &str)> = doc.extractable_pages().collect();
        assert!(texts.iter().any(|(n, t)| *n == 1 && t.contains("Sleep drives recovery")));
        assert!(texts.iter().any(|(n, t)| *n == 3 && t.contains("overload adds load")));
        assert!(!texts.iter().any(|(n, t)| *n != 3 && t.contains("overload")));
    }

    #[test]
    fn test_pdf_chunks_cite_pdf_pages() {
        let bytes = build_pdf(&[
            &["alpha beta gamma delta epsilon"],
            &["zeta eta theta iota kappa"],
        ]);
        let doc = load_pdf(&bytes).unwrap();
        let chunker = Chunker::new(
            ChunkerConfig::new()
                .with_chunk_words(5)
                .with_chunk_overlap(0)
                .with_min_chunk_words(5),
        )
        .unwrap();

        let chunks = chunker.chunk_document(&doc, "book.pdf").unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].id, "book.pdf:p1:c1");
        assert_eq!(chunks[1].page, 2);
        assert_eq!(chunks[1].text, "zeta eta theta iota kappa");
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(load_pdf(b"%PDF-1.5 truncated").is_err());
    }
}
