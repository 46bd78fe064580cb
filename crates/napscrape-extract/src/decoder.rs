//! PDF decoding capability.

use std::path::PathBuf;
use std::time::Duration;

use lopdf::Document;
use thiserror::Error;
use tracing::debug;

/// Why one document's text could not be extracted.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("record has no local PDF path")]
    MissingPath,
    #[error("could not decode PDF: {0}")]
    Decode(String),
    #[error("decoding timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("decoder worker panicked: {0}")]
    WorkerPanicked(String),
}

/// Page texts of one document, in page order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedPdf {
    pub pages: Vec<String>,
}

impl DecodedPdf {
    pub fn page_count(&self) -> u32 {
        u32::try_from(self.pages.len()).unwrap_or(u32::MAX)
    }

    /// All pages joined with a blank line between them.
    pub fn joined_text(&self) -> String {
        self.pages.join("\n\n")
    }
}

/// Turns PDF bytes into per-page text.
///
/// Implementations are called from blocking worker threads and may be slow or
/// hang on malformed input; the caller enforces the timeout.
pub trait PdfDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedPdf, ExtractError>;
}

/// Pure-Rust decoder backed by `lopdf`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfDecoder;

impl PdfDecoder for LopdfDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedPdf, ExtractError> {
        let mut doc = Document::load_mem(bytes).map_err(|e| ExtractError::Decode(e.to_string()))?;

        // Owner-password-only files open with an empty user password.
        if doc.is_encrypted() {
            doc.decrypt("")
                .map_err(|e| ExtractError::Decode(format!("encrypted PDF: {e}")))?;
        }

        let page_numbers: Vec<u32> = doc.get_pages().into_keys().collect();
        if page_numbers.is_empty() {
            return Err(ExtractError::Decode("document has no pages".to_string()));
        }

        let mut pages = Vec::with_capacity(page_numbers.len());
        for number in page_numbers {
            let text = match doc.extract_text(&[number]) {
                Ok(text) => text.trim_end().to_string(),
                Err(e) => {
                    debug!(page = number, error = %e, "no text on page");
                    String::new()
                }
            };
            pages.push(text);
        }
        Ok(DecodedPdf { pages })
    }
}

/// Build a minimal PDF with one text line per page.
#[cfg(any(test, feature = "test-support"))]
pub fn sample_pdf(pages: &[&str]) -> Vec<u8> {
    use lopdf::content::{Content, Operation};
    use lopdf::{Object, Stream, dictionary};

    let mut doc = Document::with_version("1.5");
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

    let mut kids = Vec::with_capacity(pages.len());
    for line in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*line)]),
                Operation::new("ET", vec![]),
            ],
        };
        let stream = Stream::new(dictionary! {}, content.encode().expect("encode page content"));
        let content_id = doc.add_object(stream);
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::from(page_id));
    }

    let count = i64::try_from(kids.len()).expect("page count fits i64");
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

    let mut buf = Vec::new();
    doc.save_to(&mut buf).expect("write sample PDF");
    buf
}
