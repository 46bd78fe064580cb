//! Text extraction layer: PDF decoding behind [`PdfDecoder`], driven over the
//! record store by [`TextExtractor`] in sequential or chunked-parallel mode.

mod decoder;
pub use decoder::{DecodedPdf, ExtractError, LopdfDecoder, PdfDecoder};

#[cfg(any(test, feature = "test-support"))]
pub use decoder::sample_pdf;

mod engine;
pub use engine::{ExtractReport, Extracted, ExtractionResult, TextExtractor};
