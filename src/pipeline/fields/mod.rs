//! Heuristic field extraction over OCR text.
//!
//! Every sub-extractor is independent and runs unconditionally over the
//! same text, each reporting its own confidence.

pub mod extractors;
pub mod types;

pub use types::*;

/// Derive the candidate fields for one document.
pub fn extract_fields(text: &str) -> MetadataRecord {
    MetadataRecord {
        document_type: extractors::document_type(text),
        vendor: extractors::vendor(text),
        total: extractors::total(text),
        identifiers: extractors::identifiers(text),
        dates: extractors::dates(text),
        line_items: extractors::line_items(text),
        extra: Default::default(),
    }
}
