use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ExtractionError;

/// Result of text extraction from a single document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionResult {
    pub text: String,
    /// Mean word confidence in [0, 1]. `None` when the text came from a
    /// source that reports no confidence (the vendor command).
    pub ocr_confidence: Option<f32>,
    pub page_count: usize,
    pub method: ExtractionMethod,
}

/// How text was extracted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExtractionMethod {
    LocalOcr,
    ExternalCommand,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalOcr => "local_ocr",
            Self::ExternalCommand => "external_command",
        }
    }
}

/// One recognized word. `confidence` is `None` when the engine reported a
/// negative or non-numeric score.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrWord {
    pub text: String,
    pub confidence: Option<f32>,
}

/// Raw OCR result from the engine
#[derive(Debug, Clone)]
pub struct OcrPageResult {
    pub text: String,
    /// Mean of the usable word confidences, `None` if there were none.
    pub confidence: Option<f32>,
    pub words: Vec<OcrWord>,
}

/// OCR engine abstraction (allows mocking for tests)
pub trait OcrEngine {
    fn ocr_image(&self, image_bytes: &[u8]) -> Result<OcrPageResult, ExtractionError>;
}

/// Rasterizes PDF pages into encoded images for OCR.
pub trait PdfPageRenderer {
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, ExtractionError>;

    /// Render one zero-based page to PNG bytes.
    fn render_page(&self, pdf_bytes: &[u8], page_number: usize) -> Result<Vec<u8>, ExtractionError>;
}

/// Main extraction trait
pub trait TextExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractionResult, ExtractionError>;
}

/// Average the confidences that are present. `None` if none are.
pub fn mean_confidence<I: IntoIterator<Item = Option<f32>>>(values: I) -> Option<f32> {
    let (sum, count) = values
        .into_iter()
        .flatten()
        .fold((0.0f32, 0usize), |(s, n), v| (s + v, n + 1));
    (count > 0).then(|| sum / count as f32)
}
