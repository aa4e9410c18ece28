pub mod types;
pub mod command;
pub mod ocr;
pub mod pdf_renderer;
pub mod orchestrator;

pub use types::*;
pub use command::*;
pub use ocr::*;
pub use pdf_renderer::*;
pub use orchestrator::*;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("OCR processing failed: {0}")]
    OcrProcessing(String),

    #[error("PDF parsing failed: {0}")]
    PdfParsing(String),

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Command template is empty or unparsable: {0:?}")]
    InvalidCommand(String),

    #[error("Could not start {program}: {source}")]
    CommandSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} did not finish within {seconds}s")]
    CommandTimeout { program: String, seconds: u64 },

    #[error("Unsupported format for extraction: {}", .0.display())]
    UnsupportedFormat(PathBuf),
}
