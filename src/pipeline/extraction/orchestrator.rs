use std::path::{Path, PathBuf};
use std::time::Duration;

use super::command::{CommandRunner, CommandTemplate};
use super::types::{
    mean_confidence, ExtractionMethod, ExtractionResult, OcrEngine, PdfPageRenderer,
    TextExtractor,
};
use super::ExtractionError;
use crate::pipeline::intake::DocumentKind;

/// Separator placed between the text of consecutive pages.
pub const PAGE_SEPARATOR: &str = "\n\x0c\n";

/// Local OCR extractor.
/// Uses trait objects for OCR and PDF rendering, enabling dependency injection.
pub struct DocumentExtractor {
    ocr_engine: Box<dyn OcrEngine>,
    pdf_renderer: Box<dyn PdfPageRenderer>,
}

impl DocumentExtractor {
    pub fn new(ocr_engine: Box<dyn OcrEngine>, pdf_renderer: Box<dyn PdfPageRenderer>) -> Self {
        Self {
            ocr_engine,
            pdf_renderer,
        }
    }

    fn ocr_paged(&self, bytes: &[u8]) -> Result<ExtractionResult, ExtractionError> {
        let page_count = self.pdf_renderer.page_count(bytes)?;
        let mut texts = Vec::with_capacity(page_count);
        let mut confidences = Vec::with_capacity(page_count);

        for page in 0..page_count {
            let image = self.pdf_renderer.render_page(bytes, page)?;
            let result = self.ocr_engine.ocr_image(&image)?;
            tracing::debug!(page, confidence = ?result.confidence, "Page OCR complete");
            texts.push(result.text);
            confidences.push(result.confidence);
        }

        Ok(ExtractionResult {
            text: texts.join(PAGE_SEPARATOR).trim().to_string(),
            ocr_confidence: Some(mean_confidence(confidences).unwrap_or(0.0)),
            page_count,
            method: ExtractionMethod::LocalOcr,
        })
    }

    fn ocr_single(&self, bytes: &[u8]) -> Result<ExtractionResult, ExtractionError> {
        let result = self.ocr_engine.ocr_image(bytes)?;
        Ok(ExtractionResult {
            text: result.text.trim().to_string(),
            ocr_confidence: Some(result.confidence.unwrap_or(0.0)),
            page_count: 1,
            method: ExtractionMethod::LocalOcr,
        })
    }
}

impl TextExtractor for DocumentExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractionResult, ExtractionError> {
        let kind = DocumentKind::from_path(path)
            .ok_or_else(|| ExtractionError::UnsupportedFormat(path.to_path_buf()))?;

        tracing::info!(
            path = %path.display(),
            kind = kind.as_str(),
            "Starting text extraction"
        );

        let bytes = std::fs::read(path)?;
        let result = match kind {
            DocumentKind::Paged => self.ocr_paged(&bytes)?,
            DocumentKind::Image => self.ocr_single(&bytes)?,
        };

        tracing::info!(
            path = %path.display(),
            pages = result.page_count,
            chars = result.text.len(),
            confidence = ?result.ocr_confidence,
            "Text extraction complete"
        );
        Ok(result)
    }
}

/// Vendor command first, local extractor as the fallback.
///
/// The command's stdout is taken as the text when it exits 0 with
/// non-empty output. Every other outcome is logged and the local
/// extractor runs instead.
pub struct ExternalCommandExtractor {
    template: CommandTemplate,
    runner: CommandRunner,
    fallback: Box<dyn TextExtractor>,
}

impl ExternalCommandExtractor {
    pub fn new(
        template: &str,
        timeout: Duration,
        fallback: Box<dyn TextExtractor>,
    ) -> Result<Self, ExtractionError> {
        Ok(Self {
            template: CommandTemplate::parse(template)?,
            runner: CommandRunner::new(timeout)?,
            fallback,
        })
    }

    fn try_command(&self, path: &Path) -> Option<String> {
        let program = self.template.program();
        match self.runner.run(program, &self.template.args_for(path)) {
            Ok(out) if out.success && !out.stdout.trim().is_empty() => Some(out.stdout),
            Ok(out) if out.success => {
                tracing::warn!(program, path = %path.display(), "OCR command produced no text");
                None
            }
            Ok(out) => {
                tracing::warn!(
                    program,
                    path = %path.display(),
                    code = ?out.code,
                    stderr = out.stderr.trim(),
                    "OCR command failed"
                );
                None
            }
            Err(e) => {
                tracing::warn!(program, path = %path.display(), error = %e, "OCR command unavailable");
                None
            }
        }
    }
}

impl TextExtractor for ExternalCommandExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractionResult, ExtractionError> {
        if let Some(stdout) = self.try_command(path) {
            tracing::info!(path = %path.display(), "Text extracted by OCR command");
            return Ok(ExtractionResult {
                text: stdout.trim().to_string(),
                ocr_confidence: None,
                page_count: 1,
                method: ExtractionMethod::ExternalCommand,
            });
        }
        tracing::info!(path = %path.display(), "Falling back to local OCR");
        self.fallback.extract(path)
    }
}

/// Persist extracted text as `<dir>/<artifact stem>.txt`.
pub fn write_sidecar(dir: &Path, artifact: &Path, text: &str) -> Result<PathBuf, ExtractionError> {
    std::fs::create_dir_all(dir)?;
    let stem = artifact
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".into());
    let target = dir.join(format!("{stem}.txt"));
    std::fs::write(&target, text)?;
    Ok(target)
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::*;
    use crate::pipeline::extraction::types::{OcrPageResult, OcrWord};
    use crate::pipeline::extraction::MockOcrEngine;

    /// Returns one scripted result per call.
    struct ScriptedOcr {
        pages: RefCell<VecDeque<(String, Option<f32>)>>,
    }

    impl ScriptedOcr {
        fn new(pages: &[(&str, Option<f32>)]) -> Self {
            Self {
                pages: RefCell::new(pages.iter().map(|(t, c)| (t.to_string(), *c)).collect()),
            }
        }
    }

    impl OcrEngine for ScriptedOcr {
        fn ocr_image(&self, _image_bytes: &[u8]) -> Result<OcrPageResult, ExtractionError> {
            let (text, confidence) = self
                .pages
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| ExtractionError::OcrProcessing("script exhausted".into()))?;
            Ok(OcrPageResult {
                words: vec![OcrWord {
                    text: text.clone(),
                    confidence,
                }],
                text,
                confidence,
            })
        }
    }

    struct MockPdfPageRenderer {
        pages: usize,
    }

    impl PdfPageRenderer for MockPdfPageRenderer {
        fn page_count(&self, _pdf_bytes: &[u8]) -> Result<usize, ExtractionError> {
            Ok(self.pages)
        }

        fn render_page(&self, _pdf_bytes: &[u8], page: usize) -> Result<Vec<u8>, ExtractionError> {
            if page >= self.pages {
                return Err(ExtractionError::PdfParsing("out of range".into()));
            }
            Ok(vec![page as u8])
        }
    }

    struct FailingRenderer;

    impl PdfPageRenderer for FailingRenderer {
        fn page_count(&self, _pdf_bytes: &[u8]) -> Result<usize, ExtractionError> {
            Err(ExtractionError::PdfParsing("corrupt".into()))
        }

        fn render_page(&self, _: &[u8], _: usize) -> Result<Vec<u8>, ExtractionError> {
            unreachable!()
        }
    }

    fn write_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"bytes").unwrap();
        path
    }

    #[test]
    fn multipage_pdf_joins_pages_and_averages_known_confidences() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "scan.pdf");
        let extractor = DocumentExtractor::new(
            Box::new(ScriptedOcr::new(&[
                ("page one", Some(0.9)),
                ("page two", None),
                ("page three", Some(0.7)),
            ])),
            Box::new(MockPdfPageRenderer { pages: 3 }),
        );

        let result = extractor.extract(&path).unwrap();
        assert_eq!(result.page_count, 3);
        assert_eq!(
            result.text,
            format!("page one{PAGE_SEPARATOR}page two{PAGE_SEPARATOR}page three")
        );
        assert!((result.ocr_confidence.unwrap() - 0.8).abs() < 1e-6);
        assert_eq!(result.method, ExtractionMethod::LocalOcr);
    }

    #[test]
    fn image_is_ocrd_directly() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "photo.JPG");
        let extractor = DocumentExtractor::new(
            Box::new(MockOcrEngine::new("  Receipt total 12.00 \n", 0.88)),
            Box::new(FailingRenderer),
        );
        let result = extractor.extract(&path).unwrap();
        assert_eq!(result.text, "Receipt total 12.00");
        assert_eq!(result.ocr_confidence, Some(0.88));
        assert_eq!(result.page_count, 1);
    }

    #[test]
    fn no_usable_confidence_reads_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "blank.png");
        let extractor = DocumentExtractor::new(
            Box::new(MockOcrEngine::without_confidence("")),
            Box::new(FailingRenderer),
        );
        let result = extractor.extract(&path).unwrap();
        assert!(result.text.is_empty());
        assert_eq!(result.ocr_confidence, Some(0.0));
    }

    #[test]
    fn renderer_failure_is_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "scan.pdf");
        let extractor = DocumentExtractor::new(
            Box::new(MockOcrEngine::new("x", 0.9)),
            Box::new(FailingRenderer),
        );
        assert!(matches!(
            extractor.extract(&path),
            Err(ExtractionError::PdfParsing(_))
        ));
    }

    #[test]
    fn unsupported_extension_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "notes.docx");
        let extractor = DocumentExtractor::new(
            Box::new(MockOcrEngine::new("x", 0.9)),
            Box::new(FailingRenderer),
        );
        assert!(matches!(
            extractor.extract(&path),
            Err(ExtractionError::UnsupportedFormat(_))
        ));
    }

    fn local_fallback() -> Box<dyn TextExtractor> {
        Box::new(DocumentExtractor::new(
            Box::new(MockOcrEngine::new("local text", 0.75)),
            Box::new(MockPdfPageRenderer { pages: 1 }),
        ))
    }

    #[cfg(unix)]
    #[test]
    fn vendor_command_output_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "scan.pdf");
        let extractor = ExternalCommandExtractor::new(
            "sh -c 'echo vendor text for $0' {path}",
            Duration::from_secs(10),
            local_fallback(),
        )
        .unwrap();

        let result = extractor.extract(&path).unwrap();
        assert_eq!(result.method, ExtractionMethod::ExternalCommand);
        assert!(result.text.starts_with("vendor text for"));
        assert!(result.text.ends_with("scan.pdf"));
        assert_eq!(result.ocr_confidence, None);
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "scan.pdf");
        let extractor = ExternalCommandExtractor::new(
            "sh -c 'echo partial; exit 2'",
            Duration::from_secs(10),
            local_fallback(),
        )
        .unwrap();
        let result = extractor.extract(&path).unwrap();
        assert_eq!(result.method, ExtractionMethod::LocalOcr);
        assert_eq!(result.text, "local text");
    }

    #[cfg(unix)]
    #[test]
    fn empty_output_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "scan.png");
        let extractor =
            ExternalCommandExtractor::new("true", Duration::from_secs(10), local_fallback())
                .unwrap();
        let result = extractor.extract(&path).unwrap();
        assert_eq!(result.method, ExtractionMethod::LocalOcr);
    }

    #[test]
    fn missing_command_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "scan.png");
        let extractor = ExternalCommandExtractor::new(
            "no-such-vendor-ocr-tool --text",
            Duration::from_secs(10),
            local_fallback(),
        )
        .unwrap();
        let result = extractor.extract(&path).unwrap();
        assert_eq!(result.text, "local text");
    }

    #[test]
    fn sidecar_uses_artifact_stem() {
        let dir = tempfile::tempdir().unwrap();
        let target = write_sidecar(
            &dir.path().join("ocr_text"),
            Path::new("/tmp/incoming/scan 01.pdf"),
            "hello",
        )
        .unwrap();
        assert!(target.ends_with("ocr_text/scan 01.txt"));
        assert_eq!(std::fs::read_to_string(target).unwrap(), "hello");
    }
}
