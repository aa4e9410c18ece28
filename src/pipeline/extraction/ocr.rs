use std::io::Write;
use std::time::Duration;

use super::command::CommandRunner;
use super::types::{mean_confidence, OcrEngine, OcrPageResult, OcrWord};
use super::ExtractionError;
use crate::config::OcrConfig;

/// Tesseract invoked as a CLI, asking for TSV output on stdout.
pub struct TesseractCli {
    binary: String,
    language: String,
    runner: CommandRunner,
}

impl TesseractCli {
    pub fn new(binary: &str, language: &str, timeout: Duration) -> Result<Self, ExtractionError> {
        Ok(Self {
            binary: binary.to_string(),
            language: language.to_string(),
            runner: CommandRunner::new(timeout)?,
        })
    }

    pub fn from_config(config: &OcrConfig) -> Result<Self, ExtractionError> {
        Self::new(
            &config.tesseract_binary,
            &config.language,
            Duration::from_secs(config.engine_timeout_seconds),
        )
    }
}

impl OcrEngine for TesseractCli {
    fn ocr_image(&self, image_bytes: &[u8]) -> Result<OcrPageResult, ExtractionError> {
        let mut input = tempfile::Builder::new()
            .prefix("scanroute-ocr-")
            .tempfile()?;
        input.write_all(image_bytes)?;
        input.flush()?;

        let args = vec![
            input.path().to_string_lossy().into_owned(),
            "stdout".to_string(),
            "-l".to_string(),
            self.language.clone(),
            "tsv".to_string(),
        ];
        let output = self.runner.run(&self.binary, &args)?;
        if !output.success {
            return Err(ExtractionError::OcrProcessing(format!(
                "{} exited with {:?}: {}",
                self.binary,
                output.code,
                output.stderr.trim()
            )));
        }

        Ok(page_from_tsv(&output.stdout))
    }
}

/// Mock OCR engine for unit testing without Tesseract.
pub struct MockOcrEngine {
    pub text: String,
    pub confidence: Option<f32>,
}

impl MockOcrEngine {
    pub fn new(text: &str, confidence: f32) -> Self {
        Self {
            text: text.to_string(),
            confidence: Some(confidence),
        }
    }

    /// Engine that reports no usable confidence at all.
    pub fn without_confidence(text: &str) -> Self {
        Self {
            text: text.to_string(),
            confidence: None,
        }
    }
}

impl OcrEngine for MockOcrEngine {
    fn ocr_image(&self, _image_bytes: &[u8]) -> Result<OcrPageResult, ExtractionError> {
        let words = self
            .text
            .split_whitespace()
            .map(|w| OcrWord {
                text: w.to_string(),
                confidence: self.confidence,
            })
            .collect();

        Ok(OcrPageResult {
            text: self.text.clone(),
            confidence: self.confidence,
            words,
        })
    }
}

/// Build a page result from Tesseract TSV output.
///
/// TSV columns: level page_num block_num par_num line_num word_num left top width height conf text
/// Level 5 rows are words. Words are rejoined per (block, paragraph, line).
/// Confidence is 0-100, scaled to 0.0-1.0; negative or non-numeric scores
/// are dropped from the page mean.
fn page_from_tsv(tsv: &str) -> OcrPageResult {
    let mut words = Vec::new();
    let mut lines: Vec<String> = Vec::new();
    let mut current_line: Option<(&str, &str, &str)> = None;

    for line in tsv.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 || fields[0].trim() != "5" {
            continue;
        }

        let confidence = fields[10]
            .trim()
            .parse::<f32>()
            .ok()
            .filter(|c| c.is_finite() && *c >= 0.0)
            .map(|c| (c / 100.0).min(1.0));

        let word = fields[11].trim();
        if word.is_empty() {
            // Blank words still carry a score
            words.push(OcrWord {
                text: String::new(),
                confidence,
            });
            continue;
        }

        let key = (fields[2], fields[3], fields[4]);
        if current_line == Some(key) {
            if let Some(text) = lines.last_mut() {
                text.push(' ');
                text.push_str(word);
            }
        } else {
            lines.push(word.to_string());
        }
        current_line = Some(key);

        words.push(OcrWord {
            text: word.to_string(),
            confidence,
        });
    }

    let confidence = mean_confidence(words.iter().map(|w| w.confidence));
    words.retain(|w| !w.text.is_empty());

    OcrPageResult {
        text: lines.join("\n"),
        confidence,
        words,
    }
}
