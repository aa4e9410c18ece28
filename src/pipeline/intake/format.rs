use std::path::Path;

use serde::{Deserialize, Serialize};

/// How a document file is turned into OCR input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DocumentKind {
    /// Multi-page container; every page is rasterized and OCR'd.
    Paged,
    /// A single raster image, OCR'd directly.
    Image,
}

impl DocumentKind {
    /// Classify by lower-cased extension. `None` for anything else.
    pub fn from_path(path: &Path) -> Option<Self> {
        match detect_file_format(path).as_str() {
            "pdf" => Some(Self::Paged),
            "png" | "jpg" | "jpeg" | "tif" | "tiff" => Some(Self::Image),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paged => "paged",
            Self::Image => "image",
        }
    }
}

/// Lower-cased extension without the dot, or `"unknown"`.
pub fn detect_file_format(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| "unknown".into())
}

/// Lower-cased extension with the dot (".pdf"), or an empty string.
pub fn dotted_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}

/// Extension allow-list. Entries are normalized to ".ext" lower case.
/// An empty list admits every extension.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtensionAllowList {
    extensions: Vec<String>,
}

impl ExtensionAllowList {
    pub fn new<S: AsRef<str>>(extensions: &[S]) -> Self {
        let extensions = extensions
            .iter()
            .map(|e| e.as_ref().trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .map(|e| if e.starts_with('.') { e } else { format!(".{e}") })
            .collect();
        Self { extensions }
    }

    pub fn is_allowed(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        let ext = dotted_extension(path);
        self.extensions.iter().any(|allowed| *allowed == ext)
    }

    pub fn allows_name(&self, file_name: &str) -> bool {
        self.is_allowed(Path::new(file_name))
    }
}

/// Sanitize a filename: strip path components, limit length
pub fn sanitize_filename(original: &str) -> String {
    let name = Path::new(original)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document");

    let clean: String = name
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | '\0'))
        .take(255)
        .collect();

    if clean.is_empty() || clean == ".." {
        "document".to_string()
    } else {
        clean
    }
}
