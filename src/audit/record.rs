use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::fields::MetadataRecord;

/// Terminal status of one artifact's pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Ok,
    NeedsReview,
    Duplicate,
    UnrecognizedFormat,
    PersonalStored,
    Error,
    ForwardFailed,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::NeedsReview => "NEEDS_REVIEW",
            Self::Duplicate => "DUPLICATE",
            Self::UnrecognizedFormat => "UNRECOGNIZED_FORMAT",
            Self::PersonalStored => "PERSONAL_STORED",
            Self::Error => "ERROR",
            Self::ForwardFailed => "FORWARD_FAILED",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row per terminal outcome per artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub original_path: String,
    pub final_path: String,
    pub route_tag: String,
    pub priority: String,
    pub status: AuditStatus,
    pub error: String,
    pub classification_confidence: Option<f32>,
    pub ocr_confidence: Option<f32>,
    /// Flattened metadata columns, in record order.
    pub metadata: Vec<(String, String)>,
}

/// Base columns every record carries, in output order.
pub const BASE_COLUMNS: &[&str] = &[
    "timestamp",
    "original_path",
    "final_path",
    "route_tag",
    "priority",
    "status",
    "error",
    "classification_confidence",
    "ocr_confidence",
];

impl AuditRecord {
    pub fn new(status: AuditStatus, original_path: &Path) -> Self {
        Self {
            timestamp: Utc::now(),
            original_path: original_path.display().to_string(),
            final_path: String::new(),
            route_tag: String::new(),
            priority: String::new(),
            status,
            error: String::new(),
            classification_confidence: None,
            ocr_confidence: None,
            metadata: Vec::new(),
        }
    }

    pub fn with_final_path(mut self, path: &Path) -> Self {
        self.final_path = path.display().to_string();
        self
    }

    pub fn with_classification(mut self, route_tag: &str, priority: &str) -> Self {
        self.route_tag = route_tag.to_string();
        self.priority = priority.to_string();
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = error.into();
        self
    }

    pub fn with_confidences(mut self, classification: f32, ocr: Option<f32>) -> Self {
        self.classification_confidence = Some(classification);
        self.ocr_confidence = ocr;
        self
    }

    pub fn with_metadata(mut self, metadata: &MetadataRecord) -> Self {
        self.metadata = metadata.flatten();
        self
    }

    pub fn with_field(mut self, key: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        match self.metadata.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value,
            None => self.metadata.push((key.to_string(), value)),
        }
        self
    }

    /// All `(column, cell)` pairs: base columns first, then metadata.
    ///
    /// Metadata keys that collide with a base column are dropped.
    pub fn cells(&self) -> Vec<(String, String)> {
        let confidence = |c: Option<f32>| c.map(|v| v.to_string()).unwrap_or_default();
        let mut cells = vec![
            ("timestamp".to_string(), self.timestamp.to_rfc3339()),
            ("original_path".to_string(), self.original_path.clone()),
            ("final_path".to_string(), self.final_path.clone()),
            ("route_tag".to_string(), self.route_tag.clone()),
            ("priority".to_string(), self.priority.clone()),
            ("status".to_string(), self.status.as_str().to_string()),
            ("error".to_string(), self.error.clone()),
            (
                "classification_confidence".to_string(),
                confidence(self.classification_confidence),
            ),
            (
                "ocr_confidence".to_string(),
                confidence(self.ocr_confidence),
            ),
        ];
        cells.extend(
            self.metadata
                .iter()
                .filter(|(k, _)| !BASE_COLUMNS.contains(&k.as_str()))
                .cloned(),
        );
        cells
    }
}
