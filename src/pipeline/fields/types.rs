use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// An extracted value with its own confidence in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Field<T> {
    pub value: T,
    pub confidence: f32,
}

impl<T> Field<T> {
    pub fn new(value: T, confidence: f32) -> Self {
        Self { value, confidence }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    pub description: String,
    pub quantity: Option<String>,
    pub amount: Option<String>,
}

/// Loosely typed value for fields added after extraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    Real(f64),
    Flag(bool),
    Empty,
    Json(serde_json::Value),
}

impl MetadataValue {
    /// Cell rendering shared by both audit sinks.
    pub fn to_cell(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Real(v) => v.to_string(),
            Self::Flag(b) => b.to_string(),
            Self::Json(v) => v.to_string(),
            Self::Empty => String::new(),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

/// Structured candidate fields for one document.
///
/// `extra` holds any field that is not part of the fixed extractor set
/// (file format, personal flag, delivery metadata). Its keys become audit
/// columns on first use.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetadataRecord {
    pub document_type: Field<String>,
    pub vendor: Field<Option<String>>,
    pub total: Field<String>,
    pub identifiers: Field<Vec<String>>,
    pub dates: Field<Vec<String>>,
    pub line_items: Field<Vec<LineItem>>,
    #[serde(default)]
    pub extra: BTreeMap<String, MetadataValue>,
}

impl MetadataRecord {
    pub fn insert_extra(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        self.extra.insert(key.into(), value.into());
    }

    /// Flatten into `(column, cell)` pairs in a stable order.
    ///
    /// List-valued fields are JSON-encoded so the record fits a flat row.
    pub fn flatten(&self) -> Vec<(String, String)> {
        let mut out = vec![
            ("document_type".to_string(), self.document_type.value.clone()),
            (
                "document_type_confidence".to_string(),
                self.document_type.confidence.to_string(),
            ),
            (
                "vendor".to_string(),
                self.vendor.value.clone().unwrap_or_default(),
            ),
            (
                "vendor_confidence".to_string(),
                self.vendor.confidence.to_string(),
            ),
            ("total".to_string(), self.total.value.clone()),
            (
                "total_confidence".to_string(),
                self.total.confidence.to_string(),
            ),
            ("identifiers".to_string(), to_json(&self.identifiers.value)),
            (
                "identifier_confidence".to_string(),
                self.identifiers.confidence.to_string(),
            ),
            ("dates".to_string(), to_json(&self.dates.value)),
            (
                "date_confidence".to_string(),
                self.dates.confidence.to_string(),
            ),
            ("line_items".to_string(), to_json(&self.line_items.value)),
            (
                "line_item_confidence".to_string(),
                self.line_items.confidence.to_string(),
            ),
        ];
        out.extend(self.extra.iter().map(|(k, v)| (k.clone(), v.to_cell())));
        out
    }

    /// First extracted identifier, if any.
    pub fn primary_identifier(&self) -> Option<&str> {
        self.identifiers.value.first().map(String::as_str)
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}
