use serde::{Deserialize, Serialize};

use super::ProvenanceError;

/// The tuple embedded in the stamp.
///
/// Fields are declared in lexical order so the serialized form has stable
/// key ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenancePayload {
    pub document_type: String,
    pub metadata_hash: String,
    pub route_hint: String,
}

impl ProvenancePayload {
    pub fn new(document_type: &str, metadata_hash: &str, route_hint: &str) -> Self {
        Self {
            document_type: document_type.to_string(),
            metadata_hash: metadata_hash.to_string(),
            route_hint: route_hint.to_string(),
        }
    }

    /// Compact JSON, identical for equal payloads.
    pub fn to_json(&self) -> Result<String, ProvenanceError> {
        Ok(serde_json::to_string(self)?)
    }

    /// True if `decoded` is this payload, byte-exact or as equivalent JSON.
    pub fn matches(&self, decoded: &str) -> bool {
        if self.to_json().is_ok_and(|json| json == decoded) {
            return true;
        }
        serde_json::from_str::<ProvenancePayload>(decoded).is_ok_and(|p| &p == self)
    }
}
