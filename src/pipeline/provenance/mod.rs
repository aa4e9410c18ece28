//! Provenance QR stamping and verification.
//!
//! A compact JSON payload binding the document type, a content hash and
//! the route hint is drawn as a QR code onto the routed artifact: the
//! bottom-right corner of a raster image, or the first page of a PDF.
//! Verification decodes every code it can find and compares it with the
//! payload that was stamped.

pub mod payload;
pub mod qr;
pub mod stamp;

pub use payload::ProvenancePayload;
pub use stamp::{read_codes, stamp_file};

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ProvenanceConfig;

#[derive(Error, Debug)]
pub enum ProvenanceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Payload serialization failed: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("QR encoding failed: {0}")]
    QrEncode(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("PDF error: {0}")]
    Pdf(String),

    #[error("Cannot stamp {}: unsupported format", .0.display())]
    UnsupportedFormat(PathBuf),
}

/// What to do when the decoded code does not match the stamped payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityPolicy {
    /// Log and keep routing.
    #[default]
    Warn,
    /// Send the artifact to needs-review.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified,
    /// A code was found but carries a different payload.
    Mismatch { decoded: String },
    /// No decodable code was found.
    Missing,
}

impl VerifyOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified)
    }
}

impl IntegrityPolicy {
    /// Whether `outcome` must stop the artifact from being accepted.
    pub fn rejects(&self, outcome: &VerifyOutcome) -> bool {
        *self == Self::Reject && !outcome.is_verified()
    }
}

/// Stamps artifacts in place and reads the stamp back.
pub struct ProvenanceStamper {
    enabled: bool,
    policy: IntegrityPolicy,
}

impl ProvenanceStamper {
    pub fn new(config: &ProvenanceConfig) -> Self {
        Self {
            enabled: config.enabled,
            policy: config.on_mismatch,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn policy(&self) -> IntegrityPolicy {
        self.policy
    }

    /// Stamp `path` with `payload`, then decode it back.
    ///
    /// A mismatch or missing code is logged as an integrity warning; the
    /// stamp is never rolled back.
    pub fn stamp_and_verify(
        &self,
        path: &Path,
        payload: &ProvenancePayload,
    ) -> Result<VerifyOutcome, ProvenanceError> {
        let encoded = payload.to_json()?;
        stamp_file(path, &encoded)?;
        tracing::info!(path = %path.display(), "Provenance code stamped");

        let outcome = verify(path, payload)?;
        match &outcome {
            VerifyOutcome::Verified => {
                tracing::debug!(path = %path.display(), "Provenance code verified")
            }
            VerifyOutcome::Mismatch { decoded } => tracing::warn!(
                path = %path.display(),
                expected = %encoded,
                decoded = %decoded,
                policy = ?self.policy,
                "Provenance payload mismatch"
            ),
            VerifyOutcome::Missing => tracing::warn!(
                path = %path.display(),
                policy = ?self.policy,
                "Provenance code could not be decoded"
            ),
        }
        Ok(outcome)
    }
}

/// Decode every code in `path` and compare against `expected`.
pub fn verify(path: &Path, expected: &ProvenancePayload) -> Result<VerifyOutcome, ProvenanceError> {
    let codes = read_codes(path)?;
    if codes.iter().any(|c| expected.matches(c)) {
        return Ok(VerifyOutcome::Verified);
    }
    Ok(match codes.into_iter().next() {
        Some(decoded) => VerifyOutcome::Mismatch { decoded },
        None => VerifyOutcome::Missing,
    })
}
