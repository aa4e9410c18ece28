//! Confidence gating and final placement of an artifact.
//!
//! Expected outcomes (low confidence, duplicate name, unknown format) are
//! values of [`RouteOutcome`], never errors.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};

use crate::audit::AuditStatus;
use crate::config::PathsConfig;
use crate::pipeline::classify::Priority;
use crate::pipeline::intake::{self, IntakeError};

const PERSONAL_NAME_KEYWORDS: &[&str] = &["owner", "personal"];

// ---------------------------------------------------------------------------
// Confidence gate
// ---------------------------------------------------------------------------

/// `min(max(classification, document type), ocr)`; absent OCR confidence counts as 1.0.
pub fn combined_confidence(
    classification: f32,
    document_type: f32,
    ocr_confidence: Option<f32>,
) -> f32 {
    classification
        .max(document_type)
        .min(ocr_confidence.unwrap_or(1.0))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateDecision {
    pub combined: f32,
    pub passed: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ConfidenceGate {
    min_confidence: f32,
}

impl ConfidenceGate {
    pub fn new(min_confidence: f32) -> Self {
        Self { min_confidence }
    }

    pub fn evaluate(
        &self,
        classification: f32,
        document_type: f32,
        ocr_confidence: Option<f32>,
    ) -> GateDecision {
        let combined = combined_confidence(classification, document_type, ocr_confidence);
        GateDecision {
            combined,
            passed: combined >= self.min_confidence,
        }
    }
}

// ---------------------------------------------------------------------------
// Naming
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FilenameParts<'a> {
    pub date: NaiveDate,
    pub client_code: &'a str,
    pub entity_code: &'a str,
    pub document_type: &'a str,
    pub document_id: &'a str,
    pub route_tag: &'a str,
    pub priority: Priority,
    pub total: &'a str,
    /// Lower-cased, with the dot (".pdf").
    pub extension: &'a str,
}

/// `{date}__{client}__{entity}__{TYPE}-{id}__{route}__{priority}__{total}{ext}`
pub fn build_filename(parts: &FilenameParts<'_>) -> String {
    let doc_type = parts.document_type.to_uppercase().replace(' ', "_");
    format!(
        "{}__{}__{}__{}-{}__{}__{}__{}{}",
        parts.date.format("%Y-%m-%d"),
        parts.client_code,
        parts.entity_code,
        doc_type,
        parts.document_id,
        parts.route_tag,
        parts.priority,
        parts.total,
        parts.extension
    )
}

/// First identifier, else the first six hex digits of the checksum.
pub fn document_id<'a>(primary_identifier: Option<&'a str>, crc: &'a str) -> &'a str {
    primary_identifier.unwrap_or_else(|| crc.get(..6).unwrap_or(crc))
}

/// Personal when the artifact's name carries an owner/personal keyword or
/// the document type mentions "personal".
pub fn is_personal(file_name: &str, document_type: &str) -> bool {
    let name = file_name.to_lowercase();
    PERSONAL_NAME_KEYWORDS.iter().any(|k| name.contains(k))
        || document_type.to_lowercase().contains("personal")
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    Accepted {
        final_path: PathBuf,
        personal: bool,
    },
    NeedsReview {
        final_path: PathBuf,
        reason: String,
    },
    Duplicate {
        final_path: PathBuf,
        collided_with: PathBuf,
    },
    UnrecognizedFormat {
        final_path: PathBuf,
        file_format: String,
    },
}

impl RouteOutcome {
    pub fn status(&self) -> AuditStatus {
        match self {
            Self::Accepted { personal: true, .. } => AuditStatus::PersonalStored,
            Self::Accepted { .. } => AuditStatus::Ok,
            Self::NeedsReview { .. } => AuditStatus::NeedsReview,
            Self::Duplicate { .. } => AuditStatus::Duplicate,
            Self::UnrecognizedFormat { .. } => AuditStatus::UnrecognizedFormat,
        }
    }

    pub fn final_path(&self) -> &Path {
        match self {
            Self::Accepted { final_path, .. }
            | Self::NeedsReview { final_path, .. }
            | Self::Duplicate { final_path, .. }
            | Self::UnrecognizedFormat { final_path, .. } => final_path,
        }
    }

    /// Text for the audit record's error column.
    pub fn error_text(&self) -> String {
        match self {
            Self::NeedsReview { reason, .. } => reason.clone(),
            Self::Duplicate { .. } => "Duplicate file name".into(),
            _ => String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Performs the single terminal relocation of an artifact.
pub struct Router {
    paths: PathsConfig,
}

impl Router {
    pub fn new(paths: &PathsConfig) -> Self {
        Self {
            paths: paths.clone(),
        }
    }

    pub fn reject_unrecognized(
        &self,
        artifact: &Path,
        file_format: &str,
    ) -> Result<RouteOutcome, IntakeError> {
        let final_path = intake::relocate_unique(artifact, &self.paths.needs_review_dir)?;
        tracing::warn!(
            file_format,
            path = %final_path.display(),
            "Unrecognized file format, moved to review"
        );
        Ok(RouteOutcome::UnrecognizedFormat {
            final_path,
            file_format: file_format.to_string(),
        })
    }

    pub fn needs_review(&self, artifact: &Path, reason: &str) -> Result<RouteOutcome, IntakeError> {
        let final_path = intake::relocate_unique(artifact, &self.paths.needs_review_dir)?;
        tracing::warn!(reason, path = %final_path.display(), "Moved to review");
        Ok(RouteOutcome::NeedsReview {
            final_path,
            reason: reason.to_string(),
        })
    }

    /// Place an accepted artifact under `final_name` in staging, or in the
    /// dated personal store when `personal` is set.
    pub fn route(
        &self,
        artifact: &Path,
        final_name: &str,
        personal: bool,
        now: DateTime<Utc>,
    ) -> Result<RouteOutcome, IntakeError> {
        let target_dir = if personal {
            intake::ensure_personal_directory(&self.paths.personal_storage_dir, now)?
        } else {
            self.paths.staging_dir.clone()
        };
        self.route_into(artifact, &target_dir, final_name, personal)
    }

    /// Place an artifact under `final_name` in `target_dir`, diverting it to
    /// duplicate hold if that name is already taken there.
    pub fn route_into(
        &self,
        artifact: &Path,
        target_dir: &Path,
        final_name: &str,
        personal: bool,
    ) -> Result<RouteOutcome, IntakeError> {
        let candidate = target_dir.join(final_name);
        if candidate.exists() {
            let final_path = intake::relocate_unique(artifact, &self.paths.duplicate_hold_dir)?;
            tracing::warn!(
                existing = %candidate.display(),
                held = %final_path.display(),
                "Duplicate name, moved to duplicate hold"
            );
            return Ok(RouteOutcome::Duplicate {
                final_path,
                collided_with: candidate,
            });
        }

        let final_path = intake::relocate_as(artifact, target_dir, final_name)?;
        tracing::info!(
            path = %final_path.display(),
            destination = if personal { "personal storage" } else { "staging" },
            "Document routed"
        );
        Ok(RouteOutcome::Accepted {
            final_path,
            personal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn router(base: &Path) -> Router {
        Router::new(&PathsConfig::rooted_at(base))
    }

    fn artifact(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let temp = dir.join("data").join("temp");
        std::fs::create_dir_all(&temp).unwrap();
        let path = temp.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn combined_confidence_is_capped_by_ocr() {
        assert!((combined_confidence(0.8, 0.85, Some(0.6)) - 0.6).abs() < f32::EPSILON);
        assert!((combined_confidence(0.8, 0.3, None) - 0.8).abs() < f32::EPSILON);
        assert!((combined_confidence(0.2, 0.3, Some(0.0))).abs() < f32::EPSILON);
    }

    #[test]
    fn combined_confidence_is_monotonic() {
        let gate = ConfidenceGate::new(0.5);
        let steps = [0.0f32, 0.1, 0.3, 0.5, 0.7, 0.9, 1.0];
        for &c in &steps {
            for &d in &steps {
                for &o in &steps {
                    let base = gate.evaluate(c, d, Some(o));
                    for &bump in &[0.0f32, 0.05, 0.2] {
                        let raised = [
                            gate.evaluate((c + bump).min(1.0), d, Some(o)),
                            gate.evaluate(c, (d + bump).min(1.0), Some(o)),
                            gate.evaluate(c, d, Some((o + bump).min(1.0))),
                        ];
                        for r in raised {
                            assert!(r.combined >= base.combined);
                            assert!(!base.passed || r.passed);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn empty_text_floor_fails_any_positive_threshold() {
        let decision = ConfidenceGate::new(0.01).evaluate(0.2, 0.3, Some(0.0));
        assert!(!decision.passed);
        assert!(decision.combined.abs() < f32::EPSILON);
    }

    #[test]
    fn filename_layout() {
        let name = build_filename(&FilenameParts {
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            client_code: "GEN",
            entity_code: "MAIN",
            document_type: "purchase order",
            document_id: "PO-5521",
            route_tag: "AP",
            priority: Priority::P2,
            total: "482.10",
            extension: ".pdf",
        });
        assert_eq!(
            name,
            "2024-03-01__GEN__MAIN__PURCHASE_ORDER-PO-5521__AP__P2__482.10.pdf"
        );
    }

    #[test]
    fn document_id_falls_back_to_checksum_prefix() {
        assert_eq!(document_id(Some("INV-10293"), "cbf43926"), "INV-10293");
        assert_eq!(document_id(None, "cbf43926"), "cbf439");
    }

    #[test]
    fn personal_detection() {
        assert!(is_personal("owner_taxes.pdf", "document"));
        assert!(is_personal("scan.pdf", "Personal_Letter"));
        assert!(is_personal("My PERSONAL scan.pdf", "invoice"));
        assert!(!is_personal("scan.pdf", "invoice"));
    }

    #[test]
    fn accepted_goes_to_staging() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path());
        let src = artifact(dir.path(), "scan.pdf", b"one");

        let outcome = router
            .route(&src, "final.pdf", false, Utc::now())
            .unwrap();
        assert_eq!(outcome.status(), AuditStatus::Ok);
        assert!(outcome.final_path().ends_with("data/staging/final.pdf"));
        assert!(!src.exists());
    }

    #[test]
    fn personal_goes_to_dated_secure_store() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path());
        let src = artifact(dir.path(), "owner.pdf", b"one");
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap();

        let outcome = router.route(&src, "final.pdf", true, now).unwrap();
        assert_eq!(outcome.status(), AuditStatus::PersonalStored);
        assert!(outcome
            .final_path()
            .ends_with("data/personal/secure/20240502/final.pdf"));
    }

    #[cfg(unix)]
    #[test]
    fn personal_day_folder_stays_owner_only_after_route() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path());
        let src = artifact(dir.path(), "owner.pdf", b"one");
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap();

        let outcome = router.route(&src, "final.pdf", true, now).unwrap();
        let day = outcome.final_path().parent().unwrap().to_path_buf();
        let mode = std::fs::metadata(&day).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
    }

    #[test]
    fn second_artifact_with_same_name_is_held_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path());

        let first = artifact(dir.path(), "a.pdf", b"first");
        let first_outcome = router.route(&first, "same.pdf", false, Utc::now()).unwrap();

        let second = artifact(dir.path(), "b.pdf", b"second");
        let outcome = router.route(&second, "same.pdf", false, Utc::now()).unwrap();

        assert_eq!(outcome.status(), AuditStatus::Duplicate);
        assert!(outcome.final_path().ends_with("data/duplicate_hold/b.pdf"));
        assert_eq!(outcome.error_text(), "Duplicate file name");
        assert_eq!(std::fs::read(first_outcome.final_path()).unwrap(), b"first");
        assert_eq!(std::fs::read(outcome.final_path()).unwrap(), b"second");
        assert!(!second.exists());
    }

    #[test]
    fn unrecognized_keeps_original_name() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path());
        let src = artifact(dir.path(), "notes.docx", b"doc");

        let outcome = router.reject_unrecognized(&src, "docx").unwrap();
        assert_eq!(outcome.status(), AuditStatus::UnrecognizedFormat);
        assert!(outcome.final_path().ends_with("data/needs_review/notes.docx"));
        assert!(outcome.final_path().exists());
    }

    #[test]
    fn review_carries_reason() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path());
        let src = artifact(dir.path(), "faint.png", b"img");

        let outcome = router.needs_review(&src, "Low confidence 0.12").unwrap();
        assert_eq!(outcome.status(), AuditStatus::NeedsReview);
        assert_eq!(outcome.error_text(), "Low confidence 0.12");
    }
}
