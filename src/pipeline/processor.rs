//! Document processing orchestrator.
//!
//! Drives one artifact at a time through the pipeline:
//! stability → allow-list → temp → OCR → fields → classify → gate →
//! stamp/verify → route → (forward) → audit.
//!
//! Every artifact that reaches a terminal outcome produces exactly one audit
//! record. Unexpected failures are contained per artifact and never stop
//! the sweep.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, Utc};

use crate::audit::{AuditRecord, AuditStatus, AuditTrail, CsvAuditLog, WriteReport};
use crate::config::{
    ConfigError, DeliveryConfig, LoggingConfig, NamingConfig, OcrConfig, PathsConfig, RoutingRules,
    WorkerConfig,
};
use crate::db::{DatabaseError, DocumentStore};
use crate::pipeline::classify::{Classification, Classifier};
use crate::pipeline::delivery::{
    apply_naming_convention, determine_route_hint, resolve_route_dir, DeliveryClient,
    DeliveryError, HttpTransport, ThreadSleeper,
};
use crate::pipeline::extraction::{
    write_sidecar, DocumentExtractor, ExternalCommandExtractor, ExtractionError,
    ExtractionResult, LopdfImageExtractor, TesseractCli, TextExtractor,
};
use crate::pipeline::fields::{extract_fields, MetadataRecord};
use crate::pipeline::forward::Forwarder;
use crate::pipeline::intake::{
    self, crc32_for_file, detect_file_format, dotted_extension, is_stable, metadata_hash,
    ExtensionAllowList, IntakeError,
};
use crate::pipeline::mail::{MailError, MailIntake, MailSource, SavedAttachment};
use crate::pipeline::provenance::{
    ProvenanceError, ProvenancePayload, ProvenanceStamper, VerifyOutcome,
};
use crate::pipeline::routing::{
    build_filename, document_id, is_personal, ConfidenceGate, FilenameParts, RouteOutcome,
    Router,
};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Unexpected failures while processing one artifact.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Intake failed: {0}")]
    Intake(#[from] IntakeError),

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Provenance stamping failed: {0}")]
    Provenance(#[from] ProvenanceError),

    #[error("Delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Mail intake failed: {0}")]
    Mail(#[from] MailError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Construction helpers
// ---------------------------------------------------------------------------

/// Local Tesseract extraction, fronted by the vendor command when one is configured.
pub fn build_extractor(config: &OcrConfig) -> Result<Box<dyn TextExtractor>, ProcessingError> {
    let local = DocumentExtractor::new(
        Box::new(TesseractCli::from_config(config)?),
        Box::new(LopdfImageExtractor),
    );
    match config.command.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        Some(command) => {
            tracing::info!(command, "Vendor OCR command configured");
            Ok(Box::new(ExternalCommandExtractor::new(
                command,
                Duration::from_secs(config.command_timeout_seconds),
                Box::new(local),
            )?))
        }
        None => Ok(Box::new(local)),
    }
}

/// CSV log plus SQLite store at the configured locations.
pub fn open_audit_trail(logging: &LoggingConfig) -> Result<AuditTrail, ProcessingError> {
    let store = DocumentStore::open(&logging.metadata_store)?;
    Ok(AuditTrail::new(vec![
        Box::new(CsvAuditLog::new(&logging.csv_log)),
        Box::new(store),
    ]))
}

/// Best-effort move of a failed artifact to needs-review.
fn contain_failure(artifact: &Path, needs_review_dir: &Path) -> Option<PathBuf> {
    if !artifact.exists() {
        return None;
    }
    match intake::relocate_unique(artifact, needs_review_dir) {
        Ok(path) => Some(path),
        Err(e) => {
            tracing::error!(
                path = %artifact.display(),
                error = %e,
                "Could not move failed artifact to review"
            );
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Scan worker
// ---------------------------------------------------------------------------

/// Result of one pass over the intake directory.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub processed: Vec<(PathBuf, AuditStatus)>,
    /// Files skipped because they were still being written.
    pub deferred: usize,
}

/// Everything the audit record needs from a run that reached a routing decision.
struct Processed {
    outcome: RouteOutcome,
    classification: Option<Classification>,
    combined_confidence: Option<f32>,
    ocr_confidence: Option<f32>,
    metadata: Option<MetadataRecord>,
    file_format: String,
}

pub struct DocumentProcessor {
    paths: PathsConfig,
    naming: NamingConfig,
    stability_wait: Duration,
    poll_interval: Duration,
    allow: ExtensionAllowList,
    extractor: Box<dyn TextExtractor>,
    classifier: Classifier,
    gate: ConfidenceGate,
    router: Router,
    stamper: ProvenanceStamper,
    forwarder: Forwarder,
    audit: AuditTrail,
}

impl DocumentProcessor {
    pub fn new(
        config: &WorkerConfig,
        rules: &RoutingRules,
        extractor: Box<dyn TextExtractor>,
        audit: AuditTrail,
    ) -> Self {
        Self {
            paths: config.paths.clone(),
            naming: config.naming.clone(),
            stability_wait: Duration::from_secs(config.polling.stability_check_seconds),
            poll_interval: Duration::from_secs(config.polling.interval_seconds),
            allow: ExtensionAllowList::new(&config.polling.allowed_extensions),
            extractor,
            classifier: Classifier::new(rules),
            gate: ConfidenceGate::new(config.classification.min_confidence),
            router: Router::new(&config.paths),
            stamper: ProvenanceStamper::new(&config.provenance),
            forwarder: Forwarder::new(&config.forwarding),
            audit,
        }
    }

    /// Production wiring: Tesseract/vendor extraction and both audit sinks.
    pub fn from_config(config: &WorkerConfig, rules: &RoutingRules) -> Result<Self, ProcessingError> {
        let extractor = build_extractor(&config.ocr)?;
        let audit = open_audit_trail(&config.logging)?;
        Ok(Self::new(config, rules, extractor, audit))
    }

    /// Process every file currently in the intake directory, in name order.
    pub fn sweep(&mut self) -> Result<SweepReport, ProcessingError> {
        intake::ensure_directory(&self.paths.raw_scans_dir)?;
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.paths.raw_scans_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        files.sort();

        let mut report = SweepReport::default();
        for path in files {
            match self.handle_file(&path) {
                Some(status) => report.processed.push((path, status)),
                None => report.deferred += 1,
            }
        }
        if !report.processed.is_empty() {
            tracing::info!(
                processed = report.processed.len(),
                deferred = report.deferred,
                "Sweep complete"
            );
        }
        Ok(report)
    }

    /// Poll forever. A failed sweep is logged and retried next interval.
    pub fn run(&mut self) {
        tracing::info!(
            intake = %self.paths.raw_scans_dir.display(),
            interval_secs = self.poll_interval.as_secs(),
            "Worker started"
        );
        loop {
            if let Err(e) = self.sweep() {
                tracing::error!(error = %e, "Sweep failed");
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Run one file through the pipeline.
    ///
    /// Returns `None` when the file is not stable yet (left for the next
    /// sweep, nothing recorded); otherwise the status of the single audit
    /// record written.
    pub fn handle_file(&mut self, path: &Path) -> Option<AuditStatus> {
        match is_stable(path, self.stability_wait) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(path = %path.display(), "File still changing, deferring");
                return None;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Stability check failed, deferring");
                return None;
            }
        }

        let mut artifact = path.to_path_buf();
        let record = match self.process(path, &mut artifact) {
            Ok(processed) => self.record_for(path, processed),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Processing failed");
                let mut record =
                    AuditRecord::new(AuditStatus::Error, path).with_error(e.to_string());
                if let Some(moved) = contain_failure(&artifact, &self.paths.needs_review_dir) {
                    record = record.with_final_path(&moved);
                }
                record
            }
        };
        Some(self.write(&record).status)
    }

    fn write(&mut self, record: &AuditRecord) -> WriteReport {
        let report = self.audit.record(record);
        if !report.fully_written() {
            tracing::error!(
                status = %report.status,
                failed = ?report.failed,
                "Audit record not written to every sink"
            );
        }
        report
    }

    /// `artifact` tracks where the file currently is, for error containment.
    fn process(&mut self, path: &Path, artifact: &mut PathBuf) -> Result<Processed, ProcessingError> {
        let file_format = detect_file_format(path);
        if !self.allow.is_allowed(path) {
            let outcome = self.router.reject_unrecognized(path, &file_format)?;
            return Ok(Processed {
                outcome,
                classification: None,
                combined_confidence: None,
                ocr_confidence: None,
                metadata: None,
                file_format,
            });
        }

        let original_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        *artifact = intake::relocate_unique(path, &self.paths.temp_dir)?;
        tracing::info!(from = %path.display(), to = %artifact.display(), "Artifact claimed");

        let extraction: ExtractionResult = self.extractor.extract(artifact)?;
        write_sidecar(&self.paths.ocr_text_dir, artifact, &extraction.text)?;

        let mut metadata = extract_fields(&extraction.text);
        metadata.insert_extra("file_format", file_format.as_str());
        metadata.insert_extra("ocr_method", extraction.method.as_str());

        let classification = self.classifier.classify(&extraction.text, Some(&metadata));
        let gate = self.gate.evaluate(
            classification.confidence,
            metadata.document_type.confidence,
            extraction.ocr_confidence,
        );
        tracing::info!(
            route_tag = %classification.route_tag,
            priority = %classification.priority,
            classification = classification.confidence,
            combined = gate.combined,
            "Classified"
        );

        let finish = |outcome: RouteOutcome, metadata: MetadataRecord| Processed {
            outcome,
            classification: Some(classification.clone()),
            combined_confidence: Some(gate.combined),
            ocr_confidence: extraction.ocr_confidence,
            metadata: Some(metadata),
            file_format: file_format.clone(),
        };

        if !gate.passed {
            let reason = format!("Combined confidence {:.2} below threshold", gate.combined);
            let outcome = self.router.needs_review(artifact, &reason)?;
            return Ok(finish(outcome, metadata));
        }

        let crc = crc32_for_file(artifact)?;
        let bytes = std::fs::read(&*artifact)?;
        let hash = metadata_hash(&extraction.text, &bytes);
        let personal = is_personal(&original_name, &metadata.document_type.value);
        metadata.insert_extra("metadata_hash", hash.as_str());
        metadata.insert_extra("is_personal", personal);

        if self.stamper.enabled() {
            let payload = ProvenancePayload::new(
                &metadata.document_type.value,
                &hash,
                &classification.route_tag,
            );
            let verification = self.stamper.stamp_and_verify(artifact, &payload)?;
            metadata.insert_extra("provenance", verify_label(&verification));
            if self.stamper.policy().rejects(&verification) {
                let outcome = self
                    .router
                    .needs_review(artifact, "Provenance verification failed")?;
                return Ok(finish(outcome, metadata));
            }
        }

        let extension = dotted_extension(artifact);
        let final_name = build_filename(&FilenameParts {
            date: Local::now().date_naive(),
            client_code: &self.naming.client_code,
            entity_code: &self.naming.entity_code,
            document_type: &metadata.document_type.value,
            document_id: document_id(metadata.primary_identifier(), &crc),
            route_tag: &classification.route_tag,
            priority: classification.priority,
            total: &metadata.total.value,
            extension: &extension,
        });
        let outcome = self
            .router
            .route(artifact, &final_name, personal, Utc::now())?;

        if let RouteOutcome::Accepted {
            final_path,
            personal: false,
        } = &outcome
        {
            if self.forwarder.enabled() {
                match self.forwarder.forward(final_path) {
                    Ok(eml) => metadata.insert_extra("forwarded_eml", eml.display().to_string()),
                    Err(e) => {
                        tracing::warn!(path = %final_path.display(), error = %e, "Forwarding failed");
                        metadata.insert_extra("forward_error", e.to_string());
                    }
                }
            }
        }

        Ok(finish(outcome, metadata))
    }

    fn record_for(&self, original: &Path, processed: Processed) -> AuditRecord {
        let outcome = &processed.outcome;
        let mut record = AuditRecord::new(outcome.status(), original)
            .with_final_path(outcome.final_path())
            .with_error(outcome.error_text());
        if let Some(metadata) = &processed.metadata {
            record = record.with_metadata(metadata);
        } else {
            record = record.with_field("file_format", processed.file_format.as_str());
        }
        if let Some(class) = &processed.classification {
            record = record.with_classification(&class.route_tag, class.priority.as_str());
        }
        if let Some(combined) = processed.combined_confidence {
            record = record.with_confidences(combined, processed.ocr_confidence);
        }
        record
    }
}

fn verify_label(outcome: &VerifyOutcome) -> &'static str {
    match outcome {
        VerifyOutcome::Verified => "verified",
        VerifyOutcome::Mismatch { .. } => "mismatch",
        VerifyOutcome::Missing => "missing",
    }
}

// ---------------------------------------------------------------------------
// E-mail variant
// ---------------------------------------------------------------------------

/// Mail attachments → stamp → remote delivery decision → routed folder.
pub struct EmailProcessor {
    paths: PathsConfig,
    delivery: DeliveryConfig,
    intake: MailIntake,
    extractor: Box<dyn TextExtractor>,
    client: DeliveryClient,
    router: Router,
    stamper: ProvenanceStamper,
    audit: AuditTrail,
}

impl EmailProcessor {
    pub fn new(
        config: &WorkerConfig,
        extractor: Box<dyn TextExtractor>,
        client: DeliveryClient,
        audit: AuditTrail,
    ) -> Self {
        Self {
            paths: config.paths.clone(),
            delivery: config.delivery.clone(),
            intake: MailIntake::new(&config.paths, &config.mail),
            extractor,
            client,
            router: Router::new(&config.paths),
            stamper: ProvenanceStamper::new(&config.provenance),
            audit,
        }
    }

    /// Production wiring: HTTP transport with real sleeps.
    pub fn from_config(config: &WorkerConfig) -> Result<Self, ProcessingError> {
        let transport = HttpTransport::new(&config.delivery)?;
        let client = DeliveryClient::new(Box::new(transport), Box::new(ThreadSleeper), &config.delivery);
        Ok(Self::new(
            config,
            build_extractor(&config.ocr)?,
            client,
            open_audit_trail(&config.logging)?,
        ))
    }

    /// Fetch unread mail and process every saved attachment.
    pub fn run_once(&mut self, source: &mut dyn MailSource) -> Result<Vec<AuditStatus>, ProcessingError> {
        let attachments = self.intake.fetch(source)?;
        Ok(attachments
            .iter()
            .map(|attachment| self.process_attachment(attachment))
            .collect())
    }

    pub fn process_attachment(&mut self, attachment: &SavedAttachment) -> AuditStatus {
        let record = match self.deliver(attachment) {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(
                    file = %attachment.local_path.display(),
                    error = %e,
                    "Attachment processing failed"
                );
                let mut record = AuditRecord::new(AuditStatus::Error, &attachment.local_path)
                    .with_error(e.to_string())
                    .with_field("original_filename", attachment.filename.as_str());
                if let Some(moved) =
                    contain_failure(&attachment.local_path, &self.paths.needs_review_dir)
                {
                    record = record.with_final_path(&moved);
                }
                record
            }
        };
        let report = self.audit.record(&record);
        if !report.fully_written() {
            tracing::error!(failed = ?report.failed, "Audit record not written to every sink");
        }
        report.status
    }

    fn deliver(&mut self, attachment: &SavedAttachment) -> Result<AuditRecord, ProcessingError> {
        let path = &attachment.local_path;
        let text = match self.extractor.extract(path) {
            Ok(result) => result.text,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "OCR failed, continuing without text");
                String::new()
            }
        };
        let bytes = std::fs::read(path)?;
        let hash = metadata_hash(&text, &bytes);
        let route_hint = determine_route_hint(&text);
        let document_type = if attachment.subject.trim().is_empty() {
            "email-attachment"
        } else {
            attachment.subject.as_str()
        };
        let payload = ProvenancePayload::new(document_type, &hash, route_hint);
        let payload_json = payload.to_json()?;

        let mut record = AuditRecord::new(AuditStatus::Ok, path)
            .with_field("source", attachment.source_email.as_str())
            .with_field("subject", attachment.subject.as_str())
            .with_field("original_filename", attachment.filename.as_str())
            .with_field("route_hint", route_hint)
            .with_field("metadata_hash", hash.as_str())
            .with_field("file_format", detect_file_format(path))
            .with_field("qr_payload", payload_json.as_str());

        if self.stamper.enabled() {
            let verification = self.stamper.stamp_and_verify(path, &payload)?;
            record = record.with_field("provenance", verify_label(&verification));
            if self.stamper.policy().rejects(&verification) {
                let outcome = self.router.needs_review(path, "Provenance verification failed")?;
                return Ok(outcome_record(record, &outcome));
            }
        }

        let metadata = serde_json::json!({
            "source": attachment.source_email,
            "subject": attachment.subject,
            "original_filename": attachment.filename,
            "route_hint": route_hint,
            "metadata_hash": hash,
        });
        let response = match self.client.deliver(path, &metadata) {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(file = %attachment.filename, error = %e, "Delivery failed, left in intake queue");
                record.status = AuditStatus::ForwardFailed;
                return Ok(record.with_final_path(path).with_error(e.to_string()));
            }
        };

        let (route, target_dir) =
            resolve_route_dir(response.route.as_deref(), &self.paths.processed_dir, &self.delivery);
        let fallback_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| attachment.filename.clone());
        let final_name = apply_naming_convention(&response, &fallback_name);
        let outcome = self.router.route_into(path, &target_dir, &final_name, false)?;

        record = record.with_classification(&route, "");
        Ok(outcome_record(record, &outcome))
    }
}

fn outcome_record(mut record: AuditRecord, outcome: &RouteOutcome) -> AuditRecord {
    record.status = outcome.status();
    record
        .with_final_path(outcome.final_path())
        .with_error(outcome.error_text())
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::trail::testing::MemorySink;
    use crate::pipeline::delivery::testing::{RecordingSleeper, ScriptedTransport};
    use crate::pipeline::delivery::DeliveryResponse;
    use crate::pipeline::extraction::MockOcrEngine;
    use crate::pipeline::mail::testing::{message, MemoryMailbox};

    const INVOICE_TEXT: &str = "Invoice #INV-10293 Total $482.10 due 2024-03-01";

    struct FailingExtractor;

    impl TextExtractor for FailingExtractor {
        fn extract(&self, _path: &Path) -> Result<ExtractionResult, ExtractionError> {
            Err(ExtractionError::OcrProcessing("engine crashed".into()))
        }
    }

    fn mock_extractor(text: &str, confidence: f32) -> Box<dyn TextExtractor> {
        Box::new(DocumentExtractor::new(
            Box::new(MockOcrEngine::new(text, confidence)),
            Box::new(LopdfImageExtractor),
        ))
    }

    fn test_config(root: &Path) -> WorkerConfig {
        let mut config = WorkerConfig::rooted_at(root);
        config.polling.stability_check_seconds = 0;
        config
    }

    fn processor(
        config: &WorkerConfig,
        extractor: Box<dyn TextExtractor>,
    ) -> (DocumentProcessor, MemorySink) {
        let sink = MemorySink::default();
        let audit = AuditTrail::new(vec![Box::new(sink.clone())]);
        let processor = DocumentProcessor::new(config, &RoutingRules::default(), extractor, audit);
        (processor, sink)
    }

    fn write_scan(dir: &Path, name: &str) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        image::RgbImage::from_pixel(1000, 800, image::Rgb([235, 235, 235]))
            .save(&path)
            .unwrap();
        path
    }

    fn files_in(dir: &Path) -> Vec<PathBuf> {
        match std::fs::read_dir(dir) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    #[test]
    fn invoice_is_stamped_and_staged() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let (mut processor, sink) = processor(&config, mock_extractor(INVOICE_TEXT, 0.95));
        let scan = write_scan(&config.paths.raw_scans_dir, "scan_001.png");

        assert_eq!(processor.handle_file(&scan), Some(AuditStatus::Ok));

        let staged = files_in(&config.paths.staging_dir);
        assert_eq!(staged.len(), 1);
        let name = staged[0].file_name().unwrap().to_str().unwrap().to_string();
        assert!(
            name.ends_with("__GEN__MAIN__INVOICE-INV-10293__AP__P2__482.10.png"),
            "{name}"
        );
        assert!(!scan.exists());
        assert!(files_in(&config.paths.temp_dir).is_empty());
        assert!(config.paths.ocr_text_dir.join("scan_001.txt").exists());

        let rows = sink.rows.borrow();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.route_tag, "AP");
        assert_eq!(row.priority, "P2");
        assert!(row.classification_confidence.unwrap() >= 0.8);
        assert_eq!(row.ocr_confidence, Some(0.95));
        let field = |k: &str| {
            row.metadata
                .iter()
                .find(|(key, _)| key == k)
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        };
        assert_eq!(field("document_type"), "invoice");
        assert_eq!(field("total"), "482.10");
        assert_eq!(field("provenance"), "verified");
        assert_eq!(field("file_format"), "png");
        assert_eq!(field("is_personal"), "false");
    }

    #[test]
    fn empty_text_goes_to_review() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let (mut processor, sink) = processor(&config, mock_extractor("", 0.0));
        let scan = write_scan(&config.paths.raw_scans_dir, "blank.png");

        assert_eq!(processor.handle_file(&scan), Some(AuditStatus::NeedsReview));
        assert!(config.paths.needs_review_dir.join("blank.png").exists());
        assert!(files_in(&config.paths.staging_dir).is_empty());
        let rows = sink.rows.borrow();
        assert_eq!(rows[0].classification_confidence, Some(0.0));
        assert!(rows[0].error.contains("below threshold"));
    }

    #[test]
    fn unrecognized_extension_keeps_original_name() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let (mut processor, sink) = processor(&config, mock_extractor(INVOICE_TEXT, 0.95));
        std::fs::create_dir_all(&config.paths.raw_scans_dir).unwrap();
        let doc = config.paths.raw_scans_dir.join("report.docx");
        std::fs::write(&doc, b"PK\x03\x04").unwrap();

        assert_eq!(
            processor.handle_file(&doc),
            Some(AuditStatus::UnrecognizedFormat)
        );
        assert!(config.paths.needs_review_dir.join("report.docx").exists());
        let rows = sink.rows.borrow();
        assert!(rows[0]
            .metadata
            .contains(&("file_format".to_string(), "docx".to_string())));
    }

    #[test]
    fn second_identical_name_is_held_as_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let (mut processor, sink) = processor(&config, mock_extractor(INVOICE_TEXT, 0.95));

        let first = write_scan(&config.paths.raw_scans_dir, "a.png");
        assert_eq!(processor.handle_file(&first), Some(AuditStatus::Ok));
        let staged_before = std::fs::read(&files_in(&config.paths.staging_dir)[0]).unwrap();

        let second = write_scan(&config.paths.raw_scans_dir, "b.png");
        assert_eq!(processor.handle_file(&second), Some(AuditStatus::Duplicate));

        let staged = files_in(&config.paths.staging_dir);
        assert_eq!(staged.len(), 1);
        assert_eq!(std::fs::read(&staged[0]).unwrap(), staged_before);
        assert!(config.paths.duplicate_hold_dir.join("b.png").exists());
        assert_eq!(
            sink.statuses(),
            vec![AuditStatus::Ok, AuditStatus::Duplicate]
        );
    }

    #[test]
    fn owner_documents_go_to_personal_storage() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let (mut processor, _sink) = processor(&config, mock_extractor(INVOICE_TEXT, 0.95));
        let scan = write_scan(&config.paths.raw_scans_dir, "owner_lease.png");

        assert_eq!(
            processor.handle_file(&scan),
            Some(AuditStatus::PersonalStored)
        );
        let day = config
            .paths
            .personal_storage_dir
            .join(Utc::now().format("%Y%m%d").to_string());
        assert_eq!(files_in(&day).len(), 1);
        assert!(files_in(&config.paths.staging_dir).is_empty());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&day).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }

    #[test]
    fn extraction_failure_is_contained() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let (mut processor, sink) = processor(&config, Box::new(FailingExtractor));
        let scan = write_scan(&config.paths.raw_scans_dir, "broken.png");

        assert_eq!(processor.handle_file(&scan), Some(AuditStatus::Error));
        assert!(config.paths.needs_review_dir.join("broken.png").exists());
        assert!(files_in(&config.paths.temp_dir).is_empty());

        let rows = sink.rows.borrow();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].error.contains("engine crashed"));
        assert!(rows[0].final_path.ends_with("broken.png"));
    }

    #[test]
    fn sweep_writes_one_record_per_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let (mut processor, sink) = processor(&config, mock_extractor(INVOICE_TEXT, 0.95));
        write_scan(&config.paths.raw_scans_dir, "a.png");
        write_scan(&config.paths.raw_scans_dir, "b.png");
        std::fs::write(config.paths.raw_scans_dir.join("c.txt"), b"notes").unwrap();

        let report = processor.sweep().unwrap();
        assert_eq!(report.processed.len(), 3);
        assert_eq!(report.deferred, 0);
        assert_eq!(
            sink.statuses(),
            vec![
                AuditStatus::Ok,
                AuditStatus::Duplicate,
                AuditStatus::UnrecognizedFormat
            ]
        );
        assert!(files_in(&config.paths.raw_scans_dir).is_empty());

        // every artifact sits in exactly one terminal location
        let terminal = files_in(&config.paths.staging_dir).len()
            + files_in(&config.paths.duplicate_hold_dir).len()
            + files_in(&config.paths.needs_review_dir).len();
        assert_eq!(terminal, 3);
    }

    #[test]
    fn forwarding_writes_outbox_message() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.forwarding.enabled = true;
        config.forwarding.books_email = "books@example.com".into();
        let (mut processor, sink) = processor(&config, mock_extractor(INVOICE_TEXT, 0.95));
        let scan = write_scan(&config.paths.raw_scans_dir, "scan.png");

        assert_eq!(processor.handle_file(&scan), Some(AuditStatus::Ok));
        let outbox = files_in(&config.forwarding.outbox_dir);
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].extension().unwrap(), "eml");
        assert!(sink.rows.borrow()[0]
            .metadata
            .iter()
            .any(|(k, _)| k == "forwarded_eml"));
    }

    #[test]
    fn disabled_provenance_skips_stamping() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.provenance.enabled = false;
        let (mut processor, _sink) = processor(&config, mock_extractor(INVOICE_TEXT, 0.95));
        let scan = write_scan(&config.paths.raw_scans_dir, "scan.png");
        let original = std::fs::read(&scan).unwrap();

        assert_eq!(processor.handle_file(&scan), Some(AuditStatus::Ok));
        let staged = files_in(&config.paths.staging_dir);
        assert_eq!(std::fs::read(&staged[0]).unwrap(), original);
    }

    #[test]
    fn missing_file_is_deferred_without_record() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let (mut processor, sink) = processor(&config, mock_extractor(INVOICE_TEXT, 0.95));

        assert_eq!(processor.handle_file(&dir.path().join("gone.png")), None);
        assert!(sink.rows.borrow().is_empty());
    }

    // ── E-mail variant ──

    fn email_processor(
        config: &WorkerConfig,
        transport: &ScriptedTransport,
        sleeper: &RecordingSleeper,
    ) -> (EmailProcessor, MemorySink) {
        let sink = MemorySink::default();
        let client = DeliveryClient::new(
            Box::new(transport.clone()),
            Box::new(sleeper.clone()),
            &config.delivery,
        );
        let processor = EmailProcessor::new(
            config,
            mock_extractor("Please pay this invoice", 0.9),
            client,
            AuditTrail::new(vec![Box::new(sink.clone())]),
        );
        (processor, sink)
    }

    fn png_bytes() -> Vec<u8> {
        let mut out = Vec::new();
        image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            1000,
            800,
            image::Rgb([235, 235, 235]),
        ))
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
        out
    }

    #[test]
    fn delivered_attachment_lands_in_route_folder() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let transport = ScriptedTransport::with(vec![Ok(DeliveryResponse {
            route: Some("ap".into()),
            naming_convention: Some("{vendor}_{number}.png".into()),
            metadata: serde_json::json!({"vendor": "Acme", "number": 42})
                .as_object()
                .unwrap()
                .clone(),
            ..Default::default()
        })]);
        let sleeper = RecordingSleeper::default();
        let (mut processor, sink) = email_processor(&config, &transport, &sleeper);

        let bytes = png_bytes();
        let mut mailbox = MemoryMailbox {
            messages: vec![message("m1", &[("scan.png", bytes.as_slice())])],
            ..Default::default()
        };
        let statuses = processor.run_once(&mut mailbox).unwrap();
        assert_eq!(statuses, vec![AuditStatus::Ok]);

        let delivered = config.paths.processed_dir.join("ap").join("Acme_42.png");
        assert!(delivered.exists());
        assert!(files_in(&config.paths.intake_queue_dir).is_empty());

        let calls = transport.calls.borrow();
        assert_eq!(calls[0].1["route_hint"], "AP");
        assert_eq!(calls[0].1["original_filename"], "scan.png");
        assert_eq!(sink.rows.borrow()[0].route_tag, "AP");
        assert_eq!(mailbox.seen, vec!["m1"]);
    }

    #[test]
    fn exhausted_delivery_records_forward_failed() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let transport = ScriptedTransport::default();
        let sleeper = RecordingSleeper::default();
        let (mut processor, sink) = email_processor(&config, &transport, &sleeper);

        let bytes = png_bytes();
        let mut mailbox = MemoryMailbox {
            messages: vec![message("m1", &[("scan.png", bytes.as_slice())])],
            ..Default::default()
        };
        let statuses = processor.run_once(&mut mailbox).unwrap();
        assert_eq!(statuses, vec![AuditStatus::ForwardFailed]);

        assert_eq!(files_in(&config.paths.intake_queue_dir).len(), 1);
        assert_eq!(
            *sleeper.slept.borrow(),
            vec![Duration::from_secs(3), Duration::from_secs(6)]
        );
        assert!(sink.rows.borrow()[0].error.contains("3 attempts"));
    }

    #[test]
    fn delivered_name_collision_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let response = DeliveryResponse {
            route: Some("AR".into()),
            final_filename: Some("receipt.png".into()),
            ..Default::default()
        };
        let transport = ScriptedTransport::with(vec![Ok(response.clone()), Ok(response)]);
        let sleeper = RecordingSleeper::default();
        let (mut processor, _sink) = email_processor(&config, &transport, &sleeper);

        let bytes = png_bytes();
        let mut mailbox = MemoryMailbox {
            messages: vec![
                message("m1", &[("a.png", bytes.as_slice())]),
                message("m2", &[("b.png", bytes.as_slice())]),
            ],
            ..Default::default()
        };
        let statuses = processor.run_once(&mut mailbox).unwrap();
        assert_eq!(statuses, vec![AuditStatus::Ok, AuditStatus::Duplicate]);
        assert!(config.paths.processed_dir.join("ar").join("receipt.png").exists());
        assert_eq!(files_in(&config.paths.duplicate_hold_dir).len(), 1);
    }
}
