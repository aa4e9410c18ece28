use super::record::{AuditRecord, AuditStatus};
use super::schema::ColumnRegistry;
use super::AuditError;

/// A destination for audit records.
pub trait AuditSink {
    fn name(&self) -> &'static str;

    /// Columns already present in the sink's physical schema.
    fn known_columns(&mut self) -> Result<Vec<String>, AuditError>;

    /// Persist one record. `columns` is the full registry at write time;
    /// the sink widens its schema to cover it.
    fn write(&mut self, record: &AuditRecord, columns: &[String]) -> Result<(), AuditError>;
}

/// Which sinks accepted a record.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteReport {
    pub status: AuditStatus,
    pub written: Vec<&'static str>,
    pub failed: Vec<(&'static str, String)>,
}

impl WriteReport {
    pub fn fully_written(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Fans each record out to every sink.
///
/// All sinks share one [`ColumnRegistry`], so their schemas grow in
/// step. A sink failure is logged and reported; it never stops the other
/// sinks and never undoes a relocation that already happened.
pub struct AuditTrail {
    sinks: Vec<Box<dyn AuditSink>>,
    registry: ColumnRegistry,
}

impl AuditTrail {
    pub fn new(mut sinks: Vec<Box<dyn AuditSink>>) -> Self {
        let mut registry = ColumnRegistry::default();
        for sink in sinks.iter_mut() {
            match sink.known_columns() {
                Ok(columns) => {
                    registry.extend(columns);
                }
                Err(e) => tracing::warn!(sink = sink.name(), error = %e, "Could not read sink schema"),
            }
        }
        Self { sinks, registry }
    }

    pub fn registry(&self) -> &ColumnRegistry {
        &self.registry
    }

    pub fn record(&mut self, record: &AuditRecord) -> WriteReport {
        let cells = record.cells();
        let added = self.registry.extend(cells.iter().map(|(k, _)| k));
        if !added.is_empty() {
            tracing::info!(columns = ?added, "New audit columns registered");
        }

        let columns = self.registry.columns().to_vec();
        let mut report = WriteReport {
            status: record.status,
            written: Vec::new(),
            failed: Vec::new(),
        };
        for sink in self.sinks.iter_mut() {
            match sink.write(record, &columns) {
                Ok(()) => report.written.push(sink.name()),
                Err(e) => {
                    tracing::error!(
                        sink = sink.name(),
                        status = %record.status,
                        original_path = %record.original_path,
                        error = %e,
                        "Audit sink write failed"
                    );
                    report.failed.push((sink.name(), e.to_string()));
                }
            }
        }

        tracing::info!(
            status = %record.status,
            original_path = %record.original_path,
            final_path = %record.final_path,
            "Audit record written"
        );
        report
    }
}
