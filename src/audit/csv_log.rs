use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use super::record::AuditRecord;
use super::trail::AuditSink;
use super::AuditError;

/// Append-only tabular log whose header is the union of every column seen.
///
/// Each write reads the whole file, widens the header if needed and
/// rewrites it through a temp file in the same directory. Not safe with
/// more than one writer process.
pub struct CsvAuditLog {
    path: PathBuf,
}

struct Table {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl CsvAuditLog {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_table(&self) -> Result<Table, AuditError> {
        if !self.path.exists() {
            return Ok(Table {
                header: Vec::new(),
                rows: Vec::new(),
            });
        }
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)?;
        let header: Vec<String> = reader.headers()?.iter().map(String::from).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(String::from).collect());
        }
        Ok(Table { header, rows })
    }

    fn write_table(&self, table: &Table) -> Result<(), AuditError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut writer = csv::Writer::from_writer(tmp.as_file());
            writer.write_record(&table.header)?;
            for row in &table.rows {
                let padded = (0..table.header.len()).map(|i| row.get(i).map_or("", String::as_str));
                writer.write_record(padded)?;
            }
            writer.flush()?;
        }
        tmp.persist(&self.path).map_err(|e| AuditError::Io(e.error))?;
        Ok(())
    }
}

impl AuditSink for CsvAuditLog {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn known_columns(&mut self) -> Result<Vec<String>, AuditError> {
        Ok(self.read_table()?.header)
    }

    fn write(&mut self, record: &AuditRecord, columns: &[String]) -> Result<(), AuditError> {
        let mut table = self.read_table()?;

        let cells = record.cells();
        let seen: HashSet<String> =
            table.header.iter().map(|h| h.to_ascii_lowercase()).collect();
        let mut additions: Vec<String> = Vec::new();
        // The record's own columns lead; registry-only columns trail.
        for column in cells.iter().map(|(k, _)| k).chain(columns.iter()) {
            let key = column.to_ascii_lowercase();
            if !seen.contains(&key) && !additions.iter().any(|a| a.eq_ignore_ascii_case(column)) {
                additions.push(column.clone());
            }
        }
        if !additions.is_empty() {
            tracing::debug!(columns = ?additions, "Widening audit log header");
            table.header.extend(additions);
        }

        let by_name: HashMap<String, &str> = cells
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.as_str()))
            .collect();
        let row = table
            .header
            .iter()
            .map(|h| by_name.get(&h.to_ascii_lowercase()).copied().unwrap_or("").to_string())
            .collect();
        table.rows.push(row);

        self.write_table(&table)
    }
}
