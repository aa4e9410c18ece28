use std::collections::HashSet;
use std::path::Path;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

use super::sqlite::{open_database, open_memory_database, table_columns};
use super::DatabaseError;
use crate::audit::schema::is_valid_column_name;
use crate::audit::{AuditError, AuditRecord, AuditSink};

const TABLE: &str = "documents";

/// Columns stored as REAL; everything else is TEXT.
const REAL_COLUMNS: &[&str] = &["classification_confidence", "ocr_confidence"];

/// Structured document store whose `documents` table grows a TEXT column
/// for every field name it is asked to hold. Columns are never dropped.
pub struct DocumentStore {
    conn: Connection,
}

impl DocumentStore {
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self {
            conn: open_database(path)?,
        })
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Ok(Self {
            conn: open_memory_database()?,
        })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Physical columns of the documents table, excluding the surrogate id.
    pub fn columns(&self) -> Result<Vec<String>, DatabaseError> {
        Ok(table_columns(&self.conn, TABLE)?
            .into_iter()
            .filter(|c| c != "id")
            .collect())
    }

    /// Add every column in `wanted` that the table lacks. Idempotent;
    /// comparison is case-insensitive like SQLite identifiers.
    ///
    /// All names are checked before the first ALTER, so an unquotable name
    /// leaves the schema unchanged.
    pub fn ensure_columns<S: AsRef<str>>(&self, wanted: &[S]) -> Result<Vec<String>, DatabaseError> {
        if let Some(bad) = wanted
            .iter()
            .map(|c| c.as_ref())
            .find(|c: &&str| !is_valid_column_name(c))
        {
            return Err(DatabaseError::InvalidColumn(bad.to_string()));
        }
        let mut existing: HashSet<String> = table_columns(&self.conn, TABLE)?
            .into_iter()
            .map(|c| c.to_ascii_lowercase())
            .collect();

        let mut added = Vec::new();
        for column in wanted {
            let column = column.as_ref();
            if !existing.insert(column.to_ascii_lowercase()) {
                continue;
            }
            self.conn
                .execute(&format!("ALTER TABLE {TABLE} ADD COLUMN \"{column}\" TEXT"), [])?;
            added.push(column.to_string());
        }
        if !added.is_empty() {
            tracing::info!(columns = ?added, "Document store schema extended");
        }
        Ok(added)
    }

    /// Insert one row of `(column, cell)` pairs, widening the table first.
    pub fn insert(&self, cells: &[(String, String)]) -> Result<i64, DatabaseError> {
        let names: Vec<&str> = cells.iter().map(|(k, _)| k.as_str()).collect();
        self.ensure_columns(&names)?;

        let column_list = names
            .iter()
            .map(|n| format!("\"{n}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=names.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let values = cells.iter().map(|(k, v)| to_value(k, v));

        self.conn.execute(
            &format!("INSERT INTO {TABLE} ({column_list}) VALUES ({placeholders})"),
            params_from_iter(values),
        )?;
        Ok(self.conn.last_insert_rowid())
    }
}

fn to_value(column: &str, cell: &str) -> Value {
    if REAL_COLUMNS.contains(&column) {
        return cell.parse::<f64>().map(Value::Real).unwrap_or(Value::Null);
    }
    Value::Text(cell.to_string())
}

impl AuditSink for DocumentStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn known_columns(&mut self) -> Result<Vec<String>, AuditError> {
        Ok(self.columns()?)
    }

    /// Unquotable names are left out of this sink; the rest of the row
    /// still lands.
    fn write(&mut self, record: &AuditRecord, columns: &[String]) -> Result<(), AuditError> {
        let columns: Vec<&str> = columns
            .iter()
            .map(String::as_str)
            .filter(|c| storable(c))
            .collect();
        self.ensure_columns(&columns)?;

        let cells: Vec<(String, String)> = record
            .cells()
            .into_iter()
            .filter(|(k, _)| storable(k))
            .collect();
        self.insert(&cells)?;
        Ok(())
    }
}

fn storable(column: &str) -> bool {
    let ok = is_valid_column_name(column);
    if !ok {
        tracing::warn!(column = %column.escape_debug(), "Column name cannot be stored, skipping");
    }
    ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditStatus;

    fn cells(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn ensure_columns_is_idempotent() {
        let store = DocumentStore::open_in_memory().unwrap();
        let before = store.columns().unwrap().len();

        let added = store.ensure_columns(&["vendor", "total"]).unwrap();
        assert_eq!(added, vec!["vendor", "total"]);
        assert!(store.ensure_columns(&["vendor", "TOTAL"]).unwrap().is_empty());
        assert_eq!(store.columns().unwrap().len(), before + 2);
    }

    #[test]
    fn insert_grows_schema_and_keeps_old_rows() {
        let store = DocumentStore::open_in_memory().unwrap();
        store
            .insert(&cells(&[("status", "OK"), ("vendor", "Acme")]))
            .unwrap();
        store
            .insert(&cells(&[("status", "DUPLICATE"), ("file_format", "pdf")]))
            .unwrap();

        let vendor: Option<String> = store
            .conn()
            .query_row(
                "SELECT vendor FROM documents WHERE status = 'DUPLICATE'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(vendor.is_none());

        let count: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn confidence_columns_store_reals() {
        let store = DocumentStore::open_in_memory().unwrap();
        store
            .insert(&cells(&[
                ("classification_confidence", "0.8"),
                ("ocr_confidence", ""),
            ]))
            .unwrap();
        let (class, ocr): (f64, Option<f64>) = store
            .conn()
            .query_row(
                "SELECT classification_confidence, ocr_confidence FROM documents",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert!((class - 0.8).abs() < 1e-9);
        assert!(ocr.is_none());
    }

    #[test]
    fn rejects_unquotable_column() {
        let store = DocumentStore::open_in_memory().unwrap();
        let err = store.ensure_columns(&["bad\"col"]).unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidColumn(_)));
    }

    #[test]
    fn one_bad_name_adds_no_columns() {
        let store = DocumentStore::open_in_memory().unwrap();
        let before = store.columns().unwrap();
        assert!(store.ensure_columns(&["vendor", "bad\"col"]).is_err());
        assert_eq!(store.columns().unwrap(), before);
    }

    #[test]
    fn audit_sink_skips_unstorable_fields_and_keeps_row() {
        let mut store = DocumentStore::open_in_memory().unwrap();
        let record = AuditRecord::new(AuditStatus::Ok, Path::new("/in/a.pdf"))
            .with_field("vendor", "Acme")
            .with_field("bad\"col", "x");
        store
            .write(&record, &["bad\"col".to_string(), "total".to_string()])
            .unwrap();

        let columns = store.known_columns().unwrap();
        assert!(columns.contains(&"total".to_string()));
        assert!(!columns.iter().any(|c| c.contains('"')));
        let vendor: String = store
            .conn()
            .query_row("SELECT vendor FROM documents", [], |row| row.get(0))
            .unwrap();
        assert_eq!(vendor, "Acme");
    }

    #[test]
    fn audit_sink_writes_registry_columns() {
        let mut store = DocumentStore::open_in_memory().unwrap();
        let record = AuditRecord::new(AuditStatus::PersonalStored, Path::new("/in/lease.pdf"))
            .with_field("is_personal", "true");
        store
            .write(&record, &["legacy_column".to_string()])
            .unwrap();

        let columns = store.known_columns().unwrap();
        assert!(columns.contains(&"legacy_column".to_string()));
        assert!(columns.contains(&"is_personal".to_string()));

        let status: String = store
            .conn()
            .query_row("SELECT status FROM documents", [], |row| row.get(0))
            .unwrap();
        assert_eq!(status, "PERSONAL_STORED");
    }

    #[test]
    fn reopened_file_store_keeps_added_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("documents.db");
        {
            let store = DocumentStore::open(&path).unwrap();
            store.insert(&cells(&[("vendor", "Acme")])).unwrap();
        }
        let store = DocumentStore::open(&path).unwrap();
        assert!(store.columns().unwrap().contains(&"vendor".to_string()));
    }
}
