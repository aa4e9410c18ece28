//! Dual-sink audit trail: a CSV log and the SQLite document store.

pub mod csv_log;
pub mod record;
pub mod schema;
pub mod trail;

pub use csv_log::CsvAuditLog;
pub use record::*;
pub use schema::ColumnRegistry;
pub use trail::{AuditSink, AuditTrail, WriteReport};

use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Invalid column name: {0:?}")]
    InvalidColumn(String),
}
