//! Row serialization formats.
//!
//! Partition rows are read as dynamically-typed `tokio_postgres::Row`s (the
//! column set isn't known until the partition is introspected), so every
//! writer goes through a common `pg_value_to_json` conversion before
//! encoding into its target format.

pub mod columnar;
pub mod csv;
pub mod jsonl;

use crate::config::OutputFormat;
use crate::error::ArchiverError;
use serde_json::Value;
use std::io::Write;
use tokio_postgres::types::Type;
use tokio_postgres::Row;

/// Sink for a stream of rows from a single partition. Implementations own
/// the underlying writer (usually a compressor wrapping a temp file) and
/// finalize it on `finish`.
pub trait RowWriter: Send {
    /// Called once before the first row, even if the partition turns out to
    /// be empty, so formats that need a header (CSV) can still write one.
    fn observe_columns(&mut self, _columns: &[tokio_postgres::Column]) {}
    fn write_row(&mut self, row: &Row) -> Result<(), ArchiverError>;
    fn finish(self: Box<Self>) -> Result<u64, ArchiverError>;
}

/// Construct the writer for a given output format, grouping writes to
/// `sink` (which is already wrapped in whatever compressor was requested).
pub fn new_writer(format: OutputFormat, sink: Box<dyn Write + Send>) -> Box<dyn RowWriter> {
    match format {
        OutputFormat::Jsonl => Box::new(jsonl::JsonlWriter::new(sink)),
        OutputFormat::Csv => Box::new(csv::CsvWriter::new(sink)),
        OutputFormat::Columnar => Box::new(columnar::ColumnarWriter::new(sink)),
    }
}

/// Convert one column of a row to a `serde_json::Value`, covering the
/// column types that occur in practice for partitioned fact tables. Types
/// outside this set fall back to their textual representation via
/// `try_get`, since `String`'s `FromSql` impl doesn't cover every Postgres
/// type (`numeric`, `bytea`, arrays, `inet`, ...) and a hard `.get()` would
/// panic on those instead of surfacing a recoverable error.
pub fn pg_value_to_json(row: &Row, idx: usize) -> Result<Value, ArchiverError> {
    let column = &row.columns()[idx];
    let value = match *column.type_() {
        Type::BOOL => row
            .get::<_, Option<bool>>(idx)
            .map(Value::from)
            .unwrap_or(Value::Null),
        Type::INT2 => row
            .get::<_, Option<i16>>(idx)
            .map(Value::from)
            .unwrap_or(Value::Null),
        Type::INT4 => row
            .get::<_, Option<i32>>(idx)
            .map(Value::from)
            .unwrap_or(Value::Null),
        Type::INT8 => row
            .get::<_, Option<i64>>(idx)
            .map(Value::from)
            .unwrap_or(Value::Null),
        Type::FLOAT4 => row
            .get::<_, Option<f32>>(idx)
            .map(|f| Value::from(f as f64))
            .unwrap_or(Value::Null),
        Type::FLOAT8 => row
            .get::<_, Option<f64>>(idx)
            .map(Value::from)
            .unwrap_or(Value::Null),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR => row
            .get::<_, Option<String>>(idx)
            .map(Value::from)
            .unwrap_or(Value::Null),
        Type::JSON | Type::JSONB => row
            .get::<_, Option<Value>>(idx)
            .unwrap_or(Value::Null),
        Type::UUID => row
            .get::<_, Option<uuid::Uuid>>(idx)
            .map(|u| Value::from(u.to_string()))
            .unwrap_or(Value::Null),
        Type::TIMESTAMPTZ => row
            .get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
            .map(|t| Value::from(t.to_rfc3339()))
            .unwrap_or(Value::Null),
        Type::TIMESTAMP => row
            .get::<_, Option<chrono::NaiveDateTime>>(idx)
            .map(|t| Value::from(t.to_string()))
            .unwrap_or(Value::Null),
        Type::DATE => row
            .get::<_, Option<chrono::NaiveDate>>(idx)
            .map(|d| Value::from(d.to_string()))
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<_, Option<String>>(idx)
            .map_err(|e| ArchiverError::Encoding {
                partition: String::new(),
                row: 0,
                source: e.into(),
            })?
            .map(Value::from)
            .unwrap_or(Value::Null),
    };
    Ok(value)
}

/// Flatten a row into an ordered `(column_name, value)` vec, preserving
/// query output order.
pub fn row_to_fields(row: &Row) -> Result<Vec<(String, Value)>, ArchiverError> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| pg_value_to_json(row, idx).map(|v| (col.name().to_string(), v)))
        .collect()
}
