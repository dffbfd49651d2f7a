use super::{row_to_fields, RowWriter};
use crate::error::ArchiverError;
use serde_json::Value;
use std::io::Write;
use tokio_postgres::Row;

pub struct JsonlWriter {
    sink: Box<dyn Write + Send>,
    rows_written: u64,
}

impl JsonlWriter {
    pub fn new(sink: Box<dyn Write + Send>) -> Self {
        Self {
            sink,
            rows_written: 0,
        }
    }
}

impl RowWriter for JsonlWriter {
    fn write_row(&mut self, row: &Row) -> Result<(), ArchiverError> {
        let object: serde_json::Map<String, Value> = row_to_fields(row)?.into_iter().collect();
        let line = serde_json::to_string(&Value::Object(object)).map_err(|e| ArchiverError::Encoding {
            partition: String::new(),
            row: self.rows_written,
            source: e.into(),
        })?;
        self.sink
            .write_all(line.as_bytes())
            .and_then(|_| self.sink.write_all(b"\n"))
            .map_err(|e| ArchiverError::Encoding {
                partition: String::new(),
                row: self.rows_written,
                source: e.into(),
            })?;
        self.rows_written += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<u64, ArchiverError> {
        Ok(self.rows_written)
    }
}
