use super::{row_to_fields, RowWriter};
use crate::error::ArchiverError;
use std::io::Write;
use tokio_postgres::Row;

pub struct CsvWriter {
    inner: Option<::csv::Writer<Box<dyn Write + Send>>>,
    rows_written: u64,
    header_written: bool,
}

impl CsvWriter {
    pub fn new(sink: Box<dyn Write + Send>) -> Self {
        Self {
            inner: Some(::csv::WriterBuilder::new().from_writer(sink)),
            rows_written: 0,
            header_written: false,
        }
    }

    fn write_header(&mut self, header: &[&str]) -> Result<(), ArchiverError> {
        let writer = self.inner.as_mut().expect("writer used after finish");
        writer.write_record(header).map_err(|e| ArchiverError::Encoding {
            partition: String::new(),
            row: 0,
            source: e.into(),
        })?;
        self.header_written = true;
        Ok(())
    }
}

fn value_to_field(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl RowWriter for CsvWriter {
    fn observe_columns(&mut self, columns: &[tokio_postgres::Column]) {
        if self.header_written {
            return;
        }
        let header: Vec<&str> = columns.iter().map(|c| c.name()).collect();
        let _ = self.write_header(&header);
    }

    fn write_row(&mut self, row: &Row) -> Result<(), ArchiverError> {
        let fields = row_to_fields(row)?;

        if !self.header_written {
            let header: Vec<&str> = fields.iter().map(|(name, _)| name.as_str()).collect();
            self.write_header(&header)?;
        }

        let writer = self.inner.as_mut().expect("writer used after finish");
        let record: Vec<String> = fields.iter().map(|(_, v)| value_to_field(v)).collect();
        writer.write_record(&record).map_err(|e| ArchiverError::Encoding {
            partition: String::new(),
            row: self.rows_written,
            source: e.into(),
        })?;
        self.rows_written += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<u64, ArchiverError> {
        if let Some(mut writer) = self.inner.take() {
            writer.flush().map_err(|e| ArchiverError::Encoding {
                partition: String::new(),
                row: self.rows_written,
                source: e.into(),
            })?;
        }
        Ok(self.rows_written)
    }
}
