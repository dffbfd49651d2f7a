use super::RowWriter;
use crate::error::ArchiverError;
use arrow::array::{
    ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter as ParquetArrowWriter;
use parquet::basic::Compression as ParquetCompression;
use parquet::file::properties::WriterProperties;
use std::io::Write;
use std::sync::Arc;
use tokio_postgres::types::Type as PgType;
use tokio_postgres::Row;

/// Number of rows buffered in column builders before being flushed into a
/// `RecordBatch` and handed to the parquet writer.
const BATCH_SIZE: usize = 4096;

enum ColumnBuilder {
    Bool(BooleanBuilder),
    Int(Int64Builder),
    Float(Float64Builder),
    Text(StringBuilder),
}

impl ColumnBuilder {
    fn for_type(ty: &PgType) -> (DataType, Self) {
        match *ty {
            PgType::BOOL => (DataType::Boolean, ColumnBuilder::Bool(BooleanBuilder::new())),
            PgType::INT2 | PgType::INT4 | PgType::INT8 => {
                (DataType::Int64, ColumnBuilder::Int(Int64Builder::new()))
            }
            PgType::FLOAT4 | PgType::FLOAT8 => {
                (DataType::Float64, ColumnBuilder::Float(Float64Builder::new()))
            }
            _ => (DataType::Utf8, ColumnBuilder::Text(StringBuilder::new())),
        }
    }

    fn append_row(&mut self, row: &Row, idx: usize) -> Result<(), ArchiverError> {
        match self {
            ColumnBuilder::Bool(b) => b.append_option(row.get::<_, Option<bool>>(idx)),
            ColumnBuilder::Int(b) => {
                let value = match *row.columns()[idx].type_() {
                    PgType::INT2 => row.get::<_, Option<i16>>(idx).map(|v| v as i64),
                    PgType::INT4 => row.get::<_, Option<i32>>(idx).map(|v| v as i64),
                    _ => row.get::<_, Option<i64>>(idx),
                };
                b.append_option(value);
            }
            ColumnBuilder::Float(b) => {
                let value = match *row.columns()[idx].type_() {
                    PgType::FLOAT4 => row.get::<_, Option<f32>>(idx).map(|v| v as f64),
                    _ => row.get::<_, Option<f64>>(idx),
                };
                b.append_option(value);
            }
            ColumnBuilder::Text(b) => {
                let value = super::pg_value_to_json(row, idx)?;
                match value {
                    serde_json::Value::Null => b.append_null(),
                    serde_json::Value::String(s) => b.append_value(s),
                    other => b.append_value(other.to_string()),
                }
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            ColumnBuilder::Bool(b) => Arc::new(b.finish()),
            ColumnBuilder::Int(b) => Arc::new(b.finish()),
            ColumnBuilder::Float(b) => Arc::new(b.finish()),
            ColumnBuilder::Text(b) => Arc::new(b.finish()),
        }
    }
}

pub struct ColumnarWriter {
    schema: Option<Arc<Schema>>,
    builders: Vec<ColumnBuilder>,
    writer: Option<ParquetArrowWriter<Box<dyn Write + Send>>>,
    sink: Option<Box<dyn Write + Send>>,
    buffered: usize,
    rows_written: u64,
}

impl ColumnarWriter {
    pub fn new(sink: Box<dyn Write + Send>) -> Self {
        Self {
            schema: None,
            builders: Vec::new(),
            writer: None,
            sink: Some(sink),
            buffered: 0,
            rows_written: 0,
        }
    }

    fn ensure_initialized(&mut self, columns: &[tokio_postgres::Column]) -> Result<(), ArchiverError> {
        if self.schema.is_some() {
            return Ok(());
        }
        let mut fields = Vec::with_capacity(columns.len());
        let mut builders = Vec::with_capacity(columns.len());
        for col in columns {
            let (data_type, builder) = ColumnBuilder::for_type(col.type_());
            fields.push(Field::new(col.name(), data_type, true));
            builders.push(builder);
        }
        let schema = Arc::new(Schema::new(fields));
        let props = WriterProperties::builder()
            .set_compression(ParquetCompression::SNAPPY)
            .build();
        let sink = self.sink.take().expect("sink taken twice");
        let writer = ParquetArrowWriter::try_new(sink, schema.clone(), Some(props)).map_err(|e| {
            ArchiverError::Encoding {
                partition: String::new(),
                row: 0,
                source: e.into(),
            }
        })?;
        self.schema = Some(schema);
        self.builders = builders;
        self.writer = Some(writer);
        Ok(())
    }

    fn flush_batch(&mut self) -> Result<(), ArchiverError> {
        if self.buffered == 0 {
            return Ok(());
        }
        let schema = self.schema.clone().expect("schema initialized before flush");
        let arrays: Vec<ArrayRef> = self.builders.iter_mut().map(|b| b.finish()).collect();
        let batch = RecordBatch::try_new(schema, arrays).map_err(|e| ArchiverError::Encoding {
            partition: String::new(),
            row: self.rows_written,
            source: e.into(),
        })?;
        self.writer
            .as_mut()
            .expect("writer initialized before flush")
            .write(&batch)
            .map_err(|e| ArchiverError::Encoding {
                partition: String::new(),
                row: self.rows_written,
                source: e.into(),
            })?;
        self.buffered = 0;
        Ok(())
    }
}

impl RowWriter for ColumnarWriter {
    fn observe_columns(&mut self, columns: &[tokio_postgres::Column]) {
        let _ = self.ensure_initialized(columns);
    }

    fn write_row(&mut self, row: &Row) -> Result<(), ArchiverError> {
        self.ensure_initialized(row.columns())?;
        for (idx, builder) in self.builders.iter_mut().enumerate() {
            builder.append_row(row, idx)?;
        }
        self.buffered += 1;
        self.rows_written += 1;
        if self.buffered >= BATCH_SIZE {
            self.flush_batch()?;
        }
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<u64, ArchiverError> {
        self.flush_batch()?;
        if let Some(writer) = self.writer.take() {
            writer.close().map_err(|e| ArchiverError::Encoding {
                partition: String::new(),
                row: self.rows_written,
                source: e.into(),
            })?;
        }
        Ok(self.rows_written)
    }
}
