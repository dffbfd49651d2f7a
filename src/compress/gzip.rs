use super::{Compressor, FinishableWriter};
use crate::error::ArchiverError;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;
use std::io::{Read, Write};

pub struct GzipCompressor {
    level: u32,
}

impl GzipCompressor {
    pub fn new(level: i32) -> Self {
        Self {
            level: level.clamp(0, 9) as u32,
        }
    }
}

struct GzipWriter(GzEncoder<Box<dyn Write + Send>>);

impl Write for GzipWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl FinishableWriter for GzipWriter {
    fn finish(self: Box<Self>) -> Result<(), ArchiverError> {
        self.0.finish().map_err(|e| ArchiverError::Compression {
            partition: String::new(),
            source: e.into(),
        })?;
        Ok(())
    }
}

impl Compressor for GzipCompressor {
    fn wrap_writer(&self, inner: Box<dyn Write + Send>) -> Box<dyn FinishableWriter> {
        Box::new(GzipWriter(GzEncoder::new(inner, GzLevel::new(self.level))))
    }

    fn wrap_reader<'a>(&self, inner: Box<dyn Read + Send + 'a>) -> Box<dyn Read + Send + 'a> {
        Box::new(GzDecoder::new(inner))
    }
}
