use super::{Compressor, FinishableWriter};
use crate::error::ArchiverError;
use std::io::{Read, Write};

pub struct ZstdCompressor {
    level: i32,
}

impl ZstdCompressor {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

struct ZstdWriter<'a>(zstd::stream::write::Encoder<'a, Box<dyn Write + Send>>);

impl Write for ZstdWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl FinishableWriter for ZstdWriter<'_> {
    fn finish(self: Box<Self>) -> Result<(), ArchiverError> {
        self.0
            .finish()
            .map_err(|e| ArchiverError::Compression {
                partition: String::new(),
                source: e.into(),
            })?;
        Ok(())
    }
}

impl Compressor for ZstdCompressor {
    fn wrap_writer(&self, inner: Box<dyn Write + Send>) -> Box<dyn FinishableWriter> {
        let encoder = zstd::stream::write::Encoder::new(inner, self.level)
            .expect("zstd encoder initialization cannot fail for valid levels");
        Box::new(ZstdWriter(encoder))
    }

    fn wrap_reader<'a>(&self, inner: Box<dyn Read + Send + 'a>) -> Box<dyn Read + Send + 'a> {
        Box::new(zstd::stream::read::Decoder::new(inner).expect("zstd decoder initialization cannot fail"))
    }
}
