use super::{Compressor, FinishableWriter};
use crate::error::ArchiverError;
use std::io::{Read, Write};

pub struct Lz4Compressor;

struct Lz4Writer(lz4::Encoder<Box<dyn Write + Send>>);

impl Write for Lz4Writer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl FinishableWriter for Lz4Writer {
    fn finish(self: Box<Self>) -> Result<(), ArchiverError> {
        let (_inner, result) = self.0.finish();
        result.map_err(|e| ArchiverError::Compression {
            partition: String::new(),
            source: e.into(),
        })
    }
}

impl Compressor for Lz4Compressor {
    fn wrap_writer(&self, inner: Box<dyn Write + Send>) -> Box<dyn FinishableWriter> {
        let encoder = lz4::EncoderBuilder::new()
            .build(inner)
            .expect("lz4 encoder initialization cannot fail");
        Box::new(Lz4Writer(encoder))
    }

    fn wrap_reader<'a>(&self, inner: Box<dyn Read + Send + 'a>) -> Box<dyn Read + Send + 'a> {
        Box::new(lz4::Decoder::new(inner).expect("lz4 decoder initialization cannot fail"))
    }
}
