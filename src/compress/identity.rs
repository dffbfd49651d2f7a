use super::{Compressor, FinishableWriter};
use crate::error::ArchiverError;
use std::io::{Read, Write};

pub struct IdentityCompressor;

struct PassThrough(Box<dyn Write + Send>);

impl Write for PassThrough {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl FinishableWriter for PassThrough {
    fn finish(self: Box<Self>) -> Result<(), ArchiverError> {
        Ok(())
    }
}

impl Compressor for IdentityCompressor {
    fn wrap_writer(&self, inner: Box<dyn Write + Send>) -> Box<dyn FinishableWriter> {
        Box::new(PassThrough(inner))
    }

    fn wrap_reader<'a>(&self, inner: Box<dyn Read + Send + 'a>) -> Box<dyn Read + Send + 'a> {
        inner
    }
}
