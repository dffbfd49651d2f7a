//! Stream compressors wrapping the file writer before rows are encoded.

pub mod gzip;
pub mod identity;
pub mod lz4;
pub mod zstd;

use crate::config::Compression;
use crate::error::ArchiverError;
use std::io::{Read, Write};

/// A compressor finalizes the underlying writer on `finish`, flushing any
/// trailer bytes (checksums, end-of-stream markers) before returning.
pub trait Compressor: Send {
    fn wrap_writer(&self, inner: Box<dyn Write + Send>) -> Box<dyn FinishableWriter>;

    /// Wrap a reader so its output is the decompressed byte stream. Used by
    /// anything that needs to read an archived artifact back out, rather
    /// than by the archive pipeline itself (which only ever writes).
    fn wrap_reader<'a>(&self, inner: Box<dyn Read + Send + 'a>) -> Box<dyn Read + Send + 'a>;
}

/// A writer that must be explicitly finished rather than relying on `Drop`,
/// so compression errors on the trailer surface to the caller.
pub trait FinishableWriter: Write + Send {
    fn finish(self: Box<Self>) -> Result<(), ArchiverError>;
}

pub fn new_compressor(compression: Compression, level: i32) -> Box<dyn Compressor> {
    match compression {
        Compression::Identity => Box::new(identity::IdentityCompressor),
        Compression::Gzip => Box::new(gzip::GzipCompressor::new(level)),
        Compression::Zstd => Box::new(zstd::ZstdCompressor::new(level)),
        Compression::Lz4 => Box::new(lz4::Lz4Compressor),
    }
}
