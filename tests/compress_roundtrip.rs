use pg_archiver::compress::new_compressor;
use pg_archiver::config::Compression;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

const PAYLOAD: &[u8] = b"hello partitioned world\nsecond line of the artifact\n";

#[derive(Clone)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn compress_payload(compression: Compression, level: i32) -> Vec<u8> {
    let compressor = new_compressor(compression, level);
    let shared = SharedBuf(Arc::new(Mutex::new(Vec::new())));
    let out = shared.0.clone();
    let mut writer = compressor.wrap_writer(Box::new(shared));
    writer.write_all(PAYLOAD).unwrap();
    writer.finish().unwrap();
    Arc::try_unwrap(out).unwrap().into_inner().unwrap()
}

#[test]
fn identity_roundtrips_exactly() {
    assert_eq!(compress_payload(Compression::Identity, 0), PAYLOAD);
}

fn roundtrip_via_reader(compression: Compression, level: i32) -> Vec<u8> {
    let out = compress_payload(compression, level);
    let compressor = new_compressor(compression, level);
    let mut reader = compressor.wrap_reader(Box::new(out.as_slice()));
    let mut decoded = Vec::new();
    reader.read_to_end(&mut decoded).unwrap();
    decoded
}

#[test]
fn zstd_output_decompresses_to_original() {
    assert_eq!(roundtrip_via_reader(Compression::Zstd, 3), PAYLOAD);
}

#[test]
fn gzip_output_decompresses_to_original() {
    assert_eq!(roundtrip_via_reader(Compression::Gzip, 6), PAYLOAD);
}

#[test]
fn lz4_output_decompresses_to_original() {
    assert_eq!(roundtrip_via_reader(Compression::Lz4, 0), PAYLOAD);
}
