// pgvault/src/backup/compression.rs
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read};
use std::path::Path;

/// Streams `source` through a gzip encoder into a new file at `dest`.
/// Returns the number of uncompressed bytes consumed.
pub fn gzip_into_file<R: Read>(mut source: R, dest: &Path) -> io::Result<u64> {
    let file = File::create(dest)?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let copied = io::copy(&mut source, &mut encoder)?;

    let writer = encoder.finish()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(copied)
}

/// Decompresses the gzip file at `source` into `dest`, overwriting it.
pub fn gunzip_file(source: &Path, dest: &Path) -> io::Result<u64> {
    let input = File::open(source)?;
    let mut decoder = GzDecoder::new(BufReader::new(input));
    let mut output = BufWriter::new(File::create(dest)?);
    let copied = io::copy(&mut decoder, &mut output)?;
    output.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    Ok(copied)
}
