use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use super::Archive;
use super::codec::{decode_payload, encode_payload};

/// Writes archive data to the given stream.
pub fn save<W: Write>(archive: &Archive, writer: W) -> Result<()> {
    let payload = encode_payload(archive)?;
    let mut gz = GzEncoder::new(writer, Compression::default());
    gz.write_all(&payload)
        .and_then(|_| gz.finish().map(|_| ()))
        .context("failed to write archive stream")
}

/// Reads archive data from the given stream.
pub fn load<R: Read>(reader: R) -> Result<Archive> {
    let mut payload = Vec::new();
    GzDecoder::new(reader)
        .read_to_end(&mut payload)
        .context("invalid archive format")?;
    decode_payload(&payload)
}

pub fn write_file(path: &Path, archive: &Archive) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create '{}'", path.display()))?;
    save(archive, file).with_context(|| format!("failed to write '{}'", path.display()))
}

pub fn read_file(path: &Path) -> Result<Archive> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open '{}'", path.display()))?;
    load(file).with_context(|| format!("failed to decode '{}'", path.display()))
}
