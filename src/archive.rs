//! Zip bundles for large generated subtrees (timeseries), built at approval and
//! expanded again on publish or unlock.

use std::io::{Cursor, Read, Write};

use bytes::Bytes;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::crypto::sha256;

/// One file inside an archive. `name` is relative to the archived directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub data: Bytes,
}

pub fn build(entries: &[ArchiveEntry]) -> Result<Vec<u8>, ZipError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in entries {
        writer.start_file(entry.name.as_str(), options)?;
        writer.write_all(&entry.data)?;
    }

    Ok(writer.finish()?.into_inner())
}

pub fn extract(data: &[u8]) -> Result<Vec<ArchiveEntry>, ZipError> {
    let mut zip = ZipArchive::new(Cursor::new(data))?;
    let mut entries = Vec::with_capacity(zip.len());

    for inx in 0..zip.len() {
        let mut file = zip.by_index(inx)?;
        if file.is_dir() {
            continue;
        }
        let mut buf = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut buf)?;
        entries.push(ArchiveEntry {
            name: file.name().to_string(),
            data: Bytes::from(buf),
        });
    }

    Ok(entries)
}

/// True when `data` holds exactly `expected`, byte for byte.
pub fn verify(data: &[u8], expected: &[ArchiveEntry]) -> Result<bool, ZipError> {
    let mut actual = extract(data)?;
    if actual.len() != expected.len() {
        return Ok(false);
    }
    actual.sort_by(|a, b| a.name.cmp(&b.name));

    let mut expected: Vec<&ArchiveEntry> = expected.iter().collect();
    expected.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(actual
        .iter()
        .zip(expected)
        .all(|(a, e)| a.name == e.name && sha256(&a.data) == sha256(&e.data)))
}
