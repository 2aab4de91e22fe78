use std::fs;
use std::path::Path;

use super::{parse_header, read_prefix, replace_atomic, write_new_atomic};
use crate::envelope::{self, ItemMetadata};
use crate::error::Result;

/// Header view of a unified file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnifiedHeader {
    pub metadata: ItemMetadata,
    pub body_offset: u64,
    pub payload_len: u64,
}

pub fn write_new(path: &Path, meta: &ItemMetadata, payload: &[u8]) -> std::io::Result<()> {
    meta.validate()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let header = envelope::encode(meta);
    write_new_atomic(path, &[header.as_bytes(), payload])
}

/// Reads only the header region.
pub fn read_header(path: &Path) -> Result<UnifiedHeader> {
    let len = fs::metadata(path)?.len();
    let prefix = read_prefix(path)?;
    let (metadata, offset) = parse_header(path, &prefix)?;
    Ok(UnifiedHeader {
        metadata,
        body_offset: offset as u64,
        payload_len: len.saturating_sub(offset as u64),
    })
}

pub fn read_full(path: &Path) -> Result<(ItemMetadata, Vec<u8>)> {
    let mut bytes = fs::read(path)?;
    let (metadata, offset) = parse_header(path, &bytes)?;
    let payload = bytes.split_off(offset);
    Ok((metadata, payload))
}

/// Swap the header, keeping the payload bytes as they are.
pub fn rewrite_metadata(path: &Path, meta: &ItemMetadata) -> Result<()> {
    meta.validate()?;
    let (_, payload) = read_full(path)?;
    let header = envelope::encode(meta);
    replace_atomic(path, &[header.as_bytes(), &payload])?;
    Ok(())
}
