//! On-disk containers: unified `.tlock` files and legacy key-file/archive pairs.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use crate::envelope::{self, FrontMatter, ItemMetadata, MAX_HEADER_LEN};
use crate::error::{Result, VaultError};

pub mod legacy;
pub mod unified;

/// Write `parts` to a fresh file at `path`. Fails with `AlreadyExists` rather
/// than replacing an existing file.
pub fn write_new_atomic(path: &Path, parts: &[&[u8]]) -> io::Result<()> {
    let tmp = stage(path, parts)?;
    tmp.persist_noclobber(path).map_err(|e| e.error)?;
    sync_parent(path);
    Ok(())
}

/// Replace `path` with `parts` in one rename.
pub fn replace_atomic(path: &Path, parts: &[&[u8]]) -> io::Result<()> {
    let tmp = stage(path, parts)?;
    tmp.persist(path).map_err(|e| e.error)?;
    sync_parent(path);
    Ok(())
}

fn stage(path: &Path, parts: &[&[u8]]) -> io::Result<tempfile::NamedTempFile> {
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".tv-")
        .suffix(".partial")
        .tempfile_in(dir)?;
    for part in parts {
        tmp.write_all(part)?;
    }
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

fn sync_parent(_path: &Path) {
    #[cfg(unix)]
    {
        if let Some(dir) = _path.parent().filter(|d| !d.as_os_str().is_empty()) {
            // advisory; the file itself is already durable
            let _ = File::open(dir).and_then(|d| d.sync_all());
        }
    }
}

/// First bytes of a file, enough to hold any valid header.
pub fn read_prefix(path: &Path) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    File::open(path)?
        .take(MAX_HEADER_LEN as u64 + 4096)
        .read_to_end(&mut buf)?;
    Ok(buf)
}

/// Validated metadata plus the body offset, or a `Format` error for files that
/// carry no envelope at all.
pub fn parse_header(path: &Path, bytes: &[u8]) -> Result<(ItemMetadata, usize)> {
    let (fm, offset): (FrontMatter, usize) = envelope::split_bytes(bytes)?
        .ok_or_else(|| VaultError::Format(format!("{} has no metadata header", path.display())))?;
    Ok((fm.to_metadata()?, offset))
}
