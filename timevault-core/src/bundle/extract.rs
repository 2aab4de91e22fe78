use std::fs::{self, File};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use super::ProgressFn;
use super::header::{BundleHeader, HEADER_LEN};
use super::manifest::BundleManifest;
use crate::codec::CodecId;
use crate::error::{Result, VaultError};
use crate::stats::ArchiveStats;
use crate::util::hash_forward::HashingForward;

fn corrupt(msg: impl Into<String>) -> VaultError {
    VaultError::Format(msg.into())
}

/// Parse and verify header, manifest and data digest without touching the filesystem.
pub fn open_bundle(bytes: &[u8]) -> Result<(BundleHeader, BundleManifest, &[u8])> {
    let header = BundleHeader::read_from(bytes).map_err(|e| corrupt(format!("bundle header: {e}")))?;
    if header.total_len() != bytes.len() as u64 {
        return Err(corrupt(format!(
            "bundle length {} does not match header ({})",
            bytes.len(),
            header.total_len()
        )));
    }
    let man_start = HEADER_LEN as usize;
    let data_start = man_start + header.manifest_len as usize;
    let manifest: BundleManifest = ciborium::de::from_reader(&bytes[man_start..data_start])
        .map_err(|e| corrupt(format!("manifest decode: {e}")))?;
    let data = &bytes[data_start..];
    if blake3::hash(data).as_bytes() != &header.digest {
        return Err(corrupt("bundle digest mismatch"));
    }
    Ok((header, manifest, data))
}

pub fn unpack_bundle(bytes: &[u8], dest: &Path, progress: &mut ProgressFn<'_>) -> Result<ArchiveStats> {
    let (_, manifest, data) = open_bundle(bytes)?;
    fs::create_dir_all(dest)?;

    for d in &manifest.dirs {
        let p = safe_join(dest, &d.path)?;
        fs::create_dir_all(&p)?;
    }

    let total_u = manifest.original_size();
    let mut done_u = 0u64;
    for fe in &manifest.files {
        let end = fe
            .data_off
            .checked_add(fe.c_size)
            .filter(|&end| end <= data.len() as u64)
            .ok_or_else(|| corrupt(format!("entry {} out of bounds", fe.path)))?;
        let codec = CodecId::from_u8(fe.codec)
            .ok_or_else(|| corrupt(format!("unknown codec {} for {}", fe.codec, fe.path)))?;
        let outp = safe_join(dest, &fe.path)?;
        if let Some(parent) = outp.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut hasher = blake3::Hasher::new();
        let mut out = HashingForward::new(File::create(&outp)?, &mut hasher);
        let mut src = &data[fe.data_off as usize..end as usize];
        codec
            .decode(&mut src, &mut out)
            .map_err(|e| corrupt(format!("{}: {e}", fe.path)))?;
        out.flush()?;
        if out.counted != fe.u_size {
            return Err(corrupt(format!("extracted size mismatch for {}", fe.path)));
        }
        let file = out.into_inner();
        if hasher.finalize().as_bytes() != &fe.hash {
            return Err(corrupt(format!("content hash mismatch for {}", fe.path)));
        }
        file.sync_all()?;
        restore_mode(&file, fe.mode);

        done_u += fe.u_size;
        progress(&fe.path, done_u, total_u);
    }
    debug!(files = manifest.files.len(), dest = %dest.display(), "bundle unpacked");

    Ok(ArchiveStats {
        original_size: total_u,
        compressed_size: bytes.len() as u64,
        file_count: manifest.files.len() as u32,
    })
}

fn restore_mode(_file: &File, _mode: u32) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = _mode & 0o7777;
        if perms != 0 {
            // best effort; the content is already on disk
            let _ = _file.set_permissions(fs::Permissions::from_mode(perms));
        }
    }
}

pub(crate) fn safe_join(root: &Path, rel: &str) -> Result<PathBuf> {
    let p = Path::new(rel);
    let clean = p.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if rel.is_empty() || !clean {
        return Err(corrupt(format!("unsafe path: {rel}")));
    }
    Ok(root.join(p))
}
