use std::fs;
use std::path::{Component, Path, PathBuf};

use rayon::prelude::*;
use time::OffsetDateTime;
use tracing::debug;
use walkdir::WalkDir;

use super::ProgressFn;
use super::header::{BundleHeader, HEADER_LEN, VERSION};
use super::manifest::{BundleManifest, DirEntry, FileEntry, Meta};
use crate::codec::{self, CodecId, DEFAULT_LEVEL};
use crate::error::{Result, VaultError};
use crate::stats::ArchiveStats;
use crate::util::hash_forward::HashingForward;

#[derive(Clone, Debug)]
pub struct PackOptions {
    /// When true, zero timestamps in manifest for deterministic output.
    pub deterministic: bool,
    /// Only accept compression if it saves at least this fraction.
    /// e.g. 0.05 means "compress only if >=5% smaller than STORE".
    pub min_gain: f32,
    pub level: i32,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            deterministic: false,
            min_gain: 0.05,
            level: DEFAULT_LEVEL,
        }
    }
}

fn effective_min_gain(opts: &PackOptions) -> f32 {
    if opts.min_gain <= 0.0 { 0.05 } else { opts.min_gain }
}

fn mode_from(_md: &fs::Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        _md.permissions().mode()
    }
    #[cfg(not(unix))]
    {
        0o100644
    }
}

fn mtime_from(md: &fs::Metadata) -> i64 {
    md.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// `/`-joined path of `path` below `base`.
fn rel_path(path: &Path, base: &Path) -> Result<String> {
    let rel = path.strip_prefix(base).map_err(|_| {
        VaultError::Format(format!("{} is outside {}", path.display(), base.display()))
    })?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Ok(parts.join("/"))
}

struct FilePlan {
    rel: String,
    mode: u32,
    mtime: i64,
    u_size: u64,
    codec: CodecId,
    hash: [u8; 32],
    payload: Vec<u8>,
}

/// Pack a single file or a directory tree. Entries are named relative to the
/// source's parent, so the source's own name is the top-level entry.
pub fn pack_bundle(
    source: &Path,
    opts: &PackOptions,
    progress: &mut ProgressFn<'_>,
) -> Result<(Vec<u8>, ArchiveStats)> {
    let base = source
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut files: Vec<PathBuf> = Vec::new();
    let mut dirs: Vec<PathBuf> = Vec::new();
    for e in WalkDir::new(source).follow_links(false).sort_by_file_name() {
        let e = e.map_err(|e| std::io::Error::other(e.to_string()))?;
        if e.file_type().is_dir() {
            dirs.push(e.path().to_path_buf());
        } else if e.file_type().is_file() {
            files.push(e.path().to_path_buf());
        }
        // symlinks are not archived
    }
    files.sort();
    dirs.sort();

    let min_gain = effective_min_gain(opts);

    let plans: Vec<FilePlan> = files
        .par_iter() // each file independent
        .map(|src| -> Result<FilePlan> {
            let md = fs::metadata(src)?;
            let raw = fs::read(src)?;
            let u_size = raw.len() as u64;
            let hash = *blake3::hash(&raw).as_bytes();
            let (codec, payload) = codec::encode(raw, opts.level, min_gain)?;
            Ok(FilePlan {
                rel: rel_path(src, &base)?,
                mode: mode_from(&md),
                mtime: if opts.deterministic { 0 } else { mtime_from(&md) },
                u_size,
                codec,
                hash,
                payload,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let total_u: u64 = plans.iter().map(|p| p.u_size).sum();
    let mut hasher = blake3::Hasher::new();
    let mut data = Vec::with_capacity(plans.iter().map(|p| p.payload.len()).sum());
    let mut file_entries = Vec::with_capacity(plans.len());
    let mut done_u = 0u64;
    {
        let mut fwd = HashingForward::new(&mut data, &mut hasher);
        for plan in &plans {
            let data_off = fwd.counted;
            std::io::Write::write_all(&mut fwd, &plan.payload)?;
            file_entries.push(FileEntry {
                path: plan.rel.clone(),
                mode: plan.mode,
                mtime: plan.mtime,
                u_size: plan.u_size,
                c_size: plan.payload.len() as u64,
                codec: plan.codec as u8,
                data_off,
                hash: plan.hash,
            });
            done_u += plan.u_size;
            progress(&plan.rel, done_u, total_u);
        }
    }

    let dir_entries = dirs
        .iter()
        .map(|d| -> Result<DirEntry> {
            let mode = fs::metadata(d).map(|md| mode_from(&md)).unwrap_or(0o040755);
            Ok(DirEntry {
                path: rel_path(d, &base)?,
                mode,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let manifest = BundleManifest {
        files: file_entries,
        dirs: dir_entries,
        meta: Meta {
            created: if opts.deterministic {
                0
            } else {
                OffsetDateTime::now_utc().unix_timestamp()
            },
            tool: "timevault-core/bundle-v1".to_string(),
        },
    };

    let mut manifest_buf = Vec::new();
    ciborium::ser::into_writer(&manifest, &mut manifest_buf)
        .map_err(|e| VaultError::Format(format!("manifest encode: {e}")))?;

    let header = BundleHeader {
        version: VERSION,
        manifest_len: manifest_buf.len() as u64,
        data_len: data.len() as u64,
        digest: *hasher.finalize().as_bytes(),
    };
    let mut out = Vec::with_capacity((HEADER_LEN as usize) + manifest_buf.len() + data.len());
    header.write_to(&mut out)?;
    out.extend_from_slice(&manifest_buf);
    out.extend_from_slice(&data);

    let stats = ArchiveStats {
        original_size: total_u,
        compressed_size: out.len() as u64,
        file_count: manifest.files.len() as u32,
    };
    debug!(
        files = stats.file_count,
        original = stats.original_size,
        packed = stats.compressed_size,
        "bundle packed"
    );
    Ok((out, stats))
}
