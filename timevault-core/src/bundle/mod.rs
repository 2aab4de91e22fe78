//! Default archive collaborator: a single-buffer bundle of files and directories.
//!
//! Layout: [`header::BundleHeader`], CBOR [`manifest::BundleManifest`], then the
//! per-file data section (each entry stored or zstd-compressed).

use std::path::Path;

use crate::error::Result;
use crate::stats::ArchiveStats;

pub mod extract;
pub mod header;
pub mod manifest;
pub mod writer;

pub use writer::PackOptions;

/// Per-file progress callback: (relative path, bytes done, bytes total).
pub type ProgressFn<'a> = dyn FnMut(&str, u64, u64) + 'a;

#[derive(Debug, Clone)]
pub struct PackedArchive {
    pub bytes: Vec<u8>,
    pub stats: ArchiveStats,
}

/// Turns a file or directory into bytes and back.
pub trait Archiver: Send + Sync {
    fn pack(&self, source: &Path, progress: &mut ProgressFn<'_>) -> Result<PackedArchive>;

    /// Restore into `dest`, which is created if needed. Corrupt input is a
    /// [`crate::error::VaultError::Format`].
    fn unpack(&self, bytes: &[u8], dest: &Path, progress: &mut ProgressFn<'_>) -> Result<ArchiveStats>;
}

#[derive(Clone, Default)]
pub struct BundleArchiver {
    pub opts: PackOptions,
}

impl BundleArchiver {
    pub fn new(opts: PackOptions) -> Self {
        Self { opts }
    }
}

impl Archiver for BundleArchiver {
    fn pack(&self, source: &Path, progress: &mut ProgressFn<'_>) -> Result<PackedArchive> {
        let (bytes, stats) = writer::pack_bundle(source, &self.opts, progress)?;
        Ok(PackedArchive { bytes, stats })
    }

    fn unpack(&self, bytes: &[u8], dest: &Path, progress: &mut ProgressFn<'_>) -> Result<ArchiveStats> {
        extract::unpack_bundle(bytes, dest, progress)
    }
}
