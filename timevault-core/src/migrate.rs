//! Legacy pair -> unified file. The ciphertext is carried over byte for byte.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::clock::millis_until;
use crate::container::legacy::{self, LegacyKeyFile};
use crate::container::unified;
use crate::domain::{ItemPaths, LockedItem};
use crate::envelope::ItemMetadata;
use crate::error::{DeletionFailed, MigrationError, VaultError};
use crate::format::{self, Detected, LEGACY_KEY_EXT, legacy_stem};
use crate::lifecycle::{VaultContext, verify_written};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MigrateOptions {
    /// Remove the key file and archive once the unified file is verified.
    pub delete_originals: bool,
    /// Refuse items whose unlock instant has not passed yet.
    pub require_unlockable: bool,
}

#[derive(Debug, Clone)]
pub struct MigrationResult {
    pub item: LockedItem,
    pub unified_path: PathBuf,
    pub legacy_key_file: PathBuf,
    pub legacy_archive: PathBuf,
    pub originals_deleted: bool,
    /// Non-fatal: the unified file exists and is valid regardless.
    pub deletion_errors: Vec<DeletionFailed>,
}

/// Metadata for the unified copy of a legacy record.
///
/// Everything is carried over except the unlock bookkeeping, which survives only
/// if the recorded output still exists, and the legacy-only `archive` field.
pub fn migrate_metadata(legacy: &ItemMetadata) -> ItemMetadata {
    let mut meta = legacy.clone();
    meta.archive = None;
    let output_exists = meta
        .unlocked_to
        .as_deref()
        .is_some_and(|p| Path::new(p).exists());
    if !(meta.is_unlocked() && output_exists) {
        meta.clear_unlock();
    }
    meta
}

impl VaultContext {
    pub fn migrate(&self, legacy_path: &Path, opts: MigrateOptions) -> Result<MigrationResult, MigrationError> {
        if !matches!(format::classify(legacy_path), Detected::Legacy(_)) {
            return Err(MigrationError::NotLegacy(legacy_path.to_path_buf()));
        }
        let key_path = legacy::key_file_for(legacy_path)
            .filter(|p| p.is_file())
            .ok_or_else(|| MigrationError::SourceMissing(expected_key_path(legacy_path)))?;
        let _guard = self
            .locks()
            .try_acquire(&[key_path.as_path()])
            .map_err(MigrationError::Busy)?;

        let kf = LegacyKeyFile::read(&key_path).map_err(|e| match e {
            VaultError::Io(e) if e.kind() == io::ErrorKind::NotFound => {
                MigrationError::SourceMissing(key_path.clone())
            }
            VaultError::Io(e) => MigrationError::Io(e),
            other => MigrationError::IncompleteRecord(format!("{}: {other}", key_path.display())),
        })?;
        if kf.metadata.original_filename.trim().is_empty() || kf.metadata.duration_text.trim().is_empty() {
            return Err(MigrationError::IncompleteRecord(format!(
                "{}: lock record was never completed",
                key_path.display()
            )));
        }

        let now = self.now();
        if opts.require_unlockable && !kf.metadata.is_ready(now) {
            return Err(MigrationError::NotYetDecryptable {
                remaining_ms: millis_until(now, kf.metadata.unlocks).max(1),
            });
        }

        let archive_path = kf.archive_path();
        let ciphertext = fs::read(&archive_path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => MigrationError::SourceMissing(archive_path.clone()),
            _ => MigrationError::Io(e),
        })?;

        let dir = key_path.parent().unwrap_or_else(|| Path::new("."));
        let target = format::unified_path_for(dir, &kf.stem());
        if target.exists() {
            return Err(MigrationError::TargetExists(target));
        }

        let metadata = migrate_metadata(&kf.metadata);
        unified::write_new(&target, &metadata, &ciphertext).map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => MigrationError::TargetExists(target.clone()),
            _ => MigrationError::Io(e),
        })?;
        if let Err(message) = verify_written(&target, &metadata, ciphertext.len() as u64) {
            // never leave a unified file that does not match its source
            let _ = fs::remove_file(&target);
            return Err(MigrationError::Io(io::Error::new(io::ErrorKind::InvalidData, message)));
        }
        info!(from = %key_path.display(), to = %target.display(), "migrated legacy item");

        let mut deletion_errors = Vec::new();
        if opts.delete_originals {
            for path in [&archive_path, &key_path] {
                if let Err(e) = self.remover().remove(path) {
                    warn!(path = %path.display(), error = %e, "migrated, but legacy file was kept");
                    deletion_errors.push(DeletionFailed {
                        path: path.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(MigrationResult {
            item: LockedItem::new(ItemPaths::Unified { file: target.clone() }, metadata, now),
            unified_path: target,
            legacy_key_file: key_path,
            legacy_archive: archive_path,
            originals_deleted: opts.delete_originals && deletion_errors.is_empty(),
            deletion_errors,
        })
    }

    /// Migrate an item taken from a snapshot.
    pub fn migrate_item(&self, item: &LockedItem, opts: MigrateOptions) -> Result<MigrationResult, MigrationError> {
        match &item.paths {
            ItemPaths::Legacy { key_file, .. } => self.migrate(key_file, opts),
            ItemPaths::Unified { file } => Err(MigrationError::NotLegacy(file.clone())),
        }
    }
}

fn expected_key_path(path: &Path) -> PathBuf {
    match (path.parent(), legacy_stem(path)) {
        (Some(dir), Some(stem)) => dir.join(format!("{stem}{LEGACY_KEY_EXT}")),
        _ => path.to_path_buf(),
    }
}
