//! Lock and unlock: the item state machine and the context it runs in.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::bundle::{Archiver, BundleArchiver};
use crate::clock::{Clock, millis_until};
use crate::container::legacy::{self, LegacyKeyFile};
use crate::container::unified;
use crate::domain::{ItemPaths, ItemState, LockedItem};
use crate::engine::{DetachedEngine, TimeLockEngine};
use crate::envelope::ItemMetadata;
use crate::envelope::metadata::{is_single_line, keys};
use crate::error::{DeletionFailed, EngineError, EnvelopeError, LockError, ParseError, UnlockError, VaultError};
use crate::format::{self, Detected};
use crate::progress::{OperationKind, ProgressHub, Stage};
use crate::settings::VaultSettings;
use crate::stats::ArchiveStats;
use crate::time_expr::LockTimeSpec;

pub mod cleanup;
pub mod locks;

pub use cleanup::{FsRemover, SourceRemover};
pub use locks::{ItemGuard, ItemLocks};

/// Everything an operation needs; no module-level state.
pub struct VaultContext {
    settings: VaultSettings,
    data_dir: PathBuf,
    engine: Arc<dyn TimeLockEngine>,
    archiver: Arc<dyn Archiver>,
    remover: Arc<dyn SourceRemover>,
    clock: Arc<dyn Clock>,
    progress: ProgressHub,
    locks: ItemLocks,
}

#[derive(Debug, Clone)]
pub struct LockResult {
    pub item: LockedItem,
    pub state: ItemState,
    pub stats: ArchiveStats,
    /// Set when the original was requested deleted but could not be.
    pub deletion_error: Option<DeletionFailed>,
    pub original_deleted: bool,
    pub operation_id: u64,
}

#[derive(Debug, Clone)]
pub struct UnlockResult {
    pub item: LockedItem,
    /// `Unlocked` after fresh work, `Opened` when the recorded output was reused.
    pub state: ItemState,
    pub output_path: PathBuf,
    pub stats: Option<ArchiveStats>,
    pub operation_id: Option<u64>,
}

/// A loaded item with whichever container it came from.
pub(crate) enum Loaded {
    Unified { path: PathBuf, metadata: ItemMetadata },
    Legacy(LegacyKeyFile),
}

impl Loaded {
    pub(crate) fn metadata(&self) -> &ItemMetadata {
        match self {
            Loaded::Unified { metadata, .. } => metadata,
            Loaded::Legacy(kf) => &kf.metadata,
        }
    }

    pub(crate) fn paths(&self) -> ItemPaths {
        match self {
            Loaded::Unified { path, .. } => ItemPaths::Unified { file: path.clone() },
            Loaded::Legacy(kf) => ItemPaths::Legacy {
                key_file: kf.path.clone(),
                archive: kf.archive_path(),
            },
        }
    }
}

impl VaultContext {
    pub fn new(
        settings: VaultSettings,
        data_dir: PathBuf,
        engine: Arc<dyn TimeLockEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            data_dir,
            engine,
            archiver: Arc::new(BundleArchiver::default()),
            remover: Arc::new(FsRemover),
            clock,
            progress: ProgressHub::new(),
            locks: ItemLocks::new(),
        }
    }

    /// Context for inspection and listing; needs no engine key.
    pub fn read_only(settings: VaultSettings, data_dir: PathBuf, clock: Arc<dyn Clock>) -> Self {
        Self::new(settings, data_dir, Arc::new(DetachedEngine), clock)
    }

    pub fn with_archiver(mut self, archiver: Arc<dyn Archiver>) -> Self {
        self.archiver = archiver;
        self
    }

    pub fn with_remover(mut self, remover: Arc<dyn SourceRemover>) -> Self {
        self.remover = remover;
        self
    }

    pub fn settings(&self) -> &VaultSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut VaultSettings {
        &mut self.settings
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn progress(&self) -> &ProgressHub {
        &self.progress
    }

    pub fn locks(&self) -> &ItemLocks {
        &self.locks
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    pub(crate) fn remover(&self) -> &dyn SourceRemover {
        self.remover.as_ref()
    }

    /// Lock `source` (a file or directory) into `<vault>/<name>.tlock`.
    pub fn lock(
        &self,
        source: &Path,
        spec: &LockTimeSpec,
        vault: Option<&Path>,
        delete_original: bool,
    ) -> Result<LockResult, LockError> {
        let now = self.clock.now();
        if spec.is_expired(now) {
            return Err(ParseError::NotInFuture {
                input: spec.canonical_duration_text.clone(),
            }
            .into());
        }
        if fs::symlink_metadata(source).is_err() {
            return Err(LockError::SourceMissing(source.to_path_buf()));
        }
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| LockError::SourceMissing(source.to_path_buf()))?;
        if !is_single_line(&file_name) {
            return Err(LockError::UnrecordableName(file_name));
        }
        // unlocks - created must equal the requested duration
        let spec = &spec.rebased(now);

        let vault_dir = match vault {
            Some(v) => {
                fs::create_dir_all(v)?;
                v.to_path_buf()
            }
            None => self.settings.default_vault(&self.data_dir)?,
        };
        let target = format::unified_path_for(&vault_dir, &file_name);
        if target.exists() {
            return Err(LockError::TargetExists(target));
        }
        let _guard = self
            .locks
            .try_acquire(&[source, target.as_path()])
            .map_err(LockError::Busy)?;

        info!(source = %source.display(), target = %target.display(), unlocks = %spec.unlock_instant, "locking");
        let mut reporter = self.progress.reporter(OperationKind::Lock, Some(file_name.clone()));

        let packed = self
            .archiver
            .pack(source, &mut |_: &str, done: u64, total: u64| {
                reporter.set_total_bytes(total);
                reporter.advance(Stage::Compressing, done, total);
            })
            .map_err(|e| LockError::Archive(e.to_string()))?;
        let stats = packed.stats;
        reporter.complete(Stage::Compressing, stats.original_size);
        debug!(stage = ?Stage::Compressing, bytes = stats.compressed_size, "packed");

        reporter.advance(Stage::Encrypting, 0, 1);
        let ciphertext = self
            .engine
            .encrypt(&packed.bytes, spec)
            .map_err(|e| LockError::EncryptionFailed(e.to_string()))?;
        drop(packed);
        reporter.complete(Stage::Encrypting, stats.original_size);

        let metadata = ItemMetadata::new_locked(spec, file_name.clone(), now, Some(stats));
        unified::write_new(&target, &metadata, &ciphertext).map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                LockError::TargetExists(target.clone())
            } else {
                LockError::Io(e)
            }
        })?;
        reporter.advance(Stage::Finalizing, 1, 2);

        let mut deletion_error = None;
        let mut original_deleted = false;
        if delete_original {
            match verify_written(&target, &metadata, ciphertext.len() as u64) {
                Err(message) => {
                    deletion_error = Some(DeletionFailed {
                        path: source.to_path_buf(),
                        message,
                    })
                }
                Ok(()) => match self.remover.remove(source) {
                    Ok(()) => original_deleted = true,
                    Err(e) => {
                        deletion_error = Some(DeletionFailed {
                            path: source.to_path_buf(),
                            message: e.to_string(),
                        })
                    }
                },
            }
            if let Some(err) = &deletion_error {
                warn!(path = %err.path.display(), error = %err.message, "locked, but original was kept");
            }
        }
        reporter.finish(stats.original_size);
        info!(target = %target.display(), "locked");

        Ok(LockResult {
            item: LockedItem::new(ItemPaths::Unified { file: target }, metadata, now),
            state: ItemState::Locked,
            stats,
            deletion_error,
            original_deleted,
            operation_id: reporter.operation_id(),
        })
    }

    /// Lock several sources one after another; each gets its own progress stream.
    pub fn lock_batch(
        &self,
        sources: &[PathBuf],
        spec: &LockTimeSpec,
        vault: Option<&Path>,
        delete_original: bool,
    ) -> Vec<(PathBuf, Result<LockResult, LockError>)> {
        sources
            .iter()
            .map(|src| (src.clone(), self.lock(src, spec, vault, delete_original)))
            .collect()
    }

    /// Unlock the item at `path` (unified file, legacy key file or legacy archive).
    ///
    /// An item that is already unlocked and whose output still exists is reported
    /// as `Opened` without any decryption.
    pub fn unlock(&self, path: &Path, output_dir: Option<&Path>) -> Result<UnlockResult, UnlockError> {
        let primary = primary_path(path).ok_or_else(|| UnlockError::NotFound(path.to_path_buf()))?;
        let _guard = self
            .locks
            .try_acquire(&[primary.as_path()])
            .map_err(UnlockError::Busy)?;
        let loaded = load(&primary).map_err(unlock_error)?;
        let now = self.clock.now();
        let mut metadata = loaded.metadata().clone();

        let reusable = metadata
            .unlocked_to
            .as_ref()
            .map(PathBuf::from)
            .filter(|p| metadata.is_unlocked() && p.exists());
        // an unlocked item whose output is gone is unlocked again from scratch
        let state = match &reusable {
            Some(_) => ItemState::Unlocked,
            None if metadata.is_ready(now) => ItemState::Unlockable,
            None => ItemState::Locked,
        };
        if let Some(out) = reusable.filter(|_| state.can_transition_to(ItemState::Opened)) {
            debug!(output = %out.display(), "already unlocked, reusing output");
            return Ok(UnlockResult {
                item: LockedItem::new(loaded.paths(), metadata, now),
                state: ItemState::Opened,
                output_path: out,
                stats: None,
                operation_id: None,
            });
        }
        if !state.can_transition_to(ItemState::Unlocked) {
            let remaining_ms = millis_until(now, metadata.unlocks).max(1);
            debug!(remaining_ms, "unlock requested too early");
            return Err(UnlockError::TooEarly { remaining_ms });
        }

        let ciphertext = match &loaded {
            Loaded::Unified { path, .. } => unified::read_full(path).map_err(unlock_error)?.1,
            Loaded::Legacy(kf) => {
                let archive = kf.archive_path();
                fs::read(&archive).map_err(|e| match e.kind() {
                    io::ErrorKind::NotFound => UnlockError::NotFound(archive.clone()),
                    _ => UnlockError::Io(e),
                })?
            }
        };

        let output = output_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| default_output(&primary, &metadata));
        let output_text = output.to_string_lossy().into_owned();
        if !is_single_line(&output_text) {
            return Err(UnlockError::Envelope(EnvelopeError::InvalidValue {
                field: keys::UNLOCKED_TO,
                value: output_text,
            }));
        }

        info!(item = %primary.display(), output = %output.display(), "unlocking");
        let mut reporter = self
            .progress
            .reporter(OperationKind::Unlock, Some(metadata.original_filename.clone()));
        reporter.set_total_bytes(ciphertext.len() as u64);
        reporter.advance(Stage::Decrypting, 0, 1);
        let plaintext = self.engine.decrypt(&ciphertext).map_err(|e| match e {
            EngineError::TooEarly { remaining_ms } => UnlockError::TooEarly {
                remaining_ms: remaining_ms
                    .unwrap_or_else(|| millis_until(now, metadata.unlocks))
                    .max(1),
            },
            EngineError::Corrupt(m) => UnlockError::Corrupt(m),
            EngineError::Other(m) => UnlockError::Other(m),
        })?;
        reporter.complete(Stage::Decrypting, ciphertext.len() as u64);

        let stats = self
            .archiver
            .unpack(&plaintext, &output, &mut |_: &str, done: u64, total: u64| {
                reporter.advance(Stage::Extracting, done, total);
            })
            .map_err(unlock_error)?;
        reporter.complete(Stage::Extracting, stats.original_size);

        metadata.mark_unlocked(now, output_text);
        let rewritten = match &loaded {
            Loaded::Unified { path, .. } => unified::rewrite_metadata(path, &metadata),
            Loaded::Legacy(kf) => kf.rewrite(&metadata),
        };
        rewritten.map_err(unlock_error)?;
        reporter.finish(stats.original_size);
        info!(output = %output.display(), files = stats.file_count, "unlocked");

        Ok(UnlockResult {
            item: LockedItem::new(loaded.paths(), metadata, now),
            state: ItemState::Unlocked,
            output_path: output,
            stats: Some(stats),
            operation_id: Some(reporter.operation_id()),
        })
    }

    /// Open an item, decrypting only if it has not been unlocked before.
    pub fn open(&self, path: &Path) -> Result<UnlockResult, UnlockError> {
        self.unlock(path, None)
    }

    /// Load one item by any of its paths.
    pub fn inspect(&self, path: &Path) -> crate::error::Result<LockedItem> {
        let primary = primary_path(path).ok_or_else(|| {
            VaultError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a locked item", path.display()),
            ))
        })?;
        let loaded = load(&primary)?;
        Ok(LockedItem::new(loaded.paths(), loaded.metadata().clone(), self.clock.now()))
    }
}

/// `unlocked_<name>` beside the item. Only the last component of the recorded
/// name is used so a crafted envelope cannot point outside the vault.
fn default_output(primary: &Path, metadata: &ItemMetadata) -> PathBuf {
    let dir = primary.parent().unwrap_or_else(|| Path::new("."));
    let name = Path::new(&metadata.original_filename)
        .file_name()
        .or_else(|| primary.file_stem())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "item".to_string());
    dir.join(format!("unlocked_{name}"))
}

/// The envelope-carrying file for `path`, if it names an item that exists.
pub(crate) fn primary_path(path: &Path) -> Option<PathBuf> {
    match format::classify(path) {
        Detected::Unified => path.is_file().then(|| path.to_path_buf()),
        Detected::Legacy(_) => legacy::key_file_for(path).filter(|p| p.is_file()),
        Detected::Unknown => None,
    }
}

pub(crate) fn load(primary: &Path) -> crate::error::Result<Loaded> {
    match format::classify(primary) {
        Detected::Legacy(_) => Ok(Loaded::Legacy(LegacyKeyFile::read(primary)?)),
        _ => {
            let header = unified::read_header(primary)?;
            Ok(Loaded::Unified {
                path: primary.to_path_buf(),
                metadata: header.metadata,
            })
        }
    }
}

/// Re-read what was just written before anything is deleted.
pub(crate) fn verify_written(path: &Path, expected: &ItemMetadata, payload_len: u64) -> Result<(), String> {
    let header = unified::read_header(path).map_err(|e| format!("validation of {} failed: {e}", path.display()))?;
    if &header.metadata != expected {
        return Err(format!("metadata of {} does not match what was written", path.display()));
    }
    if header.payload_len != payload_len {
        return Err(format!(
            "payload of {} is {} bytes, expected {payload_len}",
            path.display(),
            header.payload_len
        ));
    }
    Ok(())
}

fn unlock_error(e: VaultError) -> UnlockError {
    match e {
        VaultError::Io(e) => UnlockError::Io(e),
        VaultError::Envelope(e) => UnlockError::Envelope(e),
        VaultError::Format(m) => UnlockError::Corrupt(m),
        VaultError::Unlock(e) => e,
        other => UnlockError::Other(other.to_string()),
    }
}
