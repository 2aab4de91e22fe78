//! Read path: scan vault directories into an ordered list of items.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::domain::LockedItem;
use crate::format::{self, Detected, LegacyRole};
use crate::lifecycle::{VaultContext, load, locks::canonical_key};
use crate::settings::VaultSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub items: Vec<LockedItem>,
    /// Candidates that looked like items but could not be loaded.
    pub rejected: Vec<Rejected>,
    pub settings: VaultSettings,
    pub taken_at: OffsetDateTime,
}

/// Scan every configured vault (non-recursive) as of `now`. Always reads from disk.
pub fn snapshot(settings: &VaultSettings, now: OffsetDateTime) -> Snapshot {
    snapshot_dirs(settings, &settings.vault_paths(), now)
}

pub fn snapshot_dirs(settings: &VaultSettings, dirs: &[PathBuf], now: OffsetDateTime) -> Snapshot {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    for dir in dirs {
        if !seen.insert(canonical_key(dir)) {
            debug!(vault = %dir.display(), "duplicate vault skipped");
            continue;
        }
        match candidates_in(dir) {
            Ok(found) => candidates.extend(found),
            Err(e) => warn!(vault = %dir.display(), error = %e, "vault not readable, skipped"),
        }
    }

    let loaded: Vec<Result<LockedItem, Rejected>> = candidates
        .par_iter()
        .map(|path| {
            load(path)
                .map(|l| LockedItem::new(l.paths(), l.metadata().clone(), now))
                .map_err(|e| Rejected {
                    path: path.clone(),
                    reason: e.to_string(),
                })
        })
        .collect();

    let mut items = Vec::new();
    let mut rejected = Vec::new();
    for r in loaded {
        match r {
            Ok(item) => items.push(item),
            Err(rej) => {
                debug!(path = %rej.path.display(), reason = %rej.reason, "candidate rejected");
                rejected.push(rej)
            }
        }
    }
    sort_for_display(&mut items);
    rejected.sort_by(|a, b| a.path.cmp(&b.path));

    Snapshot {
        items,
        rejected,
        settings: settings.clone(),
        taken_at: now,
    }
}

/// Ready items first, then ascending unlock instant; path breaks ties.
pub fn sort_for_display(items: &mut [LockedItem]) {
    items.sort_by(|a, b| {
        b.is_ready
            .cmp(&a.is_ready)
            .then(a.metadata.unlocks.cmp(&b.metadata.unlocks))
            .then_with(|| a.paths.primary().cmp(b.paths.primary()))
    });
}

/// Envelope-carrying files in `dir`. Legacy key files that already have a unified
/// counterpart, and bare legacy archives, are left out.
fn candidates_in(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        match format::classify(&path) {
            Detected::Unified => out.push(path),
            Detected::Legacy(LegacyRole::KeyFile) => {
                let migrated = format::legacy_stem(&path)
                    .map(|stem| format::unified_path_for(dir, &stem).exists())
                    .unwrap_or(false);
                if migrated {
                    debug!(path = %path.display(), "legacy item already migrated");
                } else {
                    out.push(path);
                }
            }
            Detected::Legacy(LegacyRole::Archive) | Detected::Unknown => {}
        }
    }
    out.sort();
    Ok(out)
}

impl VaultContext {
    pub fn snapshot(&self) -> Snapshot {
        snapshot(self.settings(), self.now())
    }

    /// Snapshot of explicit directories instead of the configured ones.
    pub fn snapshot_of(&self, dirs: &[PathBuf]) -> Snapshot {
        snapshot_dirs(self.settings(), dirs, self.now())
    }
}
