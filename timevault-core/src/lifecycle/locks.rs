//! Per-item advisory locks keyed by canonical path.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashSet;
use tracing::debug;

#[derive(Clone, Default)]
pub struct ItemLocks {
    held: Arc<DashSet<PathBuf>>,
}

/// Releases its paths on drop.
#[must_use]
pub struct ItemGuard {
    held: Arc<DashSet<PathBuf>>,
    keys: Vec<PathBuf>,
}

impl ItemLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take all of `paths` or none. On conflict returns the path already held.
    pub fn try_acquire(&self, paths: &[&Path]) -> Result<ItemGuard, PathBuf> {
        let mut guard = ItemGuard {
            held: Arc::clone(&self.held),
            keys: Vec::with_capacity(paths.len()),
        };
        for p in paths {
            let key = canonical_key(p);
            if guard.keys.contains(&key) {
                continue;
            }
            if !self.held.insert(key.clone()) {
                debug!(path = %key.display(), "item busy");
                // dropping `guard` releases what was taken so far
                return Err(p.to_path_buf());
            }
            guard.keys.push(key);
        }
        Ok(guard)
    }

    pub fn is_held(&self, path: &Path) -> bool {
        self.held.contains(&canonical_key(path))
    }
}

impl Drop for ItemGuard {
    fn drop(&mut self) {
        for k in &self.keys {
            self.held.remove(k);
        }
    }
}

/// Canonical form even for paths that do not exist yet.
pub fn canonical_key(path: &Path) -> PathBuf {
    if let Ok(p) = fs::canonicalize(path) {
        return p;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            fs::canonicalize(parent)
                .map(|p| p.join(name))
                .unwrap_or_else(|_| path.to_path_buf())
        }
        _ => path.to_path_buf(),
    }
}
