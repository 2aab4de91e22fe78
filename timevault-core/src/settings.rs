use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::container::replace_atomic;
use crate::error::Result;
use crate::paths;

/// Persisted, process-wide settings. Loaded once, changed only by explicit saves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSettings {
    #[serde(default)]
    pub vault_directories: Vec<String>,
}

impl VaultSettings {
    /// Missing file means defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read(path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no settings file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let mut json = serde_json::to_vec_pretty(self)?;
        json.push(b'\n');
        replace_atomic(path, &[&json])?;
        Ok(())
    }

    /// Appends unless already present. Returns whether anything changed.
    pub fn add_vault(&mut self, dir: &str) -> bool {
        let dir = normalize(dir);
        if dir.is_empty() || self.vault_directories.iter().any(|d| normalize(d) == dir) {
            return false;
        }
        self.vault_directories.push(dir);
        true
    }

    pub fn remove_vault(&mut self, dir: &str) -> bool {
        let dir = normalize(dir);
        let before = self.vault_directories.len();
        self.vault_directories.retain(|d| normalize(d) != dir);
        before != self.vault_directories.len()
    }

    pub fn vault_paths(&self) -> Vec<PathBuf> {
        self.vault_directories.iter().map(PathBuf::from).collect()
    }

    /// First configured vault, else `<data dir>/vaults`. Created if missing.
    pub fn default_vault(&self, data_dir: &Path) -> io::Result<PathBuf> {
        let dir = self
            .vault_directories
            .first()
            .map(PathBuf::from)
            .unwrap_or_else(|| paths::default_vault_dir(data_dir));
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

fn normalize(dir: &str) -> String {
    let trimmed = dir.trim();
    let stripped = trimmed.trim_end_matches(['/', '\\']);
    if stripped.is_empty() && !trimmed.is_empty() {
        trimmed[..1].to_string()
    } else {
        stripped.to_string()
    }
}
