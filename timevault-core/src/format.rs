//! Suffix-only classification of vault paths. Never touches the filesystem.

use std::path::{Path, PathBuf};

use serde::Serialize;

pub const UNIFIED_EXT: &str = ".tlock";
pub const LEGACY_KEY_EXT: &str = ".key.md";
pub const LEGACY_KEY_DASH_EXT: &str = "-key.md";
pub const LEGACY_ARCHIVE_EXT: &str = ".tla";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum LegacyRole {
    KeyFile,
    Archive,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Detected {
    Legacy(LegacyRole),
    Unified,
    Unknown,
}

pub fn classify(path: &Path) -> Detected {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return Detected::Unknown;
    };
    let lower = name.to_ascii_lowercase();
    if has_suffix(&lower, UNIFIED_EXT) {
        Detected::Unified
    } else if has_suffix(&lower, LEGACY_KEY_EXT) || has_suffix(&lower, LEGACY_KEY_DASH_EXT) {
        Detected::Legacy(LegacyRole::KeyFile)
    } else if has_suffix(&lower, LEGACY_ARCHIVE_EXT) {
        Detected::Legacy(LegacyRole::Archive)
    } else {
        Detected::Unknown
    }
}

/// A bare suffix (`.tlock`) is not an item name.
fn has_suffix(name: &str, suffix: &str) -> bool {
    name.len() > suffix.len() && name.ends_with(suffix)
}

/// Shared stem of a legacy pair, e.g. `report` for `report.key.md` or `report.tla`.
pub fn legacy_stem(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let lower = name.to_ascii_lowercase();
    [LEGACY_KEY_EXT, LEGACY_KEY_DASH_EXT, LEGACY_ARCHIVE_EXT]
        .iter()
        .find(|ext| has_suffix(&lower, ext))
        .map(|ext| name[..name.len() - ext.len()].to_string())
}

/// Display name of a unified file: the file name without `.tlock`.
pub fn unified_stem(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    has_suffix(&name.to_ascii_lowercase(), UNIFIED_EXT)
        .then(|| name[..name.len() - UNIFIED_EXT.len()].to_string())
}

pub fn unified_path_for(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{stem}{UNIFIED_EXT}"))
}

pub fn legacy_archive_path_for(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{stem}{LEGACY_ARCHIVE_EXT}"))
}

pub fn legacy_key_path_for(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{stem}{LEGACY_KEY_EXT}"))
}
