use std::io;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;

pub const APP_QUALIFIER: &str = "dev";
pub const APP_ORG: &str = "timevault";
pub const APP_NAME: &str = "timevault";

pub const DATA_DIR_ENV: &str = "TIMEVAULT_DATA_DIR";
pub const SETTINGS_ENV: &str = "TIMEVAULT_SETTINGS";

pub fn data_dir() -> io::Result<PathBuf> {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

/// `explicit`, else `TIMEVAULT_SETTINGS`, else `<data dir>/settings.json`.
pub fn settings_path(explicit: Option<&Path>) -> io::Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    if let Ok(p) = std::env::var(SETTINGS_ENV) {
        return Ok(PathBuf::from(p));
    }
    Ok(data_dir()?.join("settings.json"))
}

pub fn engine_key_path(data_dir: &Path) -> PathBuf {
    data_dir.join("engine.key")
}

pub fn default_vault_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("vaults")
}
