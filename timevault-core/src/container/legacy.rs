//! Two-file legacy layout: `<stem>.key.md` (or `<stem>-key.md`) plus `<stem>.tla`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::envelope::{self, ItemMetadata};
use crate::error::{Result, VaultError};
use crate::format::{
    self, Detected, LEGACY_KEY_DASH_EXT, LegacyRole, legacy_archive_path_for, legacy_key_path_for,
    legacy_stem,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegacyKeyFile {
    pub path: PathBuf,
    pub metadata: ItemMetadata,
    /// Text after the header; informational only.
    pub body: String,
}

impl LegacyKeyFile {
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let (metadata, body) = envelope::decode_metadata(&text)
            .ok_or_else(|| VaultError::Format(format!("{} has no metadata header", path.display())))??;
        Ok(Self {
            path: path.to_path_buf(),
            metadata,
            body: body.to_string(),
        })
    }

    /// The archive this key file points at: the `archive` field if present,
    /// else `<stem>.tla` next to it.
    pub fn archive_path(&self) -> PathBuf {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        if let Some(name) = &self.metadata.archive {
            return dir.join(name);
        }
        let stem = legacy_stem(&self.path).unwrap_or_else(|| self.metadata.original_filename.clone());
        legacy_archive_path_for(dir, &stem)
    }

    pub fn stem(&self) -> String {
        legacy_stem(&self.path).unwrap_or_else(|| self.metadata.original_filename.clone())
    }

    /// Write updated metadata, keeping the body.
    pub fn rewrite(&self, meta: &ItemMetadata) -> Result<()> {
        meta.validate()?;
        let text = envelope::encode_with_body(meta, &self.body);
        super::replace_atomic(&self.path, &[text.as_bytes()])?;
        Ok(())
    }
}

/// Key file for any path belonging to a legacy pair. Archive paths are mapped to
/// whichever key-file spelling exists.
pub fn key_file_for(path: &Path) -> Option<PathBuf> {
    match format::classify(path) {
        Detected::Legacy(LegacyRole::KeyFile) => Some(path.to_path_buf()),
        Detected::Legacy(LegacyRole::Archive) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let stem = legacy_stem(path)?;
            let dotted = legacy_key_path_for(dir, &stem);
            let dashed = dir.join(format!("{stem}{LEGACY_KEY_DASH_EXT}"));
            [dotted, dashed].into_iter().find(|p| p.is_file())
        }
        _ => None,
    }
}

pub fn body_text(meta: &ItemMetadata, archive_name: &str) -> String {
    format!(
        "# {}\n\nTime-locked until {}. Encrypted archive: `{}`.\n",
        meta.original_filename,
        envelope::metadata::format_timestamp(meta.unlocks),
        archive_name
    )
}

/// Write a legacy pair. Used for fixtures and for tools that still emit the old layout.
pub fn write_pair(dir: &Path, stem: &str, meta: &ItemMetadata, ciphertext: &[u8]) -> Result<(PathBuf, PathBuf)> {
    meta.validate()?;
    let key = legacy_key_path_for(dir, stem);
    let archive = legacy_archive_path_for(dir, stem);
    let archive_name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    super::write_new_atomic(&archive, &[ciphertext])?;
    let text = envelope::encode_with_body(meta, &body_text(meta, &archive_name));
    super::write_new_atomic(&key, &[text.as_bytes()])?;
    Ok((key, archive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn meta() -> ItemMetadata {
        ItemMetadata {
            locked: true,
            created: datetime!(2025-01-01 00:00:00 UTC),
            unlocks: datetime!(2026-07-01 06:00:00 UTC),
            duration_text: "2026-07-01".into(),
            original_filename: "vault-1.md".into(),
            unlocked_at: None,
            unlocked_to: None,
            original_size: None,
            compressed_size: None,
            file_count: None,
            archive: None,
        }
    }

    #[test]
    fn pair_round_trip_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let (key, archive) = write_pair(dir.path(), "vault-1", &meta(), b"cipher").unwrap();
        let kf = LegacyKeyFile::read(&key).unwrap();
        assert_eq!(kf.metadata, meta());
        assert_eq!(kf.archive_path(), archive);
        assert!(kf.body.contains("vault-1.tla"));
        assert_eq!(key_file_for(&archive), Some(key.clone()));
        assert_eq!(key_file_for(&key), Some(key));
    }

    #[test]
    fn explicit_archive_field_and_dash_spelling() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = meta();
        m.archive = Some("elsewhere.bin".into());
        let key = dir.path().join("notes-key.md");
        fs::write(&key, envelope::encode_with_body(&m, "")).unwrap();
        let kf = LegacyKeyFile::read(&key).unwrap();
        assert_eq!(kf.archive_path(), dir.path().join("elsewhere.bin"));
        assert_eq!(kf.stem(), "notes");
        assert_eq!(key_file_for(&dir.path().join("notes.tla")), Some(key));
    }
}
