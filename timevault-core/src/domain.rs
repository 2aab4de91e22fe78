// timevault_core/src/domain.rs
use std::path::{Path, PathBuf};

use time::OffsetDateTime;

use crate::clock::millis_until;
use crate::envelope::ItemMetadata;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Variant {
    Legacy,
    Unified,
}

impl Variant {
    pub fn as_str(self) -> &'static str {
        match self {
            Variant::Legacy => "legacy",
            Variant::Unified => "unified",
        }
    }
}

/// Where an item lives on disk, per format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ItemPaths {
    Legacy { key_file: PathBuf, archive: PathBuf },
    Unified { file: PathBuf },
}

impl ItemPaths {
    pub fn variant(&self) -> Variant {
        match self {
            ItemPaths::Legacy { .. } => Variant::Legacy,
            ItemPaths::Unified { .. } => Variant::Unified,
        }
    }

    /// The file that carries the envelope.
    pub fn primary(&self) -> &Path {
        match self {
            ItemPaths::Legacy { key_file, .. } => key_file,
            ItemPaths::Unified { file } => file,
        }
    }

    pub fn dir(&self) -> &Path {
        self.primary().parent().unwrap_or_else(|| Path::new("."))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ItemState {
    New,
    Locked,
    Unlockable,
    Unlocked,
    Opened,
}

impl ItemState {
    pub fn can_transition_to(self, next: ItemState) -> bool {
        use ItemState::*;
        matches!(
            (self, next),
            (New, Locked)
                | (Locked, Unlockable)
                | (Unlockable, Unlocked)
                | (Unlocked, Opened)
                | (Opened, Opened)
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockedItem {
    pub id: String,
    pub display_name: String,
    pub format: Variant,
    pub paths: ItemPaths,
    pub metadata: ItemMetadata,
    /// Computed against the snapshot's instant; never persisted.
    pub is_ready: bool,
    pub unlocked_output_path: Option<PathBuf>,
}

impl LockedItem {
    pub fn new(paths: ItemPaths, metadata: ItemMetadata, now: OffsetDateTime) -> Self {
        let display_name = metadata.original_filename.clone();
        let unlocked_output_path = metadata.unlocked_to.as_ref().map(PathBuf::from);
        Self {
            id: item_id(paths.primary()),
            display_name,
            format: paths.variant(),
            is_ready: metadata.is_ready(now),
            paths,
            metadata,
            unlocked_output_path,
        }
    }

    pub fn refresh(&mut self, now: OffsetDateTime) {
        self.is_ready = self.metadata.is_ready(now);
    }

    pub fn state(&self, now: OffsetDateTime) -> ItemState {
        if self.metadata.is_unlocked() {
            ItemState::Unlocked
        } else if self.metadata.is_ready(now) {
            ItemState::Unlockable
        } else {
            ItemState::Locked
        }
    }

    pub fn remaining_ms(&self, now: OffsetDateTime) -> u64 {
        millis_until(now, self.metadata.unlocks)
    }
}

/// Stable id: first 16 hex chars of blake3 over the path.
pub fn item_id(path: &Path) -> String {
    let digest = blake3::hash(path.as_os_str().as_encoded_bytes());
    digest.to_hex()[..16].to_string()
}
