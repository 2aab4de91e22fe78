#![forbid(unsafe_code)]

pub mod clock;
pub mod domain;
pub mod engine;
pub mod error;
pub mod format;
pub mod paths;
pub mod progress;
pub mod settings;
pub mod stats;
pub mod time_expr;

pub mod util {
    pub mod hash_forward;
}

pub mod codec;

pub mod crypto {
    pub mod aead;
    pub mod hex;
}

pub mod envelope;

pub mod bundle;

pub mod container;

pub mod lifecycle;
pub mod list;
pub mod migrate;

// Re-exports: stable API surface
pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::{ItemPaths, ItemState, LockedItem, Variant};
pub use engine::{LocalSealEngine, TimeLockEngine};
pub use envelope::ItemMetadata;
pub use lifecycle::{LockResult, UnlockResult, VaultContext};
pub use list::{Snapshot, snapshot};
pub use migrate::{MigrateOptions, MigrationResult};
pub use settings::VaultSettings;
pub use time_expr::{LocalZone, LockTimeSpec, parse as parse_lock_time, parse_in as parse_lock_time_in};
