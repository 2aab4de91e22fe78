use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Failure to turn a user expression into an unlock instant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid lock time {input:?}: expected e.g. `5m`, `2 hours`, `30d` or `YYYY-MM-DD [HH:MM[:SS]]`")]
    InvalidFormat { input: String },

    #[error("unlock time {input:?} is not in the future")]
    NotInFuture { input: String },
}

/// A front-matter block was found but does not describe a valid item.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid value for `{field}`: {value:?}")]
    InvalidValue { field: &'static str, value: String },

    #[error("unlocked record has no `unlocked` timestamp")]
    MissingUnlockTime,

    #[error("header exceeds {0} bytes")]
    TooLarge(usize),
}

/// Structured failure kinds reported by a [`crate::engine::TimeLockEngine`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("time lock still active")]
    TooEarly { remaining_ms: Option<u64> },

    #[error("ciphertext corrupt: {0}")]
    Corrupt(String),

    #[error("engine failure: {0}")]
    Other(String),
}

/// Cleanup that failed after the primary operation already succeeded.
///
/// Never returned as an `Err`; attached to an otherwise successful result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionFailed {
    pub path: PathBuf,
    pub message: String,
}

impl fmt::Display for DeletionFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not delete {}: {}", self.path.display(), self.message)
    }
}

impl std::error::Error for DeletionFailed {}

#[derive(Error, Debug)]
pub enum LockError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("source not found: {0}")]
    SourceMissing(PathBuf),

    #[error("target already exists: {0}")]
    TargetExists(PathBuf),

    #[error("file name {0:?} contains a line break and cannot be recorded")]
    UnrecordableName(String),

    #[error("another operation is in progress for {0}")]
    Busy(PathBuf),

    #[error("archiving failed: {0}")]
    Archive(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum UnlockError {
    #[error("time lock still active ({remaining_ms} ms remaining)")]
    TooEarly { remaining_ms: u64 },

    #[error("item is corrupt: {0}")]
    Corrupt(String),

    #[error("unlock failed: {0}")]
    Other(String),

    #[error("item not found: {0}")]
    NotFound(PathBuf),

    #[error("another operation is in progress for {0}")]
    Busy(PathBuf),

    #[error("invalid metadata: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("legacy item cannot be repackaged before its unlock time ({remaining_ms} ms remaining)")]
    NotYetDecryptable { remaining_ms: u64 },

    #[error("legacy file missing: {0}")]
    SourceMissing(PathBuf),

    #[error("not a legacy item: {0}")]
    NotLegacy(PathBuf),

    #[error("legacy record is incomplete: {0}")]
    IncompleteRecord(String),

    #[error("unified file already exists: {0}")]
    TargetExists(PathBuf),

    #[error("another operation is in progress for {0}")]
    Busy(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Format error: {0}")]
    Format(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Unlock(#[from] UnlockError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("settings error: {0}")]
    Settings(#[from] serde_json::Error),
}

// Convenient crate-wide result type
pub type Result<T> = std::result::Result<T, VaultError>;
