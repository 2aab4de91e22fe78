#![allow(dead_code)]

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use time::OffsetDateTime;
use time::macros::datetime;
use timevault_core::crypto::aead::AeadKey;
use timevault_core::error::EngineError;
use timevault_core::lifecycle::SourceRemover;
use timevault_core::{
    Clock, FixedClock, LocalSealEngine, LockTimeSpec, TimeLockEngine, VaultContext, VaultSettings,
};

pub const T0: OffsetDateTime = datetime!(2025-01-01 00:00:00 UTC);

pub struct Fixture {
    pub root: TempDir,
    pub clock: Arc<FixedClock>,
    pub engine: Arc<LocalSealEngine>,
    pub ctx: VaultContext,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with(|ctx| ctx)
    }

    pub fn with(customize: impl FnOnce(VaultContext) -> VaultContext) -> Self {
        let root = tempfile::tempdir().unwrap();
        let clock = Arc::new(FixedClock::new(T0));
        let engine = Arc::new(LocalSealEngine::new(AeadKey([9u8; 32]), clock.clone()));
        let mut settings = VaultSettings::default();
        settings.add_vault(root.path().join("vault").to_str().unwrap());
        let ctx = VaultContext::new(settings, root.path().join("data"), engine.clone(), clock.clone());
        Self {
            ctx: customize(ctx),
            root,
            clock,
            engine,
        }
    }

    pub fn vault(&self) -> PathBuf {
        self.root.path().join("vault")
    }

    pub fn source(&self, name: &str, contents: &str) -> PathBuf {
        let dir = self.root.path().join("src");
        std::fs::create_dir_all(&dir).unwrap();
        let p = dir.join(name);
        std::fs::write(&p, contents).unwrap();
        p
    }

    pub fn spec(&self, expr: &str) -> LockTimeSpec {
        timevault_core::parse_lock_time(expr, self.clock.now()).unwrap()
    }
}

/// Removal always fails, as if the file were read-only.
pub struct DenyRemover;

impl SourceRemover for DenyRemover {
    fn remove(&self, _path: &Path) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"))
    }
}

/// Engine that claims the lock is still active no matter what.
pub struct StubbornEngine;

impl TimeLockEngine for StubbornEngine {
    fn encrypt(&self, plaintext: &[u8], _spec: &LockTimeSpec) -> Result<Vec<u8>, EngineError> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, _ciphertext: &[u8]) -> Result<Vec<u8>, EngineError> {
        Err(EngineError::TooEarly { remaining_ms: None })
    }
}
