pub mod handlers;

use std::path::PathBuf;
use std::sync::Arc;

use crate::presentation::cli::{Cli, Commands, VaultCommands};
use time::UtcOffset;
use timevault_core::engine::{LocalSealEngine, resolve_engine_key};
use timevault_core::error::{LockError, MigrationError, Result, UnlockError, VaultError};
use timevault_core::time_expr::format_countdown;
use timevault_core::{SystemClock, VaultContext, VaultSettings, paths};

/// Process-level inputs resolved once from flags and environment.
pub struct Session {
    pub settings_path: PathBuf,
    pub data_dir: PathBuf,
    pub engine_key_hex: Option<String>,
    pub offset: UtcOffset,
}

impl Session {
    /// Local clock; absolute dates resolve with the offset of the target date.
    pub fn clock(&self) -> SystemClock {
        SystemClock::local(self.offset)
    }

    pub fn settings(&self) -> Result<VaultSettings> {
        VaultSettings::load(&self.settings_path)
    }

    /// Full context; resolves (and on first use creates) the engine key.
    pub fn context(&self) -> Result<VaultContext> {
        let key = resolve_engine_key(
            self.engine_key_hex.as_deref(),
            &paths::engine_key_path(&self.data_dir),
        )?;
        let clock = Arc::new(self.clock());
        let engine = Arc::new(LocalSealEngine::new(key, clock.clone()));
        Ok(VaultContext::new(self.settings()?, self.data_dir.clone(), engine, clock))
    }

    /// Context for commands that only read envelopes; leaves the key alone.
    pub fn read_only_context(&self) -> Result<VaultContext> {
        Ok(VaultContext::read_only(
            self.settings()?,
            self.data_dir.clone(),
            Arc::new(self.clock()),
        ))
    }
}

pub fn run(cli: Cli, offset: UtcOffset) -> Result<()> {
    let session = Session {
        settings_path: paths::settings_path(cli.settings.as_deref())?,
        data_dir: paths::data_dir()?,
        engine_key_hex: cli.engine_key_hex,
        offset,
    };
    match cli.command {
        Commands::Lock {
            paths,
            unlock_at,
            vault,
            delete_original,
            progress,
        } => handlers::handle_lock(&session, paths, unlock_at, vault, delete_original, progress),
        Commands::Unlock {
            path,
            output,
            progress,
        } => handlers::handle_unlock(&session, path, output, progress),
        Commands::Info { path } => handlers::handle_info(&session, path),
        Commands::List { vault } => handlers::handle_list(&session, vault),
        Commands::Migrate {
            path,
            delete_old,
            require_unlockable,
        } => handlers::handle_migrate(&session, path, delete_old, require_unlockable),
        Commands::Vaults(cmd) => match cmd {
            VaultCommands::Show => handlers::handle_vaults_show(&session),
            VaultCommands::Add { dir } => handlers::handle_vaults_add(&session, dir),
            VaultCommands::Remove { dir } => handlers::handle_vaults_remove(&session, dir),
        },
    }
}

/// Exit status and the `error[<category>]` tag for a failure.
pub fn classify(e: &VaultError) -> (u8, &'static str) {
    use VaultError as V;
    match e {
        V::Parse(_) | V::Lock(LockError::Parse(_) | LockError::UnrecordableName(_)) => (2, "parse"),
        V::Unlock(UnlockError::TooEarly { .. }) | V::Migration(MigrationError::NotYetDecryptable { .. }) => {
            (3, "too-early")
        }
        V::Lock(LockError::Busy(_)) | V::Unlock(UnlockError::Busy(_)) | V::Migration(MigrationError::Busy(_)) => {
            (6, "busy")
        }
        V::Io(_)
        | V::Lock(LockError::SourceMissing(_) | LockError::TargetExists(_) | LockError::Io(_))
        | V::Unlock(UnlockError::NotFound(_) | UnlockError::Io(_))
        | V::Migration(
            MigrationError::SourceMissing(_)
            | MigrationError::TargetExists(_)
            | MigrationError::NotLegacy(_)
            | MigrationError::Io(_),
        ) => (4, "io"),
        V::Format(_)
        | V::Envelope(_)
        | V::Lock(LockError::Archive(_) | LockError::EncryptionFailed(_))
        | V::Unlock(UnlockError::Corrupt(_) | UnlockError::Envelope(_))
        | V::Migration(MigrationError::IncompleteRecord(_)) => (5, "corrupt"),
        _ => (1, "error"),
    }
}

/// One-line message; waits are rendered as a countdown.
pub fn describe(e: &VaultError) -> String {
    match e {
        VaultError::Unlock(UnlockError::TooEarly { remaining_ms })
        | VaultError::Migration(MigrationError::NotYetDecryptable { remaining_ms }) => {
            format!("still locked, unlocks in {}", format_countdown(*remaining_ms))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use timevault_core::error::ParseError;

    #[test]
    fn categories_map_to_exit_codes() {
        let parse: VaultError = LockError::from(ParseError::NotInFuture { input: "1s".into() }).into();
        assert_eq!(classify(&parse), (2, "parse"));

        let name: VaultError = LockError::UnrecordableName("a\nb".into()).into();
        assert_eq!(classify(&name), (2, "parse"));

        let early: VaultError = UnlockError::TooEarly { remaining_ms: 93_784_000 }.into();
        assert_eq!(classify(&early), (3, "too-early"));
        assert_eq!(describe(&early), "still locked, unlocks in 1d 02h 03m 04s");

        let missing: VaultError = UnlockError::NotFound(PathBuf::from("x.tlock")).into();
        assert_eq!(classify(&missing), (4, "io"));

        let corrupt: VaultError = UnlockError::Corrupt("bad tag".into()).into();
        assert_eq!(classify(&corrupt), (5, "corrupt"));

        let busy: VaultError = MigrationError::Busy(PathBuf::from("a.key.md")).into();
        assert_eq!(classify(&busy), (6, "busy"));

        let other: VaultError = UnlockError::Other("engine offline".into()).into();
        assert_eq!(classify(&other), (1, "error"));
    }
}
