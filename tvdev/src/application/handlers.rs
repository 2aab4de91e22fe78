use std::path::PathBuf;
use std::thread;

use timevault_core::envelope::metadata::format_timestamp;
use timevault_core::error::{Result, VaultError};
use timevault_core::progress::ProgressEvent;
use timevault_core::time_expr::format_countdown;
use timevault_core::{
    Clock, ItemState, LockedItem, MigrateOptions, VaultContext, parse_lock_time_in,
};

use super::{Session, classify, describe};

/// Run `f` with a stderr listener attached to the context's progress hub.
fn with_progress<T>(ctx: VaultContext, show: bool, f: impl FnOnce(&VaultContext) -> T) -> T {
    if !show {
        return f(&ctx);
    }
    let mut sub = ctx.progress().subscribe();
    let printer = thread::spawn(move || {
        while let Some(ev) = sub.next_blocking() {
            eprintln!("{}", progress_line(&ev));
        }
    });
    let out = f(&ctx);
    // dropping the hub closes the channel and ends the printer
    drop(ctx);
    let _ = printer.join();
    out
}

fn progress_line(ev: &ProgressEvent) -> String {
    format!(
        "[{:?} #{}] {:>5.1}% {:?} {}",
        ev.operation,
        ev.operation_id,
        ev.percent,
        ev.stage,
        ev.current_file.as_deref().unwrap_or("")
    )
}

fn state_label(item: &LockedItem, now: time::OffsetDateTime) -> &'static str {
    match item.state(now) {
        ItemState::New => "new",
        ItemState::Locked => "locked",
        ItemState::Unlockable => "ready",
        ItemState::Unlocked => "unlocked",
        ItemState::Opened => "opened",
    }
}

pub fn handle_lock(
    session: &Session,
    paths: Vec<PathBuf>,
    unlock_at: String,
    vault: Option<PathBuf>,
    delete_original: bool,
    progress: bool,
) -> Result<()> {
    // parsed before any worker thread exists so the system zone can be queried
    let clock = session.clock();
    let spec = parse_lock_time_in(&unlock_at, clock.now(), &clock)?;
    let ctx = session.context()?;
    let results = with_progress(ctx, progress, |ctx| {
        ctx.lock_batch(&paths, &spec, vault.as_deref(), delete_original)
    });

    let mut first_err: Option<VaultError> = None;
    for (src, res) in results {
        match res {
            Ok(done) => {
                println!(
                    "locked {} -> {} (unlocks {}, {} -> {} bytes, {:.0}%)",
                    src.display(),
                    done.item.paths.primary().display(),
                    format_timestamp(done.item.metadata.unlocks),
                    done.stats.original_size,
                    done.stats.compressed_size,
                    done.stats.compression_ratio() * 100.0,
                );
                if let Some(err) = done.deletion_error {
                    eprintln!("warning: {err}");
                }
            }
            Err(e) => {
                let e = VaultError::from(e);
                if first_err.is_some() {
                    let (_, category) = classify(&e);
                    eprintln!("error[{category}]: {}: {}", src.display(), describe(&e));
                } else {
                    first_err = Some(e);
                }
            }
        }
    }
    // the first failure decides the exit status and is printed by the caller
    first_err.map_or(Ok(()), Err)
}

pub fn handle_unlock(session: &Session, path: PathBuf, output: Option<PathBuf>, progress: bool) -> Result<()> {
    let ctx = session.context()?;
    let res = with_progress(ctx, progress, |ctx| ctx.unlock(&path, output.as_deref()))?;
    match res.state {
        ItemState::Opened => println!("already unlocked: {}", res.output_path.display()),
        _ => println!("unlocked {} -> {}", path.display(), res.output_path.display()),
    }
    Ok(())
}

pub fn handle_info(session: &Session, path: PathBuf) -> Result<()> {
    let ctx = session.read_only_context()?;
    let item = ctx.inspect(&path)?;
    let now = ctx.now();
    let meta = &item.metadata;

    println!("name:       {}", item.display_name);
    println!("id:         {}", item.id);
    println!("format:     {}", item.format.as_str());
    println!("path:       {}", item.paths.primary().display());
    println!("state:      {}", state_label(&item, now));
    println!("created:    {}", format_timestamp(meta.created));
    println!("unlocks:    {}", format_timestamp(meta.unlocks));
    println!("duration:   {}", meta.duration_text);
    if !item.is_ready {
        println!("remaining:  {}", format_countdown(item.remaining_ms(now)));
    }
    if let Some(at) = meta.unlocked_at {
        println!("unlocked:   {}", format_timestamp(at));
    }
    if let Some(out) = &item.unlocked_output_path {
        println!("output:     {}", out.display());
    }
    if let (Some(u), Some(c)) = (meta.original_size, meta.compressed_size) {
        println!("size:       {u} -> {c} bytes");
    }
    if let Some(n) = meta.file_count {
        println!("files:      {n}");
    }
    Ok(())
}

pub fn handle_list(session: &Session, vaults: Vec<PathBuf>) -> Result<()> {
    let ctx = session.read_only_context()?;
    let snap = if vaults.is_empty() {
        ctx.snapshot()
    } else {
        ctx.snapshot_of(&vaults)
    };
    if snap.items.is_empty() {
        println!("(no items)");
    }
    for item in &snap.items {
        let when = if item.is_ready {
            format_timestamp(item.metadata.unlocks)
        } else {
            format!("in {}", format_countdown(item.remaining_ms(snap.taken_at)))
        };
        println!(
            "{:<9} {:<7} {:<24} {}  {}",
            state_label(item, snap.taken_at),
            item.format.as_str(),
            when,
            item.display_name,
            item.paths.primary().display()
        );
    }
    for rej in &snap.rejected {
        eprintln!("skipped {}: {}", rej.path.display(), rej.reason);
    }
    Ok(())
}

pub fn handle_migrate(session: &Session, path: PathBuf, delete_old: bool, require_unlockable: bool) -> Result<()> {
    let ctx = session.context()?;
    let opts = MigrateOptions {
        delete_originals: delete_old,
        require_unlockable,
    };
    let res = ctx.migrate(&path, opts)?;
    println!(
        "migrated {} -> {}",
        res.legacy_key_file.display(),
        res.unified_path.display()
    );
    for err in &res.deletion_errors {
        eprintln!("warning: {err}");
    }
    Ok(())
}

pub fn handle_vaults_show(session: &Session) -> Result<()> {
    let settings = session.settings()?;
    println!("settings: {}", session.settings_path.display());
    if settings.vault_directories.is_empty() {
        println!(
            "(none configured; default {})",
            timevault_core::paths::default_vault_dir(&session.data_dir).display()
        );
    }
    for dir in &settings.vault_directories {
        println!("{dir}");
    }
    Ok(())
}

pub fn handle_vaults_add(session: &Session, dir: String) -> Result<()> {
    let mut settings = session.settings()?;
    if settings.add_vault(&dir) {
        settings.save(&session.settings_path)?;
        println!("added {dir}");
    } else {
        println!("already configured: {dir}");
    }
    Ok(())
}

pub fn handle_vaults_remove(session: &Session, dir: String) -> Result<()> {
    let mut settings = session.settings()?;
    if settings.remove_vault(&dir) {
        settings.save(&session.settings_path)?;
        println!("removed {dir}");
    } else {
        println!("not configured: {dir}");
    }
    Ok(())
}
