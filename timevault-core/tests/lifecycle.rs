mod common;

use std::fs;
use std::sync::Arc;

use common::{DenyRemover, Fixture, StubbornEngine, T0};
use time::Duration;
use timevault_core::container::unified;
use timevault_core::error::{EnvelopeError, LockError, ParseError, UnlockError};
use timevault_core::progress::{OperationKind, Stage};
use timevault_core::{Clock, ItemState, Variant, VaultContext};

#[test]
fn lock_refuse_then_unlock_and_reopen() {
    let fx = Fixture::new();
    let src = fx.source("notes.txt", "meet at the old oak");
    let spec = fx.spec("5m");

    let locked = fx.ctx.lock(&src, &spec, None, false).unwrap();
    let target = fx.vault().join("notes.txt.tlock");
    assert_eq!(locked.item.paths.primary(), target.as_path());
    assert_eq!(locked.state, ItemState::Locked);
    assert_eq!(locked.item.format, Variant::Unified);
    assert!(!locked.item.is_ready);
    assert!(src.exists(), "original kept when deletion was not asked for");

    let (meta, _) = unified::read_full(&target).unwrap();
    assert!(meta.locked);
    assert_eq!(meta.created, T0);
    assert_eq!(meta.unlocks, T0 + Duration::minutes(5));
    assert_eq!(meta.duration_text, "5m");
    assert_eq!(meta.original_filename, "notes.txt");
    assert_eq!(meta.file_count, Some(1));

    fx.clock.set(T0 + Duration::seconds(298));
    match fx.ctx.unlock(&target, None) {
        Err(UnlockError::TooEarly { remaining_ms }) => assert_eq!(remaining_ms, 2000),
        other => panic!("expected TooEarly, got {other:?}"),
    }
    assert!(unified::read_full(&target).unwrap().0.locked, "refusal must not touch the file");

    fx.clock.set(T0 + Duration::minutes(5));
    let unlocked = fx.ctx.unlock(&target, None).unwrap();
    assert_eq!(unlocked.state, ItemState::Unlocked);
    let out = fx.vault().join("unlocked_notes.txt");
    assert_eq!(unlocked.output_path, out);
    assert_eq!(fs::read_to_string(out.join("notes.txt")).unwrap(), "meet at the old oak");
    assert_eq!(unlocked.stats.unwrap().file_count, 1);

    let (meta, _) = unified::read_full(&target).unwrap();
    assert!(!meta.locked);
    assert_eq!(meta.unlocked_at, Some(T0 + Duration::minutes(5)));
    assert_eq!(meta.unlocked_to.as_deref(), out.to_str());
    assert_eq!(fx.ctx.inspect(&target).unwrap().state(fx.ctx.now()), ItemState::Unlocked);

    fx.clock.advance(Duration::hours(1));
    let again = fx.ctx.open(&target).unwrap();
    assert_eq!(again.state, ItemState::Opened);
    assert_eq!(again.output_path, out);
    assert!(again.operation_id.is_none(), "reopening does no work");
    // the envelope still records the first unlock
    assert_eq!(
        unified::read_full(&target).unwrap().0.unlocked_at,
        Some(T0 + Duration::minutes(5))
    );
}

#[test]
fn unlock_redoes_work_when_output_was_removed() {
    let fx = Fixture::new();
    let src = fx.source("a.txt", "alpha");
    let locked = fx.ctx.lock(&src, &fx.spec("1s"), None, false).unwrap();
    let target = locked.item.paths.primary().to_path_buf();
    fx.clock.advance(Duration::seconds(1));

    let first = fx.ctx.unlock(&target, None).unwrap();
    fs::remove_dir_all(&first.output_path).unwrap();
    fx.clock.advance(Duration::seconds(5));
    let second = fx.ctx.unlock(&target, None).unwrap();
    assert_eq!(second.state, ItemState::Unlocked);
    assert_eq!(fs::read_to_string(second.output_path.join("a.txt")).unwrap(), "alpha");
}

#[test]
fn directories_round_trip_with_explicit_output() {
    let fx = Fixture::new();
    let dir = fx.root.path().join("src/project");
    fs::create_dir_all(dir.join("docs/deep")).unwrap();
    fs::create_dir_all(dir.join("empty")).unwrap();
    fs::write(dir.join("readme.md"), "# project\n".repeat(200)).unwrap();
    fs::write(dir.join("docs/deep/plan.txt"), "step one").unwrap();

    let locked = fx.ctx.lock(&dir, &fx.spec("1h"), None, false).unwrap();
    assert_eq!(locked.stats.file_count, 2);
    assert!(locked.stats.compressed_size < locked.stats.original_size);

    fx.clock.advance(Duration::hours(1));
    let out = fx.root.path().join("restored");
    let res = fx.ctx.unlock(locked.item.paths.primary(), Some(&out)).unwrap();
    assert_eq!(res.output_path, out);
    assert_eq!(
        fs::read_to_string(out.join("project/docs/deep/plan.txt")).unwrap(),
        "step one"
    );
    assert!(out.join("project/empty").is_dir());
}

#[test]
fn deletion_failure_is_reported_but_lock_succeeds() {
    let fx = Fixture::with(|ctx| ctx.with_remover(Arc::new(DenyRemover)));
    let src = fx.source("keep.txt", "still here");

    let res = fx.ctx.lock(&src, &fx.spec("1d"), None, true).unwrap();
    let err = res.deletion_error.expect("deletion error reported");
    assert_eq!(err.path, src);
    assert!(err.message.contains("permission denied"));
    assert!(!res.original_deleted);
    assert!(src.exists());
    assert!(res.item.paths.primary().exists());
}

#[test]
fn original_is_removed_after_verified_lock() {
    let fx = Fixture::new();
    let src = fx.source("gone.txt", "bye");
    let res = fx.ctx.lock(&src, &fx.spec("1d"), None, true).unwrap();
    assert!(res.original_deleted);
    assert!(res.deletion_error.is_none());
    assert!(!src.exists());
}

#[test]
fn lock_rejections_leave_nothing_behind() {
    let fx = Fixture::new();
    let src = fx.source("late.txt", "x");

    let spec = fx.spec("1s");
    fx.clock.advance(Duration::seconds(2));
    assert!(matches!(
        fx.ctx.lock(&src, &spec, None, false),
        Err(LockError::Parse(ParseError::NotInFuture { .. }))
    ));
    assert!(!fx.vault().join("late.txt.tlock").exists());

    let missing = fx.root.path().join("src/nope.txt");
    assert!(matches!(
        fx.ctx.lock(&missing, &fx.spec("1h"), None, false),
        Err(LockError::SourceMissing(p)) if p == missing
    ));

    fx.ctx.lock(&src, &fx.spec("1h"), None, false).unwrap();
    assert!(matches!(
        fx.ctx.lock(&src, &fx.spec("2h"), None, false),
        Err(LockError::TargetExists(_))
    ));
}

#[test]
fn late_lock_keeps_the_requested_duration() {
    let fx = Fixture::new();
    let spec = fx.spec("5m");
    fx.clock.advance(Duration::seconds(3));

    let a = fx.source("a.txt", "a");
    let locked = fx.ctx.lock(&a, &spec, None, false).unwrap();
    let meta = &locked.item.metadata;
    assert_eq!(meta.created, T0 + Duration::seconds(3));
    assert_eq!(meta.unlocks, meta.created + Duration::minutes(5));
    assert_eq!(meta.duration_text, "5m");

    fx.clock.advance(Duration::seconds(4));
    let batch = [fx.source("b.txt", "b"), fx.source("c.txt", "c")];
    for (src, res) in fx.ctx.lock_batch(&batch, &spec, None, false) {
        let meta = res.unwrap().item.metadata;
        assert_eq!(meta.unlocks - meta.created, Duration::minutes(5), "{}", src.display());
    }

    // past the parse-time instant, still short of the recorded one
    let target = locked.item.paths.primary().to_path_buf();
    fx.clock.set(T0 + Duration::minutes(5) + Duration::seconds(1));
    match fx.ctx.unlock(&target, None) {
        Err(UnlockError::TooEarly { remaining_ms }) => assert_eq!(remaining_ms, 2000),
        other => panic!("expected TooEarly, got {other:?}"),
    }
}

#[test]
fn names_with_line_breaks_never_reach_an_envelope() {
    let fx = Fixture::new();
    let src = fx.source("x\n---", "payload");
    match fx.ctx.lock(&src, &fx.spec("1h"), None, false) {
        Err(LockError::UnrecordableName(name)) => assert_eq!(name, "x\n---"),
        other => panic!("expected UnrecordableName, got {other:?}"),
    }
    assert!(!fx.vault().join("x\n---.tlock").exists());
    assert!(src.exists());

    let ok = fx.source("ok.txt", "fine");
    let target = fx.ctx.lock(&ok, &fx.spec("1s"), None, false).unwrap().item.paths.primary().to_path_buf();
    fx.clock.advance(Duration::seconds(1));
    let output = fx.root.path().join("out\nput");
    assert!(matches!(
        fx.ctx.unlock(&target, Some(&output)),
        Err(UnlockError::Envelope(EnvelopeError::InvalidValue { field: "unlocked_to", .. }))
    ));
    assert!(!output.exists());
    assert!(unified::read_full(&target).unwrap().0.locked);
}

#[test]
fn recorded_name_cannot_steer_output_outside_the_vault() {
    let fx = Fixture::new();
    let src = fx.source("a.txt", "alpha");
    let locked = fx.ctx.lock(&src, &fx.spec("1s"), None, false).unwrap();
    let target = locked.item.paths.primary().to_path_buf();
    let mut meta = locked.item.metadata.clone();
    meta.original_filename = "a/../../../outside".into();
    unified::rewrite_metadata(&target, &meta).unwrap();

    fx.clock.advance(Duration::seconds(1));
    let unlocked = fx.ctx.unlock(&target, None).unwrap();
    assert_eq!(unlocked.output_path, fx.vault().join("unlocked_outside"));
    assert_eq!(fs::read_to_string(unlocked.output_path.join("a.txt")).unwrap(), "alpha");
}

#[test]
fn concurrent_operation_on_same_item_is_busy() {
    let fx = Fixture::new();
    let src = fx.source("busy.txt", "x");
    let guard = fx.ctx.locks().try_acquire(&[src.as_path()]).unwrap();
    assert!(matches!(
        fx.ctx.lock(&src, &fx.spec("1h"), None, false),
        Err(LockError::Busy(_))
    ));
    drop(guard);

    let res = fx.ctx.lock(&src, &fx.spec("1h"), None, false).unwrap();
    let target = res.item.paths.primary().to_path_buf();
    let guard = fx.ctx.locks().try_acquire(&[target.as_path()]).unwrap();
    fx.clock.advance(Duration::hours(2));
    assert!(matches!(fx.ctx.unlock(&target, None), Err(UnlockError::Busy(_))));
    drop(guard);
    assert!(fx.ctx.unlock(&target, None).is_ok());
}

#[test]
fn tampered_payload_is_corrupt() {
    let fx = Fixture::new();
    let src = fx.source("t.txt", "tamper me");
    let res = fx.ctx.lock(&src, &fx.spec("1m"), None, false).unwrap();
    let target = res.item.paths.primary().to_path_buf();

    let mut bytes = fs::read(&target).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x55;
    fs::write(&target, bytes).unwrap();

    fx.clock.advance(Duration::minutes(2));
    assert!(matches!(fx.ctx.unlock(&target, None), Err(UnlockError::Corrupt(_))));
    assert!(!fx.vault().join("unlocked_t.txt").exists());
}

#[test]
fn engine_refusal_wins_over_metadata() {
    let fx = Fixture::new();
    let ctx = VaultContext::new(
        fx.ctx.settings().clone(),
        fx.root.path().join("data"),
        Arc::new(StubbornEngine),
        fx.clock.clone(),
    );
    let src = fx.source("s.txt", "x");
    let res = ctx.lock(&src, &fx.spec("10s"), None, false).unwrap();
    fx.clock.advance(Duration::minutes(1));
    match ctx.unlock(res.item.paths.primary(), None) {
        Err(UnlockError::TooEarly { remaining_ms }) => assert!(remaining_ms >= 1),
        other => panic!("expected TooEarly, got {other:?}"),
    }
}

#[test]
fn progress_is_ordered_and_ends_at_100() {
    let fx = Fixture::new();
    let mut sub = fx.ctx.progress().subscribe();
    let src = fx.source("p.txt", &"progress ".repeat(500));

    let locked = fx.ctx.lock(&src, &fx.spec("1s"), None, false).unwrap();
    fx.clock.advance(Duration::seconds(1));
    let unlocked = fx.ctx.unlock(locked.item.paths.primary(), None).unwrap();

    let events = sub.drain();
    for (op, id) in [
        (OperationKind::Lock, locked.operation_id),
        (OperationKind::Unlock, unlocked.operation_id.unwrap()),
    ] {
        let mine: Vec<_> = events.iter().filter(|e| e.operation_id == id).collect();
        assert!(mine.len() >= 3, "{op:?} emitted {}", mine.len());
        assert!(mine.iter().all(|e| e.operation == op));
        assert!(mine.iter().all(|e| e.current_file.as_deref() == Some("p.txt")));
        assert!(mine.windows(2).all(|w| w[0].percent <= w[1].percent));
        let last = mine.last().unwrap();
        assert_eq!(last.percent, 100.0);
        assert_eq!(last.stage, Stage::Finalizing);
        assert_eq!(mine.iter().filter(|e| e.percent == 100.0).count(), 1);
    }
}

#[test]
fn batch_streams_do_not_interleave() {
    let fx = Fixture::new();
    let mut sub = fx.ctx.progress().subscribe();
    let a = fx.source("a.txt", "a");
    let b = fx.source("b.txt", "b");
    let missing = fx.root.path().join("src/missing.txt");

    let results = fx
        .ctx
        .lock_batch(&[a.clone(), missing.clone(), b.clone()], &fx.spec("1h"), None, false);
    assert_eq!(results.len(), 3);
    assert!(results[0].1.is_ok());
    assert!(matches!(results[1].1, Err(LockError::SourceMissing(_))));
    assert!(results[2].1.is_ok());

    let ids: Vec<u64> = sub.drain().iter().map(|e| e.operation_id).collect();
    let mut runs = ids.clone();
    runs.dedup();
    assert_eq!(runs.len(), 2, "each operation's events are contiguous: {ids:?}");
}

#[test]
fn explicit_vault_directory_is_created() {
    let fx = Fixture::new();
    let src = fx.source("elsewhere.txt", "x");
    let vault = fx.root.path().join("other/vault");
    let res = fx.ctx.lock(&src, &fx.spec("1h"), Some(&vault), false).unwrap();
    assert_eq!(res.item.paths.primary(), vault.join("elsewhere.txt.tlock"));
    assert_eq!(fx.ctx.now(), fx.clock.now());
}

#[test]
fn read_only_context_inspects_but_cannot_seal() {
    let fx = Fixture::new();
    let src = fx.source("a.txt", "alpha");
    let locked = fx.ctx.lock(&src, &fx.spec("1h"), None, false).unwrap();
    let target = locked.item.paths.primary().to_path_buf();

    let ro = VaultContext::read_only(
        fx.ctx.settings().clone(),
        fx.ctx.data_dir().to_path_buf(),
        fx.clock.clone(),
    );
    assert_eq!(ro.inspect(&target).unwrap().display_name, "a.txt");
    assert_eq!(ro.snapshot().items.len(), 1);

    let other = fx.source("b.txt", "b");
    assert!(matches!(
        ro.lock(&other, &fx.spec("1h"), None, false),
        Err(LockError::EncryptionFailed(_))
    ));
    assert!(!fx.vault().join("b.txt.tlock").exists());
}
