use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Arc;

use tempfile::TempDir;
use timevault_core::bundle::{Archiver, BundleArchiver};
use timevault_core::container::legacy;
use timevault_core::crypto::aead::AeadKey;
use timevault_core::{Clock, ItemMetadata, LocalSealEngine, SystemClock, TimeLockEngine, parse_lock_time};

const KEY_HEX: &str = "abababababababababababababababababababababababababababababababab";

struct Env {
    root: TempDir,
}

impl Env {
    fn new() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
        }
    }

    fn vault(&self) -> PathBuf {
        self.root.path().join("vault")
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_tvdev"));
        cmd.args(args)
            .env("TIMEVAULT_DATA_DIR", self.root.path().join("data"))
            .env("TIMEVAULT_SETTINGS", self.root.path().join("settings.json"))
            .env_remove("TIMEVAULT_ENGINE_KEY")
            .env_remove("RUST_LOG");
        cmd
    }

    fn tvdev(&self, args: &[&str]) -> Output {
        self.command(args)
            .arg("--engine-key")
            .arg(KEY_HEX)
            .output()
            .unwrap()
    }

    /// Without `--engine-key`, so the binary falls back to the key file.
    fn tvdev_keyless(&self, args: &[&str]) -> Output {
        self.command(args).output().unwrap()
    }

    fn write(&self, name: &str, contents: &str) -> PathBuf {
        let p = self.root.path().join(name);
        fs::write(&p, contents).unwrap();
        p
    }
}

fn stdout(o: &Output) -> String {
    String::from_utf8_lossy(&o.stdout).into_owned()
}

fn stderr(o: &Output) -> String {
    String::from_utf8_lossy(&o.stderr).into_owned()
}

fn s(p: &Path) -> &str {
    p.to_str().unwrap()
}

#[test]
fn vaults_are_persisted() {
    let env = Env::new();
    let vault = env.vault();

    let out = env.tvdev(&["vaults", "add", s(&vault)]);
    assert!(out.status.success(), "{}", stderr(&out));
    let again = env.tvdev(&["vaults", "add", &format!("{}/", s(&vault))]);
    assert!(stdout(&again).contains("already configured"));

    let show = env.tvdev(&["vaults", "show"]);
    assert!(stdout(&show).lines().any(|l| l == s(&vault)));

    let removed = env.tvdev(&["vaults", "remove", s(&vault)]);
    assert!(stdout(&removed).contains("removed"));
    let show = env.tvdev(&["vaults", "show"]);
    assert!(stdout(&show).contains("none configured"));
}

#[test]
fn early_unlock_exits_with_countdown() {
    let env = Env::new();
    let src = env.write("secret.txt", "hidden");
    let vault = env.vault();

    let out = env.tvdev(&["lock", "--unlock-at", "2 hours", "--vault", s(&vault), s(&src)]);
    assert!(out.status.success(), "{}", stderr(&out));
    let item = vault.join("secret.txt.tlock");
    assert!(item.exists());
    assert!(src.exists());

    let out = env.tvdev(&["unlock", s(&item)]);
    assert_eq!(out.status.code(), Some(3));
    let err = stderr(&out);
    assert!(err.starts_with("error[too-early]: still locked, unlocks in "), "{err}");
    assert!(err.contains("h "), "{err}");

    let info = env.tvdev(&["info", s(&item)]);
    let text = stdout(&info);
    assert!(text.contains("state:      locked"), "{text}");
    assert!(text.contains("duration:   2h"), "{text}");
    assert!(text.contains("name:       secret.txt"), "{text}");
}

#[test]
fn lock_then_unlock_after_expiry() {
    let env = Env::new();
    let src = env.write("soon.txt", "patience");
    let vault = env.vault();

    let out = env.tvdev(&["lock", "-u", "2s", "--vault", s(&vault), "--delete-original", s(&src)]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(!src.exists());

    std::thread::sleep(std::time::Duration::from_millis(3100));
    let item = vault.join("soon.txt.tlock");
    let out = env.tvdev(&["unlock", s(&item), "--progress"]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(stderr(&out).contains("100.0%"));
    let restored = vault.join("unlocked_soon.txt").join("soon.txt");
    assert_eq!(fs::read_to_string(restored).unwrap(), "patience");

    let out = env.tvdev(&["unlock", s(&item)]);
    assert!(stdout(&out).starts_with("already unlocked"));
}

#[test]
fn bad_input_maps_to_exit_codes() {
    let env = Env::new();
    let src = env.write("x.txt", "x");

    let out = env.tvdev(&["lock", "--unlock-at", "soonish", s(&src)]);
    assert_eq!(out.status.code(), Some(2));
    assert!(stderr(&out).starts_with("error[parse]:"));

    let out = env.tvdev(&["lock", "--unlock-at", "2000-01-01", s(&src)]);
    assert_eq!(out.status.code(), Some(2));

    let missing = env.root.path().join("nope.tlock");
    let out = env.tvdev(&["unlock", s(&missing)]);
    assert_eq!(out.status.code(), Some(4));
    assert!(stderr(&out).starts_with("error[io]:"));

    let corrupt = env.write("junk.tlock", "not an envelope");
    let out = env.tvdev(&["unlock", s(&corrupt)]);
    assert_eq!(out.status.code(), Some(5));
}

#[test]
fn legacy_pair_is_listed_then_migrated() {
    let env = Env::new();
    let vault = env.vault();
    fs::create_dir_all(&vault).unwrap();
    let src = env.write("letter.txt", "dear future me");

    let clock = Arc::new(SystemClock::utc());
    let key: [u8; 32] = [0xab; 32];
    let engine = LocalSealEngine::new(AeadKey(key), clock.clone());
    let spec = parse_lock_time("1d", clock.now()).unwrap();
    let packed = BundleArchiver::default()
        .pack(&src, &mut |_: &str, _: u64, _: u64| {})
        .unwrap();
    let ct = engine.encrypt(&packed.bytes, &spec).unwrap();
    let meta = ItemMetadata::new_locked(&spec, "letter.txt", clock.now(), Some(packed.stats));
    let (key_file, archive) = legacy::write_pair(&vault, "letter", &meta, &ct).unwrap();

    let list = env.tvdev(&["list", "--vault", s(&vault)]);
    let text = stdout(&list);
    assert!(text.contains("legacy"), "{text}");
    assert!(text.contains("letter.txt"), "{text}");

    let out = env.tvdev(&["migrate", "--require-unlockable", s(&key_file)]);
    assert_eq!(out.status.code(), Some(3));

    let out = env.tvdev(&["migrate", "--delete-old", s(&archive)]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(!key_file.exists() && !archive.exists());

    let list = env.tvdev(&["list", "--vault", s(&vault)]);
    let text = stdout(&list);
    assert!(text.contains("unified"), "{text}");
    assert!(!text.contains("legacy"), "{text}");

    let out = env.tvdev(&["migrate", s(&vault.join("letter.tlock"))]);
    assert_eq!(out.status.code(), Some(4));
}

#[test]
fn read_only_commands_do_not_create_an_engine_key() {
    let env = Env::new();
    let src = env.write("quiet.txt", "shh");
    let vault = env.vault();
    let out = env.tvdev(&["lock", "--unlock-at", "1h", "--vault", s(&vault), s(&src)]);
    assert!(out.status.success(), "{}", stderr(&out));
    let key_file = env.root.path().join("data/engine.key");

    let list = env.tvdev_keyless(&["list", "--vault", s(&vault)]);
    assert!(list.status.success(), "{}", stderr(&list));
    assert!(stdout(&list).contains("quiet.txt"));

    let info = env.tvdev_keyless(&["info", s(&vault.join("quiet.txt.tlock"))]);
    assert!(info.status.success(), "{}", stderr(&info));
    assert!(stdout(&info).contains("state:      locked"));
    assert!(!key_file.exists(), "listing and inspecting must not generate a key");

    // unlocking needs the engine, which generates the key file on first use
    let out = env.tvdev_keyless(&["unlock", s(&vault.join("quiet.txt.tlock"))]);
    assert_eq!(out.status.code(), Some(3));
    assert!(key_file.exists());
}
