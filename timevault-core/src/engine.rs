//! Encryption collaborator seam and the in-process development engine.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, info};

use crate::clock::{Clock, millis_until};
use crate::crypto::aead::{AeadKey, KEY_LEN, NONCE_LEN, TAG_LEN, open_whole, random_nonce, seal_whole};
use crate::crypto::hex::parse_hex_array;
use crate::error::EngineError;
use crate::time_expr::LockTimeSpec;

pub const ENGINE_KEY_ENV: &str = "TIMEVAULT_ENGINE_KEY";

/// Opaque "encrypt with unlock time" and "decrypt" operations.
///
/// `decrypt` must report an early attempt as [`EngineError::TooEarly`], never as
/// corruption.
pub trait TimeLockEngine: Send + Sync {
    fn encrypt(&self, plaintext: &[u8], spec: &LockTimeSpec) -> Result<Vec<u8>, EngineError>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, EngineError>;
}

/// Stands in where no key has been loaded; every operation is refused.
pub struct DetachedEngine;

impl TimeLockEngine for DetachedEngine {
    fn encrypt(&self, _plaintext: &[u8], _spec: &LockTimeSpec) -> Result<Vec<u8>, EngineError> {
        Err(EngineError::Other("no engine key loaded".into()))
    }

    fn decrypt(&self, _ciphertext: &[u8]) -> Result<Vec<u8>, EngineError> {
        Err(EngineError::Other("no engine key loaded".into()))
    }
}

const SEAL_MAGIC: &[u8; 7] = b"TVSEAL1";
const SEAL_HEADER_LEN: usize = SEAL_MAGIC.len() + 8 + NONCE_LEN;

/// XChaCha20-Poly1305 with the unlock instant bound as associated data.
///
/// Refusal before the unlock instant is enforced by this process's clock only;
/// it is a stand-in for a beacon-backed engine, not a replacement for one.
pub struct LocalSealEngine {
    key: AeadKey,
    clock: Arc<dyn Clock>,
}

impl LocalSealEngine {
    pub fn new(key: AeadKey, clock: Arc<dyn Clock>) -> Self {
        Self { key, clock }
    }

    fn aad(unlock_secs: i64) -> Vec<u8> {
        let mut ad = Vec::with_capacity(SEAL_MAGIC.len() + 8);
        ad.extend_from_slice(SEAL_MAGIC);
        ad.extend_from_slice(&unlock_secs.to_le_bytes());
        ad
    }

    /// Unlock instant recorded in a sealed blob.
    pub fn sealed_unlock_instant(ciphertext: &[u8]) -> Result<OffsetDateTime, EngineError> {
        if ciphertext.len() < SEAL_HEADER_LEN + TAG_LEN || !ciphertext.starts_with(SEAL_MAGIC) {
            return Err(EngineError::Corrupt("not a sealed payload".into()));
        }
        let mut secs = [0u8; 8];
        secs.copy_from_slice(&ciphertext[SEAL_MAGIC.len()..SEAL_MAGIC.len() + 8]);
        OffsetDateTime::from_unix_timestamp(i64::from_le_bytes(secs))
            .map_err(|_| EngineError::Corrupt("unlock instant out of range".into()))
    }
}

impl TimeLockEngine for LocalSealEngine {
    fn encrypt(&self, plaintext: &[u8], spec: &LockTimeSpec) -> Result<Vec<u8>, EngineError> {
        let unlock_secs = spec.unlock_instant.unix_timestamp();
        let nonce = random_nonce()?;
        let ct = seal_whole(&self.key, &nonce, &Self::aad(unlock_secs), plaintext)?;
        let mut out = Vec::with_capacity(SEAL_HEADER_LEN + ct.len());
        out.extend_from_slice(SEAL_MAGIC);
        out.extend_from_slice(&unlock_secs.to_le_bytes());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ct);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, EngineError> {
        let unlock = Self::sealed_unlock_instant(ciphertext)?;
        let now = self.clock.now();
        if now < unlock {
            let remaining_ms = millis_until(now, unlock);
            debug!(remaining_ms, "seal refused before unlock instant");
            return Err(EngineError::TooEarly {
                remaining_ms: Some(remaining_ms),
            });
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&ciphertext[SEAL_MAGIC.len() + 8..SEAL_HEADER_LEN]);
        open_whole(
            &self.key,
            &nonce,
            &Self::aad(unlock.unix_timestamp()),
            &ciphertext[SEAL_HEADER_LEN..],
        )
    }
}

/// Engine key from an explicit hex value, else [`ENGINE_KEY_ENV`], else the key
/// file (generated on first use).
pub fn resolve_engine_key(explicit_hex: Option<&str>, key_file: &Path) -> io::Result<AeadKey> {
    if let Some(hex) = explicit_hex {
        return parse_hex_array::<KEY_LEN>(hex).map(AeadKey);
    }
    if let Ok(hex) = std::env::var(ENGINE_KEY_ENV) {
        return parse_hex_array::<KEY_LEN>(&hex).map(AeadKey);
    }
    load_or_create_key(key_file)
}

pub fn load_or_create_key(path: &Path) -> io::Result<AeadKey> {
    match fs::read_to_string(path) {
        Ok(text) => parse_hex_array::<KEY_LEN>(&text).map(AeadKey),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let mut key = [0u8; KEY_LEN];
            getrandom::getrandom(&mut key).map_err(|e| io::Error::other(e.to_string()))?;
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)?;
            }
            write_private(path, hex::encode(key).as_bytes())?;
            info!(path = %path.display(), "generated engine key");
            Ok(AeadKey(key))
        }
        Err(e) => Err(e),
    }
}

fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    io::Write::write_all(&mut tmp, contents)?;
    tmp.as_file().sync_all()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file().set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    tmp.persist_noclobber(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::time_expr::parse;
    use time::Duration;
    use time::macros::datetime;

    fn engine(clock: Arc<FixedClock>) -> LocalSealEngine {
        LocalSealEngine::new(AeadKey([42u8; KEY_LEN]), clock)
    }

    #[test]
    fn refuses_until_unlock_instant() {
        let t0 = datetime!(2025-01-01 00:00:00 UTC);
        let clock = Arc::new(FixedClock::new(t0));
        let eng = engine(clock.clone());
        let spec = parse("10s", t0).unwrap();
        let ct = eng.encrypt(b"secret", &spec).unwrap();

        clock.set(t0 + Duration::seconds(8));
        assert_eq!(
            eng.decrypt(&ct),
            Err(EngineError::TooEarly {
                remaining_ms: Some(2000)
            })
        );

        clock.set(t0 + Duration::seconds(10));
        assert_eq!(eng.decrypt(&ct).unwrap(), b"secret");
        assert_eq!(
            LocalSealEngine::sealed_unlock_instant(&ct).unwrap(),
            spec.unlock_instant
        );
    }

    #[test]
    fn tampering_is_corruption_not_too_early() {
        let t0 = datetime!(2025-01-01 00:00:00 UTC);
        let clock = Arc::new(FixedClock::new(t0));
        let eng = engine(clock.clone());
        let ct = eng.encrypt(b"secret", &parse("1s", t0).unwrap()).unwrap();
        clock.advance(Duration::hours(1));

        let mut flipped = ct.clone();
        let last = flipped.len() - 1;
        flipped[last] ^= 1;
        assert!(matches!(eng.decrypt(&flipped), Err(EngineError::Corrupt(_))));
        assert!(matches!(eng.decrypt(b"garbage"), Err(EngineError::Corrupt(_))));

        // Moving the unlock instant earlier breaks authentication.
        let mut moved = ct;
        moved[SEAL_MAGIC.len()] ^= 1;
        assert!(matches!(eng.decrypt(&moved), Err(EngineError::Corrupt(_))));
    }

    #[test]
    fn key_file_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys/engine.key");
        let a = load_or_create_key(&path).unwrap();
        let b = load_or_create_key(&path).unwrap();
        assert_eq!(a.0, b.0);
        let explicit = resolve_engine_key(Some(&"11".repeat(32)), &path).unwrap();
        assert_eq!(explicit.0, [0x11; 32]);
        assert!(resolve_engine_key(Some("abc"), &path).is_err());
    }
}
