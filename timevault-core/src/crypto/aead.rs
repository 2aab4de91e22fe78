use chacha20poly1305::{
    Key, XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};

use crate::error::EngineError;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;

/// Raw 32-byte key.
#[derive(Clone)]
pub struct AeadKey(pub [u8; KEY_LEN]);

impl std::fmt::Debug for AeadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AeadKey(..)")
    }
}

pub fn random_nonce() -> Result<[u8; NONCE_LEN], EngineError> {
    let mut nonce = [0u8; NONCE_LEN];
    getrandom::getrandom(&mut nonce).map_err(|e| EngineError::Other(format!("rng: {e}")))?;
    Ok(nonce)
}

/// Seal a whole buffer, binding `ad`.
pub fn seal_whole(
    key: &AeadKey,
    nonce: &[u8; NONCE_LEN],
    ad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, EngineError> {
    let aead = XChaCha20Poly1305::new(Key::from_slice(&key.0));
    aead.encrypt(
        XNonce::from_slice(nonce),
        Payload {
            msg: plaintext,
            aad: ad,
        },
    )
    .map_err(|_| EngineError::Other("encrypt".into()))
}

/// Open a whole buffer. Any authentication failure is corruption.
pub fn open_whole(
    key: &AeadKey,
    nonce: &[u8; NONCE_LEN],
    ad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, EngineError> {
    let aead = XChaCha20Poly1305::new(Key::from_slice(&key.0));
    aead.decrypt(
        XNonce::from_slice(nonce),
        Payload {
            msg: ciphertext,
            aad: ad,
        },
    )
    .map_err(|_| EngineError::Corrupt("authentication failed".into()))
}
