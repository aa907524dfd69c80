/// XChaCha20-Poly1305 sealing of one label under another.
///
/// A sealed record is `nonce (24) || ciphertext (32) || tag (16)`. The key is
/// a label of the previous epoch and the plaintext a label of the new one.
/// Nonces are drawn fresh from the OS CSPRNG for every record; the 24-byte
/// XChaCha20 nonce makes random generation collision-safe.
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::crypto::kdf::LABEL_LEN;
use crate::crypto::sensitive::Label;
use crate::error::{OblivError, Result};

pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;
pub const CIPHERTEXT_LEN: usize = LABEL_LEN + TAG_LEN;
pub const RECORD_LEN: usize = NONCE_LEN + CIPHERTEXT_LEN;

/// Generate a random 24-byte nonce.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Seal `message` under `key` into `out`, which must be exactly one record long.
pub fn seal_label_into(key: &Label, message: &Label, out: &mut [u8]) -> Result<()> {
    if out.len() != RECORD_LEN {
        return Err(OblivError::Encryption(format!(
            "Record buffer is {} bytes, expected {RECORD_LEN}",
            out.len()
        )));
    }
    let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|e| OblivError::Encryption(e.to_string()))?;

    let nonce_bytes = generate_nonce();
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce_bytes), &message.as_bytes()[..])
        .map_err(|e| OblivError::Encryption(e.to_string()))?;

    out[..NONCE_LEN].copy_from_slice(&nonce_bytes);
    out[NONCE_LEN..].copy_from_slice(&ciphertext);
    Ok(())
}

/// Open a sealed record with `key`. Fails if the record was sealed under a
/// different key or was tampered with.
pub fn open_label(key: &Label, record: &[u8]) -> Result<Label> {
    if record.len() != RECORD_LEN {
        return Err(OblivError::Decryption(format!(
            "Record is {} bytes, expected {RECORD_LEN}",
            record.len()
        )));
    }
    let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|e| OblivError::Decryption(e.to_string()))?;

    let (nonce, ciphertext) = record.split_at(NONCE_LEN);
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|e| OblivError::Decryption(e.to_string()))?,
    );

    Label::from_slice(&plaintext)
        .ok_or_else(|| OblivError::Decryption("Opened record is not a label".into()))
}
