/// Label derivation: keyed BLAKE2b over (master secret, bit index, selector).
///
/// Layout matches libsodium's `crypto_kdf_derive_from_key`:
///   key      = master secret (32 bytes)
///   salt     = subkey_id (8 LE) || 0^8
///   personal = context (8) || 0^8
///   message  = empty
/// with `subkey_id = 2 * bit_index + selector`.
use blake2::digest::consts::U32;
use blake2::digest::FixedOutput;
use blake2::Blake2bMac;

use crate::crypto::sensitive::{Label, MasterSecret, SECRET_LEN};
use crate::error::{OblivError, Result};

pub const LABEL_LEN: usize = SECRET_LEN;
pub const CONTEXT_LEN: usize = 8;

const PARAM_LEN: usize = 16;

type LabelMac = Blake2bMac<U32>;

/// Derive the `selector`-label of bit `bit_index` under `secret`.
pub fn derive_label(
    secret: &MasterSecret,
    context: &[u8; CONTEXT_LEN],
    bit_index: usize,
    selector: u8,
) -> Result<Label> {
    if selector > 1 {
        return Err(OblivError::InvalidSelector(selector));
    }
    let subkey_id = 2 * bit_index as u64 + u64::from(selector);

    let mut salt = [0u8; PARAM_LEN];
    salt[..8].copy_from_slice(&subkey_id.to_le_bytes());
    let mut personal = [0u8; PARAM_LEN];
    personal[..CONTEXT_LEN].copy_from_slice(context);

    let mac = LabelMac::new_with_salt_and_personal(secret.as_bytes(), &salt, &personal)
        .map_err(|e| OblivError::KeyDerivation(e.to_string()))?;

    Ok(Label::new(mac.finalize_fixed().into()))
}

/// Both labels of one bit position, `(label0, label1)`.
pub fn derive_pair(
    secret: &MasterSecret,
    context: &[u8; CONTEXT_LEN],
    bit_index: usize,
) -> Result<(Label, Label)> {
    Ok((
        derive_label(secret, context, bit_index, 0)?,
        derive_label(secret, context, bit_index, 1)?,
    ))
}
