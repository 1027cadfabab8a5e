//! Reversible password obscuring, compatible with `rclone obscure`.
//!
//! This is obfuscation, not encryption: the key is public. It keeps stored
//! passwords from being readable at a glance.

use aes::Aes256;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ctr::cipher::{KeyIvInit, StreamCipher};

use veilvault_common::{Error, Result};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

const IV_LENGTH: usize = 16;

const OBSCURE_KEY: [u8; 32] = [
    0x9c, 0x93, 0x5b, 0x48, 0x73, 0x0a, 0x55, 0x4d, 0x6b, 0xfd, 0x7c, 0x63, 0xc8, 0x86, 0xa9, 0x2b,
    0xd3, 0x90, 0x19, 0x8e, 0xb8, 0x12, 0x8a, 0xfb, 0xf4, 0xde, 0x16, 0x2b, 0x8b, 0x95, 0xf6, 0x38,
];

fn apply_keystream(iv: &[u8], data: &mut [u8]) -> Result<()> {
    let mut cipher = Aes256Ctr::new_from_slices(&OBSCURE_KEY, iv)
        .map_err(|e| Error::Crypto(format!("Invalid obscure IV: {}", e)))?;
    cipher.apply_keystream(data);
    Ok(())
}

/// Obscure `plain` with a random IV. The empty string stays empty.
pub fn obscure(plain: &str) -> Result<String> {
    if plain.is_empty() {
        return Ok(String::new());
    }
    obscure_with_iv(plain, &rand::random::<[u8; IV_LENGTH]>())
}

/// Obscure with a caller-chosen IV.
pub fn obscure_with_iv(plain: &str, iv: &[u8; IV_LENGTH]) -> Result<String> {
    let mut out = Vec::with_capacity(IV_LENGTH + plain.len());
    out.extend_from_slice(iv);
    out.extend_from_slice(plain.as_bytes());
    apply_keystream(iv, &mut out[IV_LENGTH..])?;
    Ok(URL_SAFE_NO_PAD.encode(out))
}

/// Reverse [`obscure`].
///
/// # Errors
/// - `Crypto` if the input is not base64 or is shorter than the IV
pub fn reveal(obscured: &str) -> Result<String> {
    if obscured.is_empty() {
        return Ok(String::new());
    }
    let mut raw = URL_SAFE_NO_PAD
        .decode(obscured.as_bytes())
        .map_err(|e| Error::Crypto(format!("Obscured password is not valid base64: {}", e)))?;
    if raw.len() < IV_LENGTH {
        return Err(Error::Crypto(
            "Obscured password too short".to_string(),
        ));
    }
    let (iv, body) = raw.split_at_mut(IV_LENGTH);
    apply_keystream(iv, body)?;
    String::from_utf8(body.to_vec())
        .map_err(|_| Error::Crypto("Revealed password is not valid UTF-8".to_string()))
}

/// Heuristic for values stored without an explicit "obscured" marker.
///
/// Obscured values are URL-safe base64 of at least IV length, so anything
/// shorter or with other characters is treated as plaintext.
pub fn is_obscured(value: &str) -> bool {
    value.len() > 10
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
