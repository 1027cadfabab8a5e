//! Filename encryption in rclone's "standard" mode.
//!
//! Each path segment is PKCS#7 padded, enciphered with EME under the name key
//! and tweak, and encoded as lowercase base32hex without padding. The
//! transform is deterministic so repeated uploads land on the same name.

use aes::Aes256;
use data_encoding::BASE32HEX_NOPAD;

use crate::eme::{self, Direction, BLOCK_SIZE, MAX_INPUT_LEN};
use veilvault_common::{Error, Result};

fn pkcs7_pad(data: &[u8]) -> Vec<u8> {
    let pad = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    let mut out = Vec::with_capacity(data.len() + pad);
    out.extend_from_slice(data);
    out.resize(data.len() + pad, pad as u8);
    out
}

fn pkcs7_unpad(mut data: Vec<u8>) -> Result<Vec<u8>> {
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(Error::Crypto("Bad PKCS#7 padding: length".to_string()));
    }
    let pad = data[data.len() - 1] as usize;
    if pad == 0 || pad > BLOCK_SIZE {
        return Err(Error::Crypto("Bad PKCS#7 padding: value".to_string()));
    }
    if data[data.len() - pad..].iter().any(|b| *b as usize != pad) {
        return Err(Error::Crypto("Bad PKCS#7 padding: bytes".to_string()));
    }
    data.truncate(data.len() - pad);
    Ok(data)
}

/// Encrypt one path segment. The empty segment maps to the empty string.
pub fn encrypt_segment(cipher: &Aes256, tweak: &[u8; BLOCK_SIZE], plain: &str) -> Result<String> {
    if plain.is_empty() {
        return Ok(String::new());
    }
    let padded = pkcs7_pad(plain.as_bytes());
    if padded.len() > MAX_INPUT_LEN {
        return Err(Error::InvalidInput(format!(
            "Filename too long to encrypt: {} bytes",
            plain.len()
        )));
    }
    let ciphertext = eme::transform(cipher, tweak, &padded, Direction::Encrypt)?;
    Ok(BASE32HEX_NOPAD.encode(&ciphertext).to_ascii_lowercase())
}

/// Decrypt one path segment. The empty segment maps to the empty string.
pub fn decrypt_segment(cipher: &Aes256, tweak: &[u8; BLOCK_SIZE], encoded: &str) -> Result<String> {
    if encoded.is_empty() {
        return Ok(String::new());
    }
    if encoded.ends_with('=') {
        return Err(Error::Crypto("Bad base32 filename encoding".to_string()));
    }
    let raw = BASE32HEX_NOPAD
        .decode(encoded.to_ascii_uppercase().as_bytes())
        .map_err(|e| Error::Crypto(format!("Bad base32 filename encoding: {}", e)))?;
    if raw.is_empty() || raw.len() % BLOCK_SIZE != 0 {
        return Err(Error::Crypto(
            "Encrypted filename is not a multiple of the block size".to_string(),
        ));
    }
    if raw.len() > MAX_INPUT_LEN {
        return Err(Error::Crypto("Encrypted filename too long".to_string()));
    }
    let padded = eme::transform(cipher, tweak, &raw, Direction::Decrypt)?;
    let plain = pkcs7_unpad(padded)?;
    String::from_utf8(plain)
        .map_err(|_| Error::Crypto("Decrypted filename is not valid UTF-8".to_string()))
}
