//! Cipher key material with secure memory handling.
//!
//! Keys are derived with scrypt exactly as rclone's crypt backend does, so a
//! vault written here can be mounted by rclone and vice versa.

use scrypt::{scrypt, Params};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use veilvault_common::{Error, Result};

/// Length of the content (secretbox) key.
pub const DATA_KEY_LENGTH: usize = 32;
/// Length of the filename (AES-256) key.
pub const NAME_KEY_LENGTH: usize = 32;
/// Length of the EME tweak used for filenames.
pub const NAME_TWEAK_LENGTH: usize = 16;

const DERIVED_LENGTH: usize = DATA_KEY_LENGTH + NAME_KEY_LENGTH + NAME_TWEAK_LENGTH;

/// Salt used when the vault has no secondary password.
pub const DEFAULT_SALT: [u8; 16] = [
    0xA8, 0x0D, 0xF4, 0x3A, 0x8F, 0xBD, 0x03, 0x08, 0xA7, 0xCA, 0xB8, 0x3E, 0x58, 0x1F, 0x86, 0xB1,
];

/// scrypt cost parameters: N = 2^14, r = 8, p = 1.
const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// Derived key material for one (password, salt) pair.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CipherKeys {
    data_key: [u8; DATA_KEY_LENGTH],
    name_key: [u8; NAME_KEY_LENGTH],
    name_tweak: [u8; NAME_TWEAK_LENGTH],
}

impl CipherKeys {
    /// Derive key material from a password and optional secondary password.
    ///
    /// An absent or empty salt selects [`DEFAULT_SALT`].
    ///
    /// # Errors
    /// - `CipherSetupFailed` if the password is empty or scrypt fails
    pub fn derive(password: &str, salt: Option<&str>) -> Result<Self> {
        if password.is_empty() {
            return Err(Error::CipherSetupFailed(
                "Password cannot be empty".to_string(),
            ));
        }

        let salt_bytes: &[u8] = match salt {
            Some(salt) if !salt.is_empty() => salt.as_bytes(),
            _ => &DEFAULT_SALT,
        };

        let params = Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, Params::RECOMMENDED_LEN)
            .map_err(|e| Error::CipherSetupFailed(format!("Invalid scrypt parameters: {}", e)))?;

        let mut derived = [0u8; DERIVED_LENGTH];
        scrypt(password.as_bytes(), salt_bytes, &params, &mut derived)
            .map_err(|e| Error::CipherSetupFailed(format!("Key derivation failed: {}", e)))?;

        let keys = Self::from_bytes(&derived);
        derived.zeroize();
        Ok(keys)
    }

    /// Split 80 bytes of raw key material into its parts.
    pub fn from_bytes(raw: &[u8; DERIVED_LENGTH]) -> Self {
        let mut data_key = [0u8; DATA_KEY_LENGTH];
        let mut name_key = [0u8; NAME_KEY_LENGTH];
        let mut name_tweak = [0u8; NAME_TWEAK_LENGTH];
        data_key.copy_from_slice(&raw[..DATA_KEY_LENGTH]);
        name_key.copy_from_slice(&raw[DATA_KEY_LENGTH..DATA_KEY_LENGTH + NAME_KEY_LENGTH]);
        name_tweak.copy_from_slice(&raw[DATA_KEY_LENGTH + NAME_KEY_LENGTH..]);
        Self {
            data_key,
            name_key,
            name_tweak,
        }
    }

    pub fn data_key(&self) -> &[u8; DATA_KEY_LENGTH] {
        &self.data_key
    }

    pub fn name_key(&self) -> &[u8; NAME_KEY_LENGTH] {
        &self.name_key
    }

    pub fn name_tweak(&self) -> &[u8; NAME_TWEAK_LENGTH] {
        &self.name_tweak
    }
}

impl fmt::Debug for CipherKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CipherKeys([REDACTED])")
    }
}
