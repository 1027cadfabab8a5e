//! A keyed cipher session for one (password, salt) pair.

use aes::cipher::KeyInit;
use aes::Aes256;
use std::fmt;
use std::sync::Arc;

use crate::content::{self, ContentCipher};
use crate::keys::CipherKeys;
use crate::names;
use veilvault_common::{ByteStream, Error, Result};

/// Filename and content cipher built from derived keys.
pub struct Cipher {
    keys: CipherKeys,
    name_cipher: Aes256,
    content: Arc<ContentCipher>,
}

impl Cipher {
    /// Derive keys and build the session.
    pub fn new(password: &str, salt: Option<&str>) -> Result<Self> {
        Self::from_keys(CipherKeys::derive(password, salt)?)
    }

    pub fn from_keys(keys: CipherKeys) -> Result<Self> {
        let name_cipher = Aes256::new_from_slice(keys.name_key())
            .map_err(|e| Error::CipherSetupFailed(format!("Invalid name key: {}", e)))?;
        let content = Arc::new(ContentCipher::new(keys.data_key()));
        Ok(Self {
            keys,
            name_cipher,
            content,
        })
    }

    pub fn encrypt_name(&self, plain: &str) -> Result<String> {
        names::encrypt_segment(&self.name_cipher, self.keys.name_tweak(), plain)
    }

    pub fn decrypt_name(&self, encrypted: &str) -> Result<String> {
        names::decrypt_segment(&self.name_cipher, self.keys.name_tweak(), encrypted)
    }

    pub fn encrypt_stream(&self, source: ByteStream) -> ByteStream {
        content::encrypt_stream(Arc::clone(&self.content), source)
    }

    pub fn decrypt_stream(&self, source: ByteStream) -> ByteStream {
        content::decrypt_stream(Arc::clone(&self.content), source)
    }
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher").field("keys", &self.keys).finish()
    }
}
