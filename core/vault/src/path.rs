//! Translation between plaintext vault paths and encrypted remote paths.

use futures::future::try_join_all;

use crate::vault::Vault;
use veilvault_common::{Error, Result, VaultPath};
use veilvault_crypto::CipherEngine;

/// Encrypts and decrypts paths segment by segment.
///
/// Segments are independent of each other, so they are sent to the engine
/// concurrently. The vault's mount path is prepended on the way out and
/// passed through untouched on the way back.
#[derive(Clone)]
pub struct PathCodec {
    engine: CipherEngine,
}

impl PathCodec {
    pub fn new(engine: CipherEngine) -> Self {
        Self { engine }
    }

    /// Encrypt each segment of `plain` without any mount prefix.
    pub async fn encrypt_segments(&self, vault: &Vault, plain: &[String]) -> Result<Vec<String>> {
        try_join_all(plain.iter().map(|segment| {
            self.engine
                .encrypt_filename(segment, &vault.password, vault.salt())
        }))
        .await
    }

    /// Remote path of `path`: the mount path followed by the encrypted segments.
    pub async fn encrypt_path(&self, vault: &Vault, path: &VaultPath) -> Result<Vec<String>> {
        let encrypted = self.encrypt_segments(vault, path.components()).await?;
        let mut remote = Vec::with_capacity(vault.mount_path.len() + encrypted.len());
        remote.extend(vault.mount_path.iter().cloned());
        remote.extend(encrypted);
        Ok(remote)
    }

    /// Decrypt a remote path. The first `mount_path.len()` segments are
    /// returned as they are; only the suffix is decrypted.
    pub async fn decrypt_path(&self, vault: &Vault, remote: &[String]) -> Result<Vec<String>> {
        let mount_len = vault.mount_path.len().min(remote.len());
        let (mount, suffix) = remote.split_at(mount_len);
        let decrypted = try_join_all(suffix.iter().map(|segment| {
            self.engine
                .decrypt_filename(segment, &vault.password, vault.salt())
        }))
        .await?;

        let mut plain = mount.to_vec();
        plain.extend(decrypted);
        Ok(plain)
    }

    /// Vault-relative path of a decrypted remote path.
    ///
    /// # Errors
    /// - The path does not start with the vault's mount path
    pub fn strip_mount(vault: &Vault, plain: Vec<String>) -> Result<VaultPath> {
        if !plain.starts_with(&vault.mount_path) {
            return Err(Error::InvalidInput(format!(
                "Path is outside the vault mount: {}",
                plain.join("/")
            )));
        }
        VaultPath::from_components(plain[vault.mount_path.len()..].to_vec())
    }
}
