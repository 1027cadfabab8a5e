//! Plaintext file API over one vault.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::path::PathCodec;
use crate::vault::Vault;
use veilvault_common::{ByteStream, Error, Result, VaultPath};
use veilvault_crypto::CipherEngine;
use veilvault_storage::{RemoteObject, RemoteStorage};

/// File operations on a vault, addressed by plaintext [`VaultPath`]s.
///
/// Names and contents are encrypted before they reach the provider; objects
/// returned from [`list`](Self::list) carry vault-relative plaintext paths.
#[derive(Clone)]
pub struct VaultFileSystem {
    vault: Arc<Vault>,
    engine: CipherEngine,
    codec: PathCodec,
    storage: Arc<dyn RemoteStorage>,
}

impl VaultFileSystem {
    pub fn new(vault: Arc<Vault>, engine: CipherEngine, storage: Arc<dyn RemoteStorage>) -> Self {
        Self {
            codec: PathCodec::new(engine.clone()),
            vault,
            engine,
            storage,
        }
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn storage(&self) -> &Arc<dyn RemoteStorage> {
        &self.storage
    }

    /// List the folder at `path`.
    ///
    /// Returns `None` when the folder does not exist. Entries whose names do
    /// not decrypt under this vault's keys are skipped.
    pub async fn list(&self, path: &VaultPath) -> Result<Option<Vec<RemoteObject>>> {
        let remote = self.codec.encrypt_path(&self.vault, path).await?;
        if self.storage.resolve_path_id(&remote, false).await?.is_none() {
            debug!(path = %path, "Vault folder not found");
            return Ok(None);
        }

        let encrypted = match self.storage.list_files(&remote).await {
            Ok(objects) => objects,
            // Removed between resolution and listing.
            Err(Error::PathNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let decrypted = join_all(encrypted.into_iter().map(|object| self.decrypt_object(object))).await;

        let mut objects = Vec::with_capacity(decrypted.len());
        for result in decrypted {
            match result {
                Ok(object) => objects.push(object),
                Err(Error::Crypto(reason)) => {
                    warn!(error = %reason, "Skipping entry with undecryptable name");
                }
                Err(e) => return Err(e),
            }
        }
        debug!(path = %path, count = objects.len(), "Listed vault folder");
        Ok(Some(objects))
    }

    async fn decrypt_object(&self, mut object: RemoteObject) -> Result<RemoteObject> {
        let plain = self.codec.decrypt_path(&self.vault, &object.path).await?;
        object.path = PathCodec::strip_mount(&self.vault, plain)?.components().to_vec();
        Ok(object)
    }

    /// Encrypt `source` and store it as `name` inside `parent`.
    ///
    /// Takes ownership of the stream.
    pub async fn upload(&self, parent: &VaultPath, name: &str, source: ByteStream) -> Result<()> {
        let path = parent.join(name)?;
        let remote = self.codec.encrypt_path(&self.vault, &path).await?;
        let encrypted = self
            .engine
            .encrypt_stream(source, &self.vault.password, self.vault.salt())
            .await?;
        self.storage.upload_file(&remote, encrypted).await?;
        info!(vault_id = %self.vault.id, "Uploaded vault file");
        debug!(path = %path, "Upload target");
        Ok(())
    }

    /// Stream the decrypted contents of a listed file.
    pub async fn download(&self, object: &RemoteObject) -> Result<ByteStream> {
        let encrypted = self.storage.download_file(object).await?;
        self.engine
            .decrypt_stream(encrypted, &self.vault.password, self.vault.salt())
            .await
    }

    /// Delete listed objects. Folders are removed with their contents.
    pub async fn delete(&self, objects: &[RemoteObject]) -> Result<()> {
        self.storage.delete_objects(objects).await?;
        info!(vault_id = %self.vault.id, count = objects.len(), "Deleted vault objects");
        Ok(())
    }

    /// Create the folder at `path`. Its parent must exist.
    pub async fn mkdir(&self, path: &VaultPath) -> Result<String> {
        if path.is_root() {
            return Err(Error::InvalidInput("Cannot create the vault root".to_string()));
        }
        let remote = self.codec.encrypt_path(&self.vault, path).await?;
        let id = self.storage.create_folder(&remote, false).await?;
        debug!(path = %path, "Created vault folder");
        Ok(id)
    }

    /// Whether the vault's mount path exists at the provider.
    pub async fn check_mount_exists(&self) -> Result<bool> {
        Ok(self
            .storage
            .resolve_path_id(&self.vault.mount_path, false)
            .await?
            .is_some())
    }

    /// Create the mount path, including missing ancestors.
    pub async fn create_mount_path(&self) -> Result<()> {
        if self.vault.mount_path.is_empty() {
            return Ok(());
        }
        self.storage.create_folder(&self.vault.mount_path, true).await?;
        info!(vault_id = %self.vault.id, "Created vault mount path");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veilvault_common::{bytes_stream, collect_stream, AccountId, SensitiveString, VaultId};
    use veilvault_crypto::EngineConfig;
    use veilvault_storage::MemoryStorage;

    fn vault(password: &str) -> Arc<Vault> {
        Arc::new(
            Vault::new(
                VaultId::new("v").unwrap(),
                AccountId::new("a").unwrap(),
                vec!["Vault".to_string()],
                SensitiveString::new(password),
            )
            .unwrap(),
        )
    }

    async fn setup() -> (CipherEngine, MemoryStorage, VaultFileSystem) {
        let engine = CipherEngine::start_with(EngineConfig::default()).await.unwrap();
        let storage = MemoryStorage::new();
        let fs = VaultFileSystem::new(vault("p1"), engine.clone(), Arc::new(storage.clone()));
        fs.create_mount_path().await.unwrap();
        (engine, storage, fs)
    }

    fn path(s: &str) -> VaultPath {
        VaultPath::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_mount_path_lifecycle() {
        let engine = CipherEngine::start_with(EngineConfig::default()).await.unwrap();
        let fs = VaultFileSystem::new(vault("p1"), engine.clone(), Arc::new(MemoryStorage::new()));

        assert!(!fs.check_mount_exists().await.unwrap());
        assert!(fs.list(&VaultPath::root()).await.unwrap().is_none());
        fs.create_mount_path().await.unwrap();
        assert!(fs.check_mount_exists().await.unwrap());
        assert_eq!(fs.list(&VaultPath::root()).await.unwrap(), Some(Vec::new()));
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_upload_list_download() {
        let (engine, storage, fs) = setup().await;
        fs.upload(&VaultPath::root(), "hello.txt", bytes_stream(&b"hello vault"[..], 4))
            .await
            .unwrap();

        let listing = fs.list(&VaultPath::root()).await.unwrap().unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].path, vec!["hello.txt"]);

        let data = collect_stream(fs.download(&listing[0]).await.unwrap()).await.unwrap();
        assert_eq!(data, b"hello vault");

        // The provider only ever sees ciphertext.
        let raw = storage.list_files(&["Vault".to_string()]).await.unwrap();
        assert_ne!(raw[0].path[1], "hello.txt");
        assert_ne!(raw[0].size, Some(11));
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_mkdir_requires_parent() {
        let (engine, _storage, fs) = setup().await;
        assert!(matches!(
            fs.mkdir(&path("a/b")).await,
            Err(Error::PathNotFound(_))
        ));
        fs.mkdir(&path("a")).await.unwrap();
        fs.mkdir(&path("a/b")).await.unwrap();
        let listing = fs.list(&path("a")).await.unwrap().unwrap();
        assert_eq!(listing[0].path, vec!["a", "b"]);
        assert!(listing[0].is_folder());
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_list_missing_folder_is_none() {
        let (engine, _storage, fs) = setup().await;
        assert!(fs.list(&path("nope")).await.unwrap().is_none());
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_foreign_names_are_skipped() {
        let (engine, storage, fs) = setup().await;
        storage
            .create_folder(&["Vault".to_string(), "not-encrypted".to_string()], false)
            .await
            .unwrap();
        fs.mkdir(&path("real")).await.unwrap();

        let listing = fs.list(&VaultPath::root()).await.unwrap().unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].path, vec!["real"]);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_delete() {
        let (engine, _storage, fs) = setup().await;
        fs.mkdir(&path("docs")).await.unwrap();
        fs.upload(&path("docs"), "a", bytes_stream(&b"1"[..], 1)).await.unwrap();

        let root = fs.list(&VaultPath::root()).await.unwrap().unwrap();
        fs.delete(&root).await.unwrap();
        assert_eq!(fs.list(&VaultPath::root()).await.unwrap(), Some(Vec::new()));
        assert!(fs.list(&path("docs")).await.unwrap().is_none());
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_other_password_cannot_read_names() {
        let (engine, storage, fs) = setup().await;
        fs.mkdir(&path("secret")).await.unwrap();

        let intruder = VaultFileSystem::new(vault("p2"), engine.clone(), Arc::new(storage));
        assert_eq!(intruder.list(&VaultPath::root()).await.unwrap(), Some(Vec::new()));
        engine.shutdown();
    }
}
