//! Google Drive storage provider implementation.

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::auth::TokenSource;
use crate::provider::{listing_order, split_leaf, ObjectKind, RemoteObject, RemoteStorage};
use crate::registry::ProviderContext;
use crate::resolve::{self, FolderLookup};
use crate::upload::{upload_chunked, UploadConfig};
use veilvault_common::{ByteStream, Error, Result};

use super::client::{DriveClient, DriveFile};

/// Drive requires non-final chunks to be a multiple of 256 KiB.
const CHUNK_GRANULARITY: usize = 256 * 1024;

/// Google Drive provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Metadata API base URL.
    pub api_base: String,
    /// Upload API base URL.
    pub upload_base: String,
    /// Entries requested per listing page.
    pub page_size: u32,
    pub user_agent: String,
    pub upload: UploadConfig,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            api_base: "https://www.googleapis.com/drive/v3".to_string(),
            upload_base: "https://www.googleapis.com/upload/drive/v3".to_string(),
            page_size: 1000,
            user_agent: concat!("VeilVault/", env!("CARGO_PKG_VERSION")).to_string(),
            upload: UploadConfig::default(),
        }
    }
}

impl DriveConfig {
    /// Check URLs and chunk sizing.
    pub fn validate(&self) -> Result<()> {
        for base in [&self.api_base, &self.upload_base] {
            Url::parse(base)
                .map_err(|e| Error::InvalidInput(format!("Invalid Drive URL '{}': {}", base, e)))?;
        }
        if self.page_size == 0 {
            return Err(Error::InvalidInput("page_size must be positive".to_string()));
        }
        self.upload.validate()?;
        if self.upload.chunk_size % CHUNK_GRANULARITY != 0 {
            return Err(Error::InvalidInput(format!(
                "Drive upload chunk size must be a multiple of {} bytes",
                CHUNK_GRANULARITY
            )));
        }
        Ok(())
    }
}

/// Google Drive storage provider.
pub struct GDriveProvider {
    client: DriveClient,
}

impl GDriveProvider {
    /// Create a new Google Drive provider.
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn new(config: DriveConfig, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            client: DriveClient::new(config, tokens)?,
        })
    }

    fn to_object(file: DriveFile, parent: &[String]) -> RemoteObject {
        let kind = if file.is_folder() {
            ObjectKind::Folder
        } else {
            ObjectKind::File
        };
        let size = file.size_bytes();
        let mut path = parent.to_vec();
        path.push(file.name);
        RemoteObject {
            id: file.id,
            kind,
            size,
            created: file.created_time,
            modified: file.modified_time,
            mime_type: Some(file.mime_type),
            path,
        }
    }
}

/// Registry factory: `ctx.config` deserializes into [`DriveConfig`]
/// (null selects the defaults).
pub fn create_gdrive_provider(ctx: ProviderContext) -> Result<Arc<dyn RemoteStorage>> {
    let config: DriveConfig = if ctx.config.is_null() {
        DriveConfig::default()
    } else {
        serde_json::from_value(ctx.config)?
    };
    Ok(Arc::new(GDriveProvider::new(config, ctx.tokens)?))
}

#[async_trait]
impl FolderLookup for GDriveProvider {
    fn root_id(&self) -> &str {
        "root"
    }

    async fn find_folder(&self, parent_id: &str, name: &str) -> Result<Option<String>> {
        Ok(self
            .client
            .find_folder(parent_id, name)
            .await?
            .map(|folder| folder.id))
    }

    async fn create_folder_at(&self, parent_id: &str, name: &str) -> Result<String> {
        let folder = self.client.create_folder(name, parent_id).await?;
        debug!(folder_id = %folder.id, "Created Drive folder");
        Ok(folder.id)
    }
}

#[async_trait]
impl RemoteStorage for GDriveProvider {
    fn name(&self) -> &str {
        "gdrive"
    }

    async fn list_files(&self, path: &[String]) -> Result<Vec<RemoteObject>> {
        let folder_id = resolve::resolve_path_id(self, path, false)
            .await?
            .ok_or_else(|| Error::PathNotFound(path.join("/")))?;

        let mut objects: Vec<RemoteObject> = self
            .client
            .list_folder(&folder_id)
            .await?
            .into_iter()
            .map(|file| Self::to_object(file, path))
            .collect();
        objects.sort_by(listing_order);
        Ok(objects)
    }

    async fn resolve_path_id(&self, path: &[String], create_missing: bool) -> Result<Option<String>> {
        resolve::resolve_path_id(self, path, create_missing).await
    }

    async fn create_folder(&self, path: &[String], create_missing: bool) -> Result<String> {
        resolve::create_folder(self, path, create_missing).await
    }

    async fn delete_objects(&self, objects: &[RemoteObject]) -> Result<()> {
        try_join_all(objects.iter().map(|object| self.client.delete(&object.id))).await?;
        Ok(())
    }

    async fn upload_file(&self, path: &[String], source: ByteStream) -> Result<()> {
        let (parent, name) = split_leaf(path)?;
        let parent_id = resolve::resolve_path_id(self, parent, false)
            .await?
            .ok_or_else(|| Error::PathNotFound(parent.join("/")))?;

        let mut session = self.client.start_resumable_upload(name, &parent_id).await?;
        let report = upload_chunked(&mut session, source, &self.client.config().upload).await?;
        info!(bytes = report.bytes, requests = report.requests, "Drive upload complete");
        Ok(())
    }

    async fn download_file(&self, object: &RemoteObject) -> Result<ByteStream> {
        if object.is_folder() {
            return Err(Error::InvalidInput("Cannot download a folder".to_string()));
        }
        self.client.download_stream(&object.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;

    #[test]
    fn test_default_config_is_valid() {
        DriveConfig::default().validate().unwrap();
    }

    #[test]
    fn test_config_rejects_bad_chunk_size() {
        let mut config = DriveConfig::default();
        config.upload.chunk_size = 1000;
        assert!(matches!(config.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_config_rejects_bad_url() {
        let config = DriveConfig {
            api_base: "not a url".to_string(),
            ..DriveConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: DriveConfig =
            serde_json::from_str(r#"{"api_base": "http://127.0.0.1:9000/drive/v3"}"#).unwrap();
        assert_eq!(config.api_base, "http://127.0.0.1:9000/drive/v3");
        assert_eq!(config.page_size, 1000);
        assert_eq!(config.upload.chunk_size, 128 * 1024 * 1024);
    }

    #[test]
    fn test_to_object_maps_kind_and_path() {
        let file = DriveFile {
            id: "x".to_string(),
            name: "leaf".to_string(),
            mime_type: super::super::client::FOLDER_MIME_TYPE.to_string(),
            size: None,
            created_time: None,
            modified_time: None,
        };
        let parent = vec!["a".to_string()];
        let object = GDriveProvider::to_object(file, &parent);
        assert_eq!(object.kind, ObjectKind::Folder);
        assert_eq!(object.path, vec!["a".to_string(), "leaf".to_string()]);
    }

    #[tokio::test]
    async fn test_factory_uses_defaults_for_null_config() {
        let ctx = ProviderContext {
            config: serde_json::Value::Null,
            tokens: Arc::new(StaticToken::unbounded("t")),
        };
        let provider = create_gdrive_provider(ctx).unwrap();
        assert_eq!(provider.name(), "gdrive");
    }
}
