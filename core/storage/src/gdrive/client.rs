//! Google Drive API client.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::{header, redirect, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::provider::DriveConfig;
use crate::auth::TokenSource;
use crate::upload::{parse_range_header, ChunkOutcome, ContentRange, ResumableSession};
use veilvault_common::{ByteStream, Error, Result};

/// MIME type Drive uses for folders.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

const FILE_FIELDS: &str = "id,name,mimeType,size,createdTime,modifiedTime";

/// Google Drive file metadata from API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    /// File size in bytes (only for files, not folders).
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_time: Option<DateTime<Utc>>,
}

impl DriveFile {
    /// Check if this is a folder.
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    /// Get size as u64.
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_ref().and_then(|s| s.parse().ok())
    }
}

/// Response from listing files.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListResponse {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Quote a value for use inside a Drive `q` expression.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn request_error(context: &str, err: reqwest::Error) -> Error {
    Error::ProviderRequestFailed(format!("{}: {}", context, err))
}

/// Google Drive API client.
pub struct DriveClient {
    http: Client,
    /// Upload requests must see 308 responses instead of following them.
    upload_http: Client,
    tokens: Arc<dyn TokenSource>,
    config: DriveConfig,
}

impl DriveClient {
    /// Create a new Drive client.
    pub fn new(config: DriveConfig, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| request_error("Failed to create HTTP client", e))?;
        let upload_http = Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| request_error("Failed to create HTTP client", e))?;

        Ok(Self {
            http,
            upload_http,
            tokens,
            config,
        })
    }

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    /// Get authorization header.
    async fn auth_header(&self) -> Result<String> {
        let token = self.tokens.access_token().await?;
        Ok(format!("Bearer {}", token.expose()))
    }

    /// List the non-trashed children of a folder, following pagination.
    pub async fn list_folder(&self, folder_id: &str) -> Result<Vec<DriveFile>> {
        let url = format!("{}/files", self.config.api_base);
        let query = format!("{} in parents and trashed = false", quote(folder_id));
        let fields = format!("files({}),nextPageToken", FILE_FIELDS);
        let page_size = self.config.page_size.to_string();

        let mut all_files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let auth = self.auth_header().await?;
            let mut request = self
                .http
                .get(&url)
                .header(header::AUTHORIZATION, auth)
                .query(&[
                    ("q", query.as_str()),
                    ("fields", fields.as_str()),
                    ("pageSize", page_size.as_str()),
                    ("orderBy", "name"),
                ]);

            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| request_error("Failed to list folder", e))?;

            let page: FileListResponse = self.handle_response(response).await?;
            all_files.extend(page.files);

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(count = all_files.len(), "Listed Drive folder");
        Ok(all_files)
    }

    /// Find the first folder with exactly `name` under `parent_id`.
    pub async fn find_folder(&self, parent_id: &str, name: &str) -> Result<Option<DriveFile>> {
        let url = format!("{}/files", self.config.api_base);
        let auth = self.auth_header().await?;

        let query = format!(
            "mimeType = '{}' and name = {} and {} in parents and trashed = false",
            FOLDER_MIME_TYPE,
            quote(name),
            quote(parent_id)
        );
        let fields = format!("files({})", FILE_FIELDS);

        let response = self
            .http
            .get(&url)
            .header(header::AUTHORIZATION, auth)
            .query(&[("q", query.as_str()), ("fields", fields.as_str())])
            .send()
            .await
            .map_err(|e| request_error("Failed to find folder", e))?;

        let list: FileListResponse = self.handle_response(response).await?;
        // Drive's name match is not guaranteed to be case-sensitive.
        Ok(list.files.into_iter().find(|f| f.name == name))
    }

    /// Create a folder.
    pub async fn create_folder(&self, name: &str, parent_id: &str) -> Result<DriveFile> {
        let url = format!("{}/files", self.config.api_base);
        let auth = self.auth_header().await?;

        let metadata = serde_json::json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE,
            "parents": [parent_id],
        });

        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, auth)
            .query(&[("fields", FILE_FIELDS)])
            .json(&metadata)
            .send()
            .await
            .map_err(|e| request_error("Failed to create folder", e))?;

        self.handle_response(response).await
    }

    /// Delete a file or folder.
    pub async fn delete(&self, file_id: &str) -> Result<()> {
        let url = format!("{}/files/{}", self.config.api_base, file_id);
        let auth = self.auth_header().await?;

        let response = self
            .http
            .delete(&url)
            .header(header::AUTHORIZATION, auth)
            .send()
            .await
            .map_err(|e| request_error("Failed to delete file", e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::status_error(response).await)
        }
    }

    /// Open a resumable upload session and return its URI.
    pub async fn start_resumable_upload(&self, name: &str, parent_id: &str) -> Result<DriveUploadSession> {
        let url = format!("{}/files", self.config.upload_base);
        let auth = self.auth_header().await?;

        let metadata = serde_json::json!({
            "name": name,
            "parents": [parent_id],
        });

        let response = self
            .upload_http
            .post(&url)
            .header(header::AUTHORIZATION, auth)
            .query(&[("uploadType", "resumable")])
            .json(&metadata)
            .send()
            .await
            .map_err(|e| request_error("Failed to start resumable upload", e))?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let uri = response
            .headers()
            .get(header::LOCATION)
            .ok_or_else(|| {
                Error::ProviderRequestFailed("Drive API did not return a session URI".to_string())
            })?
            .to_str()
            .map_err(|e| Error::ProviderRequestFailed(format!("Invalid session URI: {}", e)))?
            .to_string();

        debug!("Opened resumable upload session");
        Ok(DriveUploadSession {
            http: self.upload_http.clone(),
            uri,
        })
    }

    /// Download file content as a stream.
    pub async fn download_stream(&self, file_id: &str) -> Result<ByteStream> {
        let url = format!("{}/files/{}", self.config.api_base, file_id);
        let auth = self.auth_header().await?;

        let response = self
            .http
            .get(&url)
            .header(header::AUTHORIZATION, auth)
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(|e| request_error("Failed to start download", e))?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let stream = response
            .bytes_stream()
            .map(|result| result.map_err(|e| request_error("Stream read error", e)));

        Ok(Box::pin(stream))
    }

    /// Handle API response with error checking.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| request_error("Failed to parse response", e))
        } else {
            Err(Self::status_error(response).await)
        }
    }

    async fn status_error(response: reqwest::Response) -> Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => Error::NotFound(format!("Drive resource not found: {}", body)),
            StatusCode::UNAUTHORIZED => {
                Error::Authentication("Invalid or expired token".to_string())
            }
            _ => Error::ProviderRequestFailed(format!("API error: {} - {}", status, body)),
        }
    }
}

/// An open Drive resumable upload session.
pub struct DriveUploadSession {
    http: Client,
    uri: String,
}

impl DriveUploadSession {
    pub fn uri(&self) -> &str {
        &self.uri
    }
}

#[async_trait]
impl ResumableSession for DriveUploadSession {
    async fn put_chunk(&mut self, range: &ContentRange, body: Bytes) -> Result<ChunkOutcome> {
        let response = self
            .http
            .put(&self.uri)
            .header(header::CONTENT_LENGTH, body.len().to_string())
            .header(header::CONTENT_RANGE, range.to_string())
            .body(body)
            .send()
            .await
            .map_err(|e| request_error("Failed to upload chunk", e))?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(ChunkOutcome::Complete),
            StatusCode::PERMANENT_REDIRECT => {
                // No Range header means nothing has been persisted yet.
                let persisted = match response.headers().get(header::RANGE) {
                    Some(value) => {
                        let value = value.to_str().map_err(|e| {
                            Error::ProviderRequestFailed(format!("Invalid Range header: {}", e))
                        })?;
                        parse_range_header(value).ok_or_else(|| {
                            Error::ProviderRequestFailed(format!("Invalid Range header: {}", value))
                        })?
                    }
                    None => 0,
                };
                Ok(ChunkOutcome::Incomplete { persisted })
            }
            _ => Err(DriveClient::status_error(response).await),
        }
    }

    async fn abort(&mut self) -> Result<()> {
        let response = self
            .http
            .delete(&self.uri)
            .send()
            .await
            .map_err(|e| request_error("Failed to cancel upload session", e))?;
        // Drive answers a cancelled session with 499.
        if !response.status().is_success() && response.status().as_u16() != 499 {
            warn!(status = %response.status(), "Unexpected status cancelling upload session");
        }
        Ok(())
    }
}
