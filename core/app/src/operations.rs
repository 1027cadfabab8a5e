//! Vault file operations wrapped as queue tasks.
//!
//! Each builder captures what its action needs by value, so the action can
//! run again when a failed task is retried.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use veilvault_common::{bytes_stream, ByteStream, Error, Result, VaultPath};
use veilvault_crypto::content::decrypted_size;
use veilvault_storage::RemoteObject;
use veilvault_tasks::{ProgressReporter, Task, TaskKind};
use veilvault_vault::VaultFileSystem;

const READ_PIECE: usize = 64 * 1024;

/// Content that can be read from the start more than once.
#[async_trait]
pub trait ByteSource: Send + Sync {
    async fn open(&self) -> Result<ByteStream>;
}

/// A local file.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ByteSource for FileSource {
    async fn open(&self) -> Result<ByteStream> {
        let file = tokio::fs::File::open(&self.path).await?;
        Ok(Box::pin(
            ReaderStream::with_capacity(file, READ_PIECE).map_err(Error::from),
        ))
    }
}

/// An in-memory buffer.
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    async fn open(&self) -> Result<ByteStream> {
        Ok(bytes_stream(self.data.clone(), READ_PIECE))
    }
}

/// Upload `source` as `name` inside `parent`.
pub fn upload_task(
    fs: VaultFileSystem,
    parent: VaultPath,
    name: impl Into<String>,
    source: Arc<dyn ByteSource>,
) -> Task {
    let name = name.into();
    let vault_id = fs.vault().id.clone();
    Task::new(TaskKind::Upload, name.clone(), vault_id, move |_| {
        let fs = fs.clone();
        let parent = parent.clone();
        let name = name.clone();
        let source = Arc::clone(&source);
        async move {
            let stream = source.open().await?;
            fs.upload(&parent, &name, stream).await
        }
    })
}

/// Download a listed file to `destination`. A partial file is removed on
/// failure.
pub fn download_task(fs: VaultFileSystem, object: RemoteObject, destination: PathBuf) -> Task {
    let label = object.name().unwrap_or_default().to_string();
    let vault_id = fs.vault().id.clone();
    Task::new(TaskKind::Download, label, vault_id, move |progress| {
        let fs = fs.clone();
        let object = object.clone();
        let destination = destination.clone();
        async move {
            let result = download_to(&fs, &object, &destination, &progress).await;
            if result.is_err() {
                match tokio::fs::remove_file(&destination).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!(error = %e, "Failed to remove partial download"),
                }
            }
            result
        }
    })
}

async fn download_to(
    fs: &VaultFileSystem,
    object: &RemoteObject,
    destination: &Path,
    progress: &ProgressReporter,
) -> Result<()> {
    let expected = object.size.and_then(decrypted_size).filter(|n| *n > 0);
    let mut stream = fs.download(object).await?;
    let mut file = tokio::fs::File::create(destination).await?;

    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        if let Some(total) = expected {
            progress.report((written.saturating_mul(100) / total).min(100) as u8);
        }
    }
    file.flush().await?;
    debug!(bytes = written, "Download written");
    Ok(())
}

/// Delete listed objects.
pub fn delete_task(fs: VaultFileSystem, objects: Vec<RemoteObject>) -> Task {
    let label = format!("Delete {} files", objects.len());
    let vault_id = fs.vault().id.clone();
    let objects = Arc::new(objects);
    Task::new(TaskKind::Delete, label, vault_id, move |_| {
        let fs = fs.clone();
        let objects = Arc::clone(&objects);
        async move { fs.delete(&objects).await }
    })
}

/// Create the folder at `path`.
pub fn create_folder_task(fs: VaultFileSystem, path: VaultPath) -> Task {
    let label = format!("Create folder \"{}\"", path.components().join("/"));
    let vault_id = fs.vault().id.clone();
    Task::new(TaskKind::CreateFolder, label, vault_id, move |_| {
        let fs = fs.clone();
        let path = path.clone();
        async move { fs.mkdir(&path).await.map(|_| ()) }
    })
}
