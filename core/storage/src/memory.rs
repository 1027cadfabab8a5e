//! In-memory storage provider for testing.
//!
//! Objects are addressed by id like a real cloud drive, and uploads go
//! through the same resumable chunk protocol as the Drive adapter. Faults can
//! be injected per request to exercise partial acknowledgement and failures.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

use crate::provider::{listing_order, split_leaf, ObjectKind, RemoteObject, RemoteStorage};
use crate::resolve::{self, FolderLookup};
use crate::upload::{upload_chunked, ChunkOutcome, ContentRange, ResumableSession, UploadConfig};
use veilvault_common::{bytes_stream, ByteStream, Error, Result};

const ROOT_ID: &str = "root";
const DOWNLOAD_PIECE: usize = 64 * 1024;

/// Fault applied to the next upload request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFault {
    /// Persist at most this many bytes of the request body.
    Persist(u64),
    /// Fail the request with a transport error.
    Fail,
}

#[derive(Debug, Clone)]
struct Node {
    id: String,
    parent: String,
    name: String,
    kind: ObjectKind,
    data: Bytes,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    /// Insertion order doubles as "first match" order for lookups.
    nodes: Vec<Node>,
}

impl State {
    fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    fn is_folder(&self, id: &str) -> bool {
        id == ROOT_ID || self.get(id).is_some_and(|n| n.kind == ObjectKind::Folder)
    }

    fn child(&self, parent: &str, name: &str, kind: ObjectKind) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|n| n.parent == parent && n.name == name && n.kind == kind)
    }

    fn remove_tree(&mut self, id: &str) {
        let children: Vec<String> = self
            .nodes
            .iter()
            .filter(|n| n.parent == id)
            .map(|n| n.id.clone())
            .collect();
        for child in children {
            self.remove_tree(&child);
        }
        self.nodes.retain(|n| n.id != id);
    }
}

fn to_object(node: &Node, path: Vec<String>) -> RemoteObject {
    let is_file = node.kind == ObjectKind::File;
    RemoteObject {
        id: node.id.clone(),
        kind: node.kind,
        size: is_file.then_some(node.data.len() as u64),
        created: Some(node.created),
        modified: Some(node.modified),
        mime_type: is_file.then(|| "application/octet-stream".to_string()),
        path,
    }
}

/// In-memory storage provider.
///
/// All data is lost on drop. Clones share the same storage.
#[derive(Clone)]
pub struct MemoryStorage {
    state: Arc<Mutex<State>>,
    upload: UploadConfig,
    faults: Arc<Mutex<VecDeque<UploadFault>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_upload_config(UploadConfig::default())
    }

    pub fn with_upload_config(upload: UploadConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            upload,
            faults: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a fault for the next upload request.
    pub fn inject_fault(&self, fault: UploadFault) {
        self.faults.lock().push_back(fault);
    }

    /// `Content-Range` values of every upload request received so far.
    pub fn upload_requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    /// Stored bytes of the file at `path`, if any.
    pub fn file_contents(&self, path: &[String]) -> Option<Bytes> {
        let (parent, name) = split_leaf(path).ok()?;
        let state = self.state.lock();
        let mut current = ROOT_ID.to_string();
        for segment in parent {
            current = state.child(&current, segment, ObjectKind::Folder)?.id.clone();
        }
        state
            .child(&current, name, ObjectKind::File)
            .map(|n| n.data.clone())
    }

    /// Number of stored files and folders.
    pub fn object_count(&self) -> usize {
        self.state.lock().nodes.len()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FolderLookup for MemoryStorage {
    fn root_id(&self) -> &str {
        ROOT_ID
    }

    async fn find_folder(&self, parent_id: &str, name: &str) -> Result<Option<String>> {
        let state = self.state.lock();
        Ok(state
            .child(parent_id, name, ObjectKind::Folder)
            .map(|n| n.id.clone()))
    }

    async fn create_folder_at(&self, parent_id: &str, name: &str) -> Result<String> {
        let mut state = self.state.lock();
        if !state.is_folder(parent_id) {
            return Err(Error::NotFound(format!("Parent folder not found: {}", parent_id)));
        }
        if state.child(parent_id, name, ObjectKind::Folder).is_some() {
            return Err(Error::AlreadyExists(format!("Folder already exists: {}", name)));
        }
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        state.nodes.push(Node {
            id: id.clone(),
            parent: parent_id.to_string(),
            name: name.to_string(),
            kind: ObjectKind::Folder,
            data: Bytes::new(),
            created: now,
            modified: now,
        });
        Ok(id)
    }
}

#[async_trait]
impl RemoteStorage for MemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_files(&self, path: &[String]) -> Result<Vec<RemoteObject>> {
        let folder_id = resolve::resolve_path_id(self, path, false)
            .await?
            .ok_or_else(|| Error::PathNotFound(path.join("/")))?;

        let state = self.state.lock();
        let mut objects: Vec<RemoteObject> = state
            .nodes
            .iter()
            .filter(|n| n.parent == folder_id)
            .map(|n| {
                let mut child_path = path.to_vec();
                child_path.push(n.name.clone());
                to_object(n, child_path)
            })
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
        let mut state = self.state.lock();
        for object in objects {
            if state.get(&object.id).is_none() {
                return Err(Error::NotFound(format!("Object not found: {}", object.id)));
            }
            state.remove_tree(&object.id);
        }
        Ok(())
    }

    async fn upload_file(&self, path: &[String], source: ByteStream) -> Result<()> {
        let (parent, name) = split_leaf(path)?;
        let parent_id = resolve::resolve_path_id(self, parent, false)
            .await?
            .ok_or_else(|| Error::PathNotFound(parent.join("/")))?;

        let mut session = MemorySession {
            state: Arc::clone(&self.state),
            faults: Arc::clone(&self.faults),
            requests: Arc::clone(&self.requests),
            parent_id,
            name: name.to_string(),
            received: Vec::new(),
        };
        upload_chunked(&mut session, source, &self.upload).await?;
        Ok(())
    }

    async fn download_file(&self, object: &RemoteObject) -> Result<ByteStream> {
        let state = self.state.lock();
        match state.get(&object.id) {
            Some(node) if node.kind == ObjectKind::File => {
                Ok(bytes_stream(node.data.clone(), DOWNLOAD_PIECE))
            }
            Some(_) => Err(Error::InvalidInput("Cannot download a folder".to_string())),
            None => Err(Error::NotFound(format!("File not found: {}", object.id))),
        }
    }
}

/// Upload session that stores the file once the final byte is persisted.
struct MemorySession {
    state: Arc<Mutex<State>>,
    faults: Arc<Mutex<VecDeque<UploadFault>>>,
    requests: Arc<Mutex<Vec<String>>>,
    parent_id: String,
    name: String,
    received: Vec<u8>,
}

impl MemorySession {
    fn commit(&mut self) {
        let data = Bytes::from(std::mem::take(&mut self.received));
        let now = Utc::now();
        let mut state = self.state.lock();
        let existing = state
            .nodes
            .iter_mut()
            .find(|n| n.parent == self.parent_id && n.name == self.name && n.kind == ObjectKind::File);
        match existing {
            Some(node) => {
                node.data = data;
                node.modified = now;
            }
            None => state.nodes.push(Node {
                id: Uuid::new_v4().to_string(),
                parent: self.parent_id.clone(),
                name: self.name.clone(),
                kind: ObjectKind::File,
                data,
                created: now,
                modified: now,
            }),
        }
    }
}

#[async_trait]
impl ResumableSession for MemorySession {
    async fn put_chunk(&mut self, range: &ContentRange, body: Bytes) -> Result<ChunkOutcome> {
        self.requests.lock().push(range.to_string());

        if range.start != self.received.len() as u64 {
            return Err(Error::ProviderRequestFailed(format!(
                "Range starts at {} but {} bytes are persisted",
                range.start,
                self.received.len()
            )));
        }

        let fault = self.faults.lock().pop_front();
        let keep = match fault {
            Some(UploadFault::Fail) => {
                return Err(Error::ProviderRequestFailed("Injected upload failure".to_string()))
            }
            Some(UploadFault::Persist(limit)) => body.len().min(limit as usize),
            None => body.len(),
        };
        self.received.extend_from_slice(&body[..keep]);

        match range.total {
            Some(total) if total == self.received.len() as u64 => {
                self.commit();
                Ok(ChunkOutcome::Complete)
            }
            _ => Ok(ChunkOutcome::Incomplete {
                persisted: self.received.len() as u64,
            }),
        }
    }

    async fn abort(&mut self) -> Result<()> {
        self.received.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veilvault_common::collect_stream;

    fn path(segments: &[&str]) -> Vec<String> {
        segments.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_upload_download() {
        let storage = MemoryStorage::new();
        storage
            .upload_file(&path(&["test.txt"]), bytes_stream(&b"Hello, World!"[..], 4))
            .await
            .unwrap();

        let listing = storage.list_files(&[]).await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].path, path(&["test.txt"]));
        assert_eq!(listing[0].size, Some(13));

        let data = collect_stream(storage.download_file(&listing[0]).await.unwrap())
            .await
            .unwrap();
        assert_eq!(data, b"Hello, World!");
    }

    #[tokio::test]
    async fn test_upload_requires_parent() {
        let storage = MemoryStorage::new();
        let result = storage
            .upload_file(&path(&["missing", "a.txt"]), bytes_stream(&b"x"[..], 1))
            .await;
        assert!(matches!(result, Err(Error::PathNotFound(_))));
    }

    #[tokio::test]
    async fn test_reupload_replaces_content() {
        let storage = MemoryStorage::new();
        let target = path(&["a.txt"]);
        storage.upload_file(&target, bytes_stream(&b"one"[..], 8)).await.unwrap();
        storage.upload_file(&target, bytes_stream(&b"two!"[..], 8)).await.unwrap();
        assert_eq!(storage.object_count(), 1);
        assert_eq!(storage.file_contents(&target).unwrap(), Bytes::from_static(b"two!"));
    }

    #[tokio::test]
    async fn test_list_sorted_and_missing() {
        let storage = MemoryStorage::new();
        storage.create_folder(&path(&["dir", "zeta"]), true).await.unwrap();
        storage.create_folder(&path(&["dir", "alpha"]), false).await.unwrap();
        storage
            .upload_file(&path(&["dir", "beta.txt"]), bytes_stream(&b"1"[..], 1))
            .await
            .unwrap();

        let names: Vec<_> = storage
            .list_files(&path(&["dir"]))
            .await
            .unwrap()
            .iter()
            .map(|o| o.name().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["alpha", "zeta", "beta.txt"]);

        assert!(matches!(
            storage.list_files(&path(&["nope"])).await,
            Err(Error::PathNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_folder_rejected() {
        let storage = MemoryStorage::new();
        storage.create_folder(&path(&["a"]), false).await.unwrap();
        assert!(matches!(
            storage.create_folder(&path(&["a"]), false).await,
            Err(Error::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_folder_removes_children() {
        let storage = MemoryStorage::new();
        storage.create_folder(&path(&["a", "b"]), true).await.unwrap();
        storage
            .upload_file(&path(&["a", "b", "f"]), bytes_stream(&b"1"[..], 1))
            .await
            .unwrap();
        assert_eq!(storage.object_count(), 3);

        let listing = storage.list_files(&[]).await.unwrap();
        storage.delete_objects(&listing).await.unwrap();
        assert_eq!(storage.object_count(), 0);
        assert!(storage.delete_objects(&listing).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_upload_stores_nothing() {
        let storage = MemoryStorage::with_upload_config(UploadConfig {
            chunk_size: 4,
            max_stalled_rounds: 3,
        });
        storage.inject_fault(UploadFault::Persist(4));
        storage.inject_fault(UploadFault::Fail);

        let result = storage
            .upload_file(&path(&["f"]), bytes_stream(&b"0123456789"[..], 3))
            .await;
        assert!(matches!(result, Err(Error::UploadFailed { acknowledged: 4, .. })));
        assert_eq!(storage.object_count(), 0);
    }
}
