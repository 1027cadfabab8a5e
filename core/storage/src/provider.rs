//! Remote storage trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use veilvault_common::{ByteStream, Result};

/// Kind of a remote object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Folder,
    File,
}

/// One file or folder as seen by a provider.
///
/// `path` is expressed in the caller's coordinate system: ciphertext segments
/// at the storage boundary, plaintext once decoded by the vault layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObject {
    /// Provider-assigned identifier.
    pub id: String,
    pub kind: ObjectKind,
    /// Size in bytes (None for folders or when the provider omits it).
    pub size: Option<u64>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub mime_type: Option<String>,
    /// Full path from the provider root.
    pub path: Vec<String>,
}

impl RemoteObject {
    pub fn is_folder(&self) -> bool {
        self.kind == ObjectKind::Folder
    }

    /// Last path segment.
    pub fn name(&self) -> Option<&str> {
        self.path.last().map(String::as_str)
    }

    /// Human-readable size, e.g. "1.5 KB". None for folders and unknown sizes.
    pub fn display_size(&self) -> Option<String> {
        if self.is_folder() {
            return None;
        }
        let bytes = self.size.filter(|s| *s > 0)?;
        const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
        let mut size = bytes as f64;
        let mut unit = 0;
        while size >= 1024.0 && unit < UNITS.len() - 1 {
            size /= 1024.0;
            unit += 1;
        }
        Some(if unit == 0 {
            format!("{} {}", bytes, UNITS[0])
        } else {
            format!("{:.1} {}", size, UNITS[unit])
        })
    }
}

/// Listing order: folders first, then by joined path.
pub fn listing_order(a: &RemoteObject, b: &RemoteObject) -> Ordering {
    match (a.is_folder(), b.is_folder()) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.path.join("/").cmp(&b.path.join("/")),
    }
}

/// Remote object storage addressed by provider-root-relative paths.
///
/// All paths here are in the provider's namespace, so for vault data they are
/// mount path plus ciphertext segments. Implementations handle their own
/// authentication.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Provider id (e.g., "gdrive", "memory").
    fn name(&self) -> &str;

    /// List the direct children of the folder at `path`.
    ///
    /// Results are sorted with [`listing_order`].
    ///
    /// # Errors
    /// - `PathNotFound` if the folder does not exist
    async fn list_files(&self, path: &[String]) -> Result<Vec<RemoteObject>>;

    /// Resolve a folder path to its provider id.
    ///
    /// Returns `Ok(None)` when a segment does not exist and `create_missing`
    /// is false. The empty path resolves to the provider root.
    async fn resolve_path_id(&self, path: &[String], create_missing: bool)
        -> Result<Option<String>>;

    /// Create the folder at `path` and return its id. Parents are created
    /// when `create_missing` is set.
    ///
    /// # Errors
    /// - `PathNotFound` if the parent is missing and `create_missing` is false
    async fn create_folder(&self, path: &[String], create_missing: bool) -> Result<String>;

    /// Delete the given objects.
    async fn delete_objects(&self, objects: &[RemoteObject]) -> Result<()>;

    /// Upload `source` as the file at `path` (parent folder must exist).
    ///
    /// The stream is consumed; on failure the upload is abandoned and the
    /// caller must start over with a fresh stream.
    async fn upload_file(&self, path: &[String], source: ByteStream) -> Result<()>;

    /// Stream the contents of a file.
    async fn download_file(&self, object: &RemoteObject) -> Result<ByteStream>;
}

/// Split a path into its parent and final segment.
pub(crate) fn split_leaf(path: &[String]) -> Result<(&[String], &str)> {
    match path.split_last() {
        Some((leaf, parent)) => Ok((parent, leaf.as_str())),
        None => Err(veilvault_common::Error::InvalidInput(
            "Path must have at least one segment".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(kind: ObjectKind, path: &[&str], size: Option<u64>) -> RemoteObject {
        RemoteObject {
            id: path.join("/"),
            kind,
            size,
            created: None,
            modified: Some(Utc::now()),
            mime_type: None,
            path: path.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_remote_object_serialization() {
        let obj = object(ObjectKind::File, &["a", "b.txt"], Some(1024));
        let json = serde_json::to_string(&obj).unwrap();
        assert!(json.contains("\"file\""));
        let back: RemoteObject = serde_json::from_str(&json).unwrap();
        assert_eq!(back, obj);
    }

    #[test]
    fn test_listing_order_folders_first() {
        let mut items = vec![
            object(ObjectKind::File, &["a"], Some(1)),
            object(ObjectKind::Folder, &["z"], None),
            object(ObjectKind::File, &["0"], Some(1)),
            object(ObjectKind::Folder, &["b"], None),
        ];
        items.sort_by(listing_order);
        let names: Vec<_> = items.iter().map(|o| o.name().unwrap()).collect();
        assert_eq!(names, vec!["b", "z", "0", "a"]);
    }

    #[test]
    fn test_display_size() {
        assert_eq!(object(ObjectKind::File, &["a"], Some(512)).display_size().unwrap(), "512 B");
        assert_eq!(object(ObjectKind::File, &["a"], Some(1536)).display_size().unwrap(), "1.5 KB");
        assert_eq!(
            object(ObjectKind::File, &["a"], Some(5 * 1024 * 1024)).display_size().unwrap(),
            "5.0 MB"
        );
        assert!(object(ObjectKind::Folder, &["a"], None).display_size().is_none());
        assert!(object(ObjectKind::File, &["a"], Some(0)).display_size().is_none());
    }

    #[test]
    fn test_split_leaf() {
        let path = vec!["a".to_string(), "b".to_string()];
        let (parent, leaf) = split_leaf(&path).unwrap();
        assert_eq!(parent, &["a".to_string()]);
        assert_eq!(leaf, "b");
        assert!(split_leaf(&[]).is_err());
    }
}
