//! Path-to-id resolution shared by providers that address folders by id.

use async_trait::async_trait;
use tracing::debug;

use crate::provider::split_leaf;
use veilvault_common::{Error, Result};

/// Folder lookups a provider exposes so paths can be walked generically.
#[async_trait]
pub trait FolderLookup: Send + Sync {
    /// Id of the provider root folder.
    fn root_id(&self) -> &str;

    /// First folder named exactly `name` (case-sensitive) directly under
    /// `parent_id`.
    async fn find_folder(&self, parent_id: &str, name: &str) -> Result<Option<String>>;

    /// Create a folder `name` under `parent_id` and return its id.
    async fn create_folder_at(&self, parent_id: &str, name: &str) -> Result<String>;
}

/// Walk `path` from the root, one exact-name lookup per segment.
///
/// Missing segments are created when `create_missing` is set; otherwise the
/// walk stops with `Ok(None)`.
pub async fn resolve_path_id<L>(lookup: &L, path: &[String], create_missing: bool) -> Result<Option<String>>
where
    L: FolderLookup + ?Sized,
{
    let mut current = lookup.root_id().to_string();
    for segment in path {
        current = match lookup.find_folder(&current, segment).await? {
            Some(id) => id,
            None if create_missing => {
                debug!(parent = %current, "Creating missing folder");
                lookup.create_folder_at(&current, segment).await?
            }
            None => return Ok(None),
        };
    }
    Ok(Some(current))
}

/// Create the folder at `path`, resolving (and optionally creating) its parent.
pub async fn create_folder<L>(lookup: &L, path: &[String], create_missing: bool) -> Result<String>
where
    L: FolderLookup + ?Sized,
{
    let (parent, name) = split_leaf(path)?;
    let parent_id = resolve_path_id(lookup, parent, create_missing)
        .await?
        .ok_or_else(|| Error::PathNotFound(parent.join("/")))?;
    lookup.create_folder_at(&parent_id, name).await
}
