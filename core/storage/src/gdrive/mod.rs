//! Google Drive storage provider for VeilVault.
//!
//! - Folder-id path resolution with exact-name lookups
//! - Paginated listings
//! - Resumable chunked uploads (308 / `Range` protocol)
//! - Streaming downloads

pub mod client;
pub mod provider;

pub use client::{DriveClient, DriveFile, DriveUploadSession};
pub use provider::{create_gdrive_provider, DriveConfig, GDriveProvider};
