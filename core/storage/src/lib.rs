//! Remote storage layer for VeilVault.
//!
//! This module provides a trait-based interface over cloud object stores
//! (Google Drive, in-memory), addressed by provider-root-relative paths, and
//! a provider registry keyed by provider id.
//!
//! # Design Principles
//! - Provider isolation: no provider-specific logic in vault or crypto modules
//! - Streaming: uploads and downloads never hold a whole file in memory
//! - Resumable uploads: partial acknowledgements are resent, never skipped
//! - "Not found" during path resolution is a value, not an error

pub mod auth;
pub mod gdrive;
pub mod memory;
pub mod provider;
pub mod registry;
pub mod resolve;
pub mod upload;

pub use auth::{AccessToken, StaticToken, TokenSource};
pub use memory::{MemoryStorage, UploadFault};
pub use provider::{listing_order, ObjectKind, RemoteObject, RemoteStorage};
pub use registry::{create_default_registry, ProviderContext, ProviderFactory, ProviderRegistry};
pub use resolve::FolderLookup;
pub use upload::{
    parse_range_header, upload_chunked, ChunkOutcome, ContentRange, ResumableSession,
    UploadConfig, UploadReport,
};
