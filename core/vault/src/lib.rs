//! Vault layer for VeilVault.
//!
//! This module provides:
//! - The vault record and its obscured persistence form
//! - Path translation between plaintext vault paths and encrypted remote paths
//! - A plaintext file API over a remote storage provider
//!
//! # Architecture
//! The vault module sits between the task layer and storage providers,
//! handling all encryption/decryption operations transparently.

pub mod filesystem;
pub mod path;
pub mod vault;

pub use filesystem::VaultFileSystem;
pub use path::PathCodec;
pub use vault::{FilenameEncryption, Vault, VaultRecord};
