//! Common utilities and types shared across VeilVault modules.
//!
//! This module provides foundational types that are used throughout the codebase,
//! ensuring consistency and type safety.

pub mod error;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use stream::{bytes_stream, collect_stream, ByteStream, ChunkReader};
pub use types::{AccountId, SensitiveString, VaultId, VaultPath};
